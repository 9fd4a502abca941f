//! Normalized slider positions.

use serde::{Deserialize, Serialize};

/// A normalized position in [0, 1], as produced by a slider widget.
///
/// Construction clamps out-of-range input, so a `Ratio` is always safe to
/// scale against a device range.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Ratio {
    value: f64,
}

impl Ratio {
    /// Create a new Ratio, clamping to [0, 1].
    ///
    /// Non-finite input collapses to 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::Ratio;
    ///
    /// assert_eq!(Ratio::new(0.25).get(), 0.25);
    /// assert_eq!(Ratio::new(-3.0).get(), 0.0);
    /// assert_eq!(Ratio::new(7.0).get(), 1.0);
    /// assert_eq!(Ratio::new(f64::NAN).get(), 0.0);
    /// ```
    pub fn new(value: f64) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        Ratio {
            value: value.clamp(0.0, 1.0),
        }
    }

    /// Get the ratio value.
    pub fn get(&self) -> f64 {
        self.value
    }
}
