//! Accent color blending for slider visuals.

use serde::{Deserialize, Serialize};

use super::Ratio;

/// Accent at the dim end of the brightness slider.
pub const BRIGHTNESS_ACCENT_LOW: Rgb = Rgb::new(70, 70, 70);
/// Accent at the bright end of the brightness slider.
pub const BRIGHTNESS_ACCENT_HIGH: Rgb = Rgb::new(255, 245, 200);
/// Accent at the warm end of the temperature slider.
pub const TEMPERATURE_ACCENT_WARM: Rgb = Rgb::new(255, 199, 82);
/// Accent at the cool end of the temperature slider.
pub const TEMPERATURE_ACCENT_COOL: Rgb = Rgb::new(245, 245, 245);

/// An RGB color with red, green, and blue components (0-255 each).
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    /// Create a color with the given RGB values.
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Rgb { red, green, blue }
    }

    /// Linearly blend from `self` toward `to`, per channel.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::{Ratio, Rgb};
    ///
    /// let from = Rgb::new(0, 0, 0);
    /// let to = Rgb::new(255, 255, 255);
    /// assert_eq!(from.mix(to, Ratio::new(0.0)), from);
    /// assert_eq!(from.mix(to, Ratio::new(1.0)), to);
    /// assert_eq!(from.mix(to, Ratio::new(0.5)), Rgb::new(128, 128, 128));
    /// ```
    pub fn mix(&self, to: Rgb, ratio: Ratio) -> Rgb {
        let channel = |from: u8, to: u8| -> u8 {
            (f64::from(from) + (f64::from(to) - f64::from(from)) * ratio.get()).round() as u8
        };
        Rgb {
            red: channel(self.red, to.red),
            green: channel(self.green, to.green),
            blue: channel(self.blue, to.blue),
        }
    }

    /// CSS `rgb(r, g, b)` rendering.
    pub fn css(&self) -> String {
        format!("rgb({}, {}, {})", self.red, self.green, self.blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_endpoints() {
        let mixed = BRIGHTNESS_ACCENT_LOW.mix(BRIGHTNESS_ACCENT_HIGH, Ratio::new(0.0));
        assert_eq!(mixed, BRIGHTNESS_ACCENT_LOW);
        let mixed = BRIGHTNESS_ACCENT_LOW.mix(BRIGHTNESS_ACCENT_HIGH, Ratio::new(1.0));
        assert_eq!(mixed, BRIGHTNESS_ACCENT_HIGH);
    }

    #[test]
    fn test_css_format() {
        assert_eq!(TEMPERATURE_ACCENT_WARM.css(), "rgb(255, 199, 82)");
    }
}
