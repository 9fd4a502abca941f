//! Brightness snapping and scaling.

use super::Ratio;

/// Upper bound any device may report as its brightness ceiling.
pub const BRIGHTNESS_MAX: u8 = 100;

/// Assumed brightness ceiling until a device reports its own.
pub const DEFAULT_DEVICE_BRIGHTNESS_MAX: u8 = 100;

/// Slider step: coarse on full-range devices, fine where the range is small
/// enough that a 5-step would waste most of the travel.
pub fn slider_step(brightness_max: u8) -> u8 {
    if brightness_max <= 50 { 1 } else { 5 }
}

/// Step used when re-snapping brightness for the full-payload retry.
pub fn fallback_step(brightness_max: u8) -> u8 {
    if brightness_max <= 50 { 1 } else { 10 }
}

/// Snap a value to the nearest multiple of `step`, then clamp into
/// `[min, max]`.
///
/// # Examples
///
/// ```
/// use keylight_rs::snap_to_step;
///
/// assert_eq!(snap_to_step(52, 5, 0, 100), 50);
/// assert_eq!(snap_to_step(53, 5, 0, 100), 55);
/// assert_eq!(snap_to_step(210, 5, 0, 100), 100);
/// assert_eq!(snap_to_step(2, 5, 0, 100), 0);
/// ```
pub fn snap_to_step(value: i32, step: u8, min: u8, max: u8) -> u8 {
    let step = i32::from(step.max(1));
    let stepped = (f64::from(value) / f64::from(step)).round() as i32 * step;
    stepped.clamp(i32::from(min), i32::from(max)) as u8
}

/// Scale a slider position onto a device's brightness range and snap it to
/// the device's step granularity.
pub fn brightness_from_ratio(ratio: Ratio, brightness_max: u8) -> u8 {
    let absolute = (ratio.get() * f64::from(brightness_max)).round() as i32;
    snap_to_step(absolute, slider_step(brightness_max), 0, brightness_max)
}

/// The percentage shown for a brightness value, normalized so low-range
/// devices still read 0-100%.
pub fn brightness_percent(brightness: u8, brightness_max: u8) -> u8 {
    let max = f64::from(brightness_max.max(1));
    ((f64::from(brightness) / max) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_always_in_range_and_on_step() {
        for v in -50..200 {
            let snapped = snap_to_step(v, 5, 0, 100);
            assert!(snapped <= 100);
            assert_eq!(snapped % 5, 0);
        }
        for v in -10..80 {
            let snapped = snap_to_step(v, 1, 0, 47);
            assert!(snapped <= 47);
        }
    }

    #[test]
    fn test_step_selection() {
        assert_eq!(slider_step(100), 5);
        assert_eq!(slider_step(51), 5);
        assert_eq!(slider_step(50), 1);
        assert_eq!(fallback_step(100), 10);
        assert_eq!(fallback_step(40), 1);
    }

    #[test]
    fn test_brightness_from_ratio() {
        assert_eq!(brightness_from_ratio(Ratio::new(0.0), 100), 0);
        assert_eq!(brightness_from_ratio(Ratio::new(1.0), 100), 100);
        assert_eq!(brightness_from_ratio(Ratio::new(0.52), 100), 50);
        // Low-range device snaps at single steps.
        assert_eq!(brightness_from_ratio(Ratio::new(0.5), 47), 24);
    }

    #[test]
    fn test_brightness_percent_normalizes() {
        assert_eq!(brightness_percent(20, 100), 20);
        assert_eq!(brightness_percent(20, 40), 50);
        assert_eq!(brightness_percent(0, 0), 0);
    }
}
