//! Value types for light control parameters.

mod brightness;
mod color;
mod kelvin;
mod ratio;

pub use brightness::{
    BRIGHTNESS_MAX, DEFAULT_DEVICE_BRIGHTNESS_MAX, brightness_from_ratio, brightness_percent,
    fallback_step, slider_step, snap_to_step,
};
pub use color::{
    BRIGHTNESS_ACCENT_HIGH, BRIGHTNESS_ACCENT_LOW, Rgb, TEMPERATURE_ACCENT_COOL,
    TEMPERATURE_ACCENT_WARM,
};
pub use kelvin::{Kelvin, Mired, TemperatureReading, TemperatureUnit, kelvin_to_wire};
pub use ratio::Ratio;
