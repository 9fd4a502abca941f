//! Color temperature control.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::Ratio;

/// Reported temperature values above this are Kelvin on the wire; at or
/// below it they are mired. Some firmwares expose Kelvin directly.
const KELVIN_WIRE_THRESHOLD: u32 = 1000;

/// Which unit a device's firmware uses for temperature on the wire.
///
/// This is inferred from observed values, never configured: every reported
/// temperature re-derives it, and subsequent writes use whatever unit the
/// device last reported.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    /// Reciprocal megakelvin (1,000,000 / Kelvin), the common firmware unit.
    #[default]
    Mired,
    /// Kelvin carried directly.
    Kelvin,
}

/// Color temperature in Kelvin, clamped to the Key Light range 2900K-7000K.
///
/// Lower values produce warmer (more yellow/orange) light, while higher
/// values produce cooler (more blue) light.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Kelvin {
    kelvin: u16,
}

impl Kelvin {
    pub const MIN: u16 = 2900;
    pub const MAX: u16 = 7000;

    /// Create a new Kelvin, clamping to the supported range.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::Kelvin;
    ///
    /// assert_eq!(Kelvin::new(4000).get(), 4000);
    /// assert_eq!(Kelvin::new(100).get(), 2900);
    /// assert_eq!(Kelvin::new(9000).get(), 7000);
    /// ```
    pub fn new(kelvin: u16) -> Self {
        Kelvin {
            kelvin: kelvin.clamp(Self::MIN, Self::MAX),
        }
    }

    /// Get the kelvin value.
    pub fn get(&self) -> u16 {
        self.kelvin
    }

    /// Convert to mired.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::Kelvin;
    ///
    /// assert_eq!(Kelvin::new(4000).to_mired().get(), 250);
    /// ```
    pub fn to_mired(&self) -> Mired {
        Mired::new((1_000_000.0 / f64::from(self.kelvin)).round() as u16)
    }

    /// Map a slider position in [0, 1] onto the Kelvin range.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::{Kelvin, Ratio};
    ///
    /// assert_eq!(Kelvin::from_ratio(Ratio::new(0.0)).get(), 2900);
    /// assert_eq!(Kelvin::from_ratio(Ratio::new(1.0)).get(), 7000);
    /// ```
    pub fn from_ratio(ratio: Ratio) -> Self {
        let span = f64::from(Self::MAX - Self::MIN);
        Kelvin::new(Self::MIN + (ratio.get() * span).round() as u16)
    }

    /// The position of this value within the Kelvin range, in [0, 1].
    pub fn ratio(&self) -> Ratio {
        let span = f64::from(Self::MAX - Self::MIN);
        Ratio::new(f64::from(self.kelvin - Self::MIN) / span)
    }
}

/// Color temperature in mired, clamped to the bounds that map onto the
/// supported Kelvin range (143 = 7000K, 344 = 2900K).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Mired {
    mired: u16,
}

impl Mired {
    pub const MIN: u16 = 143;
    pub const MAX: u16 = 344;

    /// Create a new Mired, clamping to the supported range.
    pub fn new(mired: u16) -> Self {
        Mired {
            mired: mired.clamp(Self::MIN, Self::MAX),
        }
    }

    /// Get the mired value.
    pub fn get(&self) -> u16 {
        self.mired
    }

    /// Convert to Kelvin.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::Mired;
    ///
    /// assert_eq!(Mired::new(300).to_kelvin().get(), 3333);
    /// ```
    pub fn to_kelvin(&self) -> Kelvin {
        Kelvin::new((1_000_000.0 / f64::from(self.mired)).round() as u16)
    }
}

/// A temperature reported by a device, decoded into canonical Kelvin plus
/// the unit the firmware evidently speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureReading {
    pub kelvin: Kelvin,
    pub unit: TemperatureUnit,
}

impl TemperatureReading {
    /// Decode a raw wire temperature.
    ///
    /// Values above 1000 are taken as Kelvin; at or below, as mired. Kelvin
    /// readings are quantized through mired so that display and write-back
    /// agree with what the device can actually represent.
    ///
    /// # Examples
    ///
    /// ```
    /// use keylight_rs::{TemperatureReading, TemperatureUnit};
    ///
    /// let reading = TemperatureReading::from_wire(300);
    /// assert_eq!(reading.kelvin.get(), 3333);
    /// assert_eq!(reading.unit, TemperatureUnit::Mired);
    ///
    /// let reading = TemperatureReading::from_wire(4000);
    /// assert_eq!(reading.kelvin.get(), 4000);
    /// assert_eq!(reading.unit, TemperatureUnit::Kelvin);
    /// ```
    pub fn from_wire(raw: u32) -> Self {
        if raw > KELVIN_WIRE_THRESHOLD {
            let mired = Kelvin::new(raw.min(u32::from(u16::MAX)) as u16).to_mired();
            TemperatureReading {
                kelvin: mired.to_kelvin(),
                unit: TemperatureUnit::Kelvin,
            }
        } else {
            TemperatureReading {
                kelvin: Mired::new(raw as u16).to_kelvin(),
                unit: TemperatureUnit::Mired,
            }
        }
    }

    /// The value to send back on the wire in the inferred unit.
    pub fn wire_value(&self) -> u32 {
        match self.unit {
            TemperatureUnit::Kelvin => u32::from(self.kelvin.get()),
            TemperatureUnit::Mired => u32::from(self.kelvin.to_mired().get()),
        }
    }
}

/// Convert a Kelvin value into the given wire unit.
pub fn kelvin_to_wire(kelvin: Kelvin, unit: TemperatureUnit) -> u32 {
    match unit {
        TemperatureUnit::Kelvin => u32::from(kelvin.get()),
        TemperatureUnit::Mired => u32::from(kelvin.to_mired().get()),
    }
}
