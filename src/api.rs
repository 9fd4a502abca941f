//! Wire types for the Key Light REST API.

use serde::{Deserialize, Serialize};

use crate::types::BRIGHTNESS_MAX;

/// Accessory metadata reported by `GET /elgato/accessory-info`.
///
/// Only `productName` is reliably present; everything else varies by
/// firmware generation, so every field tolerates absence.
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessoryInfo {
    pub product_name: Option<String>,
    pub display_name: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub firmware_build_number: Option<u64>,
    pub hardware_revision: Option<String>,
    pub hardware_board_type: Option<u64>,
    #[serde(rename = "power-info")]
    pub power_info: Option<PowerInfo>,
}

/// Power capabilities nested under `power-info`.
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct PowerInfo {
    pub maximum_brightness: Option<f64>,
}

impl AccessoryInfo {
    /// The name a user would recognize: display name, falling back to the
    /// product name. Whitespace-only values count as absent.
    pub fn preferred_name(&self) -> Option<&str> {
        non_blank(self.display_name.as_deref()).or_else(|| non_blank(self.product_name.as_deref()))
    }

    /// The device-reported brightness ceiling, clamped into 1..=100.
    pub fn maximum_brightness(&self) -> Option<u8> {
        let raw = self.power_info.as_ref()?.maximum_brightness?;
        if !raw.is_finite() || raw <= 0.0 {
            return None;
        }
        Some((raw.round() as i64).clamp(1, i64::from(BRIGHTNESS_MAX)) as u8)
    }

    /// Multi-line hardware summary for a details panel.
    pub fn details(&self, address: &str) -> String {
        let display = |value: Option<&str>| non_blank(value).unwrap_or("Unknown").to_string();
        let number = |value: Option<u64>| {
            value.map_or_else(|| "Unknown".to_string(), |v| v.to_string())
        };
        let firmware = match (&self.firmware_version, self.firmware_build_number) {
            (Some(version), Some(build)) => format!("{version} (build {build})"),
            (Some(version), None) => version.clone(),
            (None, _) => "Unknown".to_string(),
        };

        [
            format!("IP: {}", display(Some(address))),
            format!("MAC: {}", display(self.mac_address.as_deref())),
            format!("Serial: {}", display(self.serial_number.as_deref())),
            format!("Firmware: {firmware}"),
            format!(
                "Hardware Revision: {}",
                display(self.hardware_revision.as_deref())
            ),
            format!("Board Type: {}", number(self.hardware_board_type)),
        ]
        .join("\n")
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One light head's state as reported by `GET /elgato/lights`.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LightState {
    pub on: u8,
    pub brightness: u8,
    pub temperature: u32,
}

impl LightState {
    pub fn is_on(&self) -> bool {
        self.on == 1
    }
}

/// The envelope wrapping light state on both GET and PUT.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct LightsEnvelope {
    pub number_of_lights: u32,
    pub lights: Vec<LightState>,
}

impl LightsEnvelope {
    /// The first (and in practice only) light head.
    pub fn first(&self) -> Option<&LightState> {
        self.lights.first()
    }
}

/// A partial attribute patch for `PUT /elgato/lights`.
///
/// Unset fields are omitted from the serialized body, so a patch touches
/// only the attributes it names.
///
/// # Examples
///
/// ```
/// use keylight_rs::LightPatch;
///
/// let mut patch = LightPatch::new();
/// assert!(!patch.is_valid());
///
/// patch.brightness(40);
/// assert!(patch.is_valid());
/// assert!(patch.is_brightness_only());
///
/// patch.on(true);
/// assert!(!patch.is_brightness_only());
/// ```
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LightPatch {
    pub(crate) on: Option<u8>,
    pub(crate) brightness: Option<u8>,
    pub(crate) temperature: Option<u32>,
}

impl LightPatch {
    /// Create a new empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the power attribute.
    pub fn on(&mut self, on: bool) -> &mut Self {
        self.on = Some(u8::from(on));
        self
    }

    /// Set the brightness attribute.
    pub fn brightness(&mut self, brightness: u8) -> &mut Self {
        self.brightness = Some(brightness);
        self
    }

    /// Set the temperature attribute, in the device's wire unit.
    pub fn temperature(&mut self, temperature: u32) -> &mut Self {
        self.temperature = Some(temperature);
        self
    }

    /// Check if this patch carries at least one attribute.
    pub fn is_valid(&self) -> bool {
        self.on.is_some() || self.brightness.is_some() || self.temperature.is_some()
    }

    /// Whether brightness is the only attribute set. Such patches are the
    /// ones some firmware rejects with 404.
    pub fn is_brightness_only(&self) -> bool {
        self.brightness.is_some() && self.on.is_none() && self.temperature.is_none()
    }
}
