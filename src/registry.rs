//! The deduplicated registry of known devices.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use tokio::task::JoinHandle;

use crate::api::{AccessoryInfo, LightState};
use crate::client::DeviceClient;
use crate::types::{
    BRIGHTNESS_ACCENT_HIGH, BRIGHTNESS_ACCENT_LOW, BRIGHTNESS_MAX, DEFAULT_DEVICE_BRIGHTNESS_MAX,
    Kelvin, Ratio, Rgb, TEMPERATURE_ACCENT_COOL, TEMPERATURE_ACCENT_WARM, TemperatureReading,
    TemperatureUnit, brightness_percent,
};

/// A device record produced by any discovery strategy.
///
/// The id is the canonical `address:port` pair; every strategy that finds
/// the same device derives the same id, which is what makes the registry's
/// upsert idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub address: IpAddr,
    pub port: u16,
    pub name: String,
    pub host: String,
}

impl DeviceInfo {
    pub fn new(address: IpAddr, port: u16, name: &str, host: &str) -> Self {
        DeviceInfo {
            id: SocketAddr::new(address, port).to_string(),
            address,
            port,
            name: name.to_string(),
            host: host.to_string(),
        }
    }
}

/// The two debounced write fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteField {
    Brightness,
    Temperature,
}

struct PendingWrite {
    handle: JoinHandle<()>,
    seq: u64,
}

/// Per-field debounce timers. At most one timer lives per field; replacing
/// aborts the previous one, and cancellation is idempotent.
#[derive(Default)]
pub(crate) struct PendingWrites {
    brightness: Option<PendingWrite>,
    temperature: Option<PendingWrite>,
}

impl PendingWrites {
    fn slot(&mut self, field: WriteField) -> &mut Option<PendingWrite> {
        match field {
            WriteField::Brightness => &mut self.brightness,
            WriteField::Temperature => &mut self.temperature,
        }
    }

    pub(crate) fn replace(&mut self, field: WriteField, handle: JoinHandle<()>, seq: u64) {
        if let Some(previous) = self.slot(field).replace(PendingWrite { handle, seq }) {
            previous.handle.abort();
        }
    }

    /// Claim a fired timer. Returns false when the firing was superseded by
    /// a newer edit (or already claimed), in which case no write may happen.
    pub(crate) fn take_if_current(&mut self, field: WriteField, seq: u64) -> bool {
        let slot = self.slot(field);
        if slot.as_ref().is_some_and(|pending| pending.seq == seq) {
            slot.take();
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for slot in [&mut self.brightness, &mut self.temperature] {
            if let Some(pending) = slot.take() {
                pending.handle.abort();
            }
        }
    }

    #[cfg(test)]
    fn is_pending(&mut self, field: WriteField) -> bool {
        self.slot(field).is_some()
    }
}

/// One known light and everything the controller tracks about it.
pub struct Device {
    pub(crate) id: String,
    pub(crate) address: IpAddr,
    pub(crate) port: u16,
    pub(crate) name: String,
    pub(crate) host: String,
    pub(crate) client: DeviceClient,
    pub(crate) brightness_max: u8,
    pub(crate) temperature_unit: TemperatureUnit,
    pub(crate) state: Option<LightState>,
    pub(crate) accessory_info: Option<AccessoryInfo>,
    pub(crate) pending: PendingWrites,
    next_seq: u64,
}

impl Device {
    fn new(info: DeviceInfo, client: DeviceClient) -> Self {
        Device {
            id: info.id,
            address: info.address,
            port: info.port,
            name: info.name,
            host: info.host,
            client,
            brightness_max: DEFAULT_DEVICE_BRIGHTNESS_MAX,
            temperature_unit: TemperatureUnit::default(),
            state: None,
            accessory_info: None,
            pending: PendingWrites::default(),
            next_seq: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn accessory_info(&self) -> Option<&AccessoryInfo> {
        self.accessory_info.as_ref()
    }

    pub fn state(&self) -> Option<&LightState> {
        self.state.as_ref()
    }

    pub fn brightness_max(&self) -> u8 {
        self.brightness_max
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.temperature_unit
    }

    pub(crate) fn next_write_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Fold a device-reported state into the record, re-deriving the wire
    /// temperature unit from the observed value.
    pub(crate) fn apply_reported_state(&mut self, reported: &LightState) {
        let brightness_max = self.brightness_max.clamp(1, BRIGHTNESS_MAX);
        let reading = TemperatureReading::from_wire(reported.temperature);
        self.temperature_unit = reading.unit;
        self.state = Some(LightState {
            on: u8::from(reported.is_on()),
            brightness: reported.brightness.min(brightness_max),
            temperature: reading.wire_value(),
        });
    }

    /// Fold accessory metadata into the record. Called on every refresh;
    /// absent fields leave the current values alone.
    pub(crate) fn apply_accessory_info(&mut self, info: AccessoryInfo) {
        if let Some(max) = info.maximum_brightness() {
            self.brightness_max = max;
        }
        if let Some(name) = info.preferred_name() {
            self.name = name.to_string();
        }
        self.accessory_info = Some(info);
    }

    /// The Kelvin value of the last reported temperature, or the warm end
    /// of the range before the first read.
    pub fn kelvin(&self) -> Kelvin {
        self.state
            .map(|state| TemperatureReading::from_wire(state.temperature).kelvin)
            .unwrap_or(Kelvin::new(Kelvin::MIN))
    }

    /// Render model derived from canonical state.
    pub fn view(&self) -> DeviceView {
        let state = self.state.unwrap_or_default();
        self.render(state.is_on(), state.brightness, self.kelvin())
    }

    /// Render model with explicit values, used for optimistic rendering of
    /// an edit ahead of the device's confirmation.
    pub(crate) fn render(&self, power_on: bool, brightness: u8, kelvin: Kelvin) -> DeviceView {
        let brightness_max = self.brightness_max.max(1);
        let brightness_ratio = Ratio::new(f64::from(brightness) / f64::from(brightness_max));
        let temperature_ratio = kelvin.ratio();
        DeviceView {
            id: self.id.clone(),
            name: self.name.clone(),
            power_on,
            brightness_percent: brightness_percent(brightness, brightness_max),
            brightness_ratio,
            kelvin: kelvin.get(),
            temperature_ratio,
            brightness_accent: BRIGHTNESS_ACCENT_LOW.mix(BRIGHTNESS_ACCENT_HIGH, brightness_ratio),
            temperature_accent: TEMPERATURE_ACCENT_WARM
                .mix(TEMPERATURE_ACCENT_COOL, temperature_ratio),
            details: self
                .accessory_info
                .as_ref()
                .map(|info| info.details(&self.address.to_string())),
        }
    }

    pub(crate) fn cancel_pending(&mut self) {
        self.pending.cancel_all();
    }
}

/// What a presentation layer needs to draw one device.
///
/// Views flow one way, controller to frontend; a frontend must never turn a
/// programmatic render back into an edit intent, or every reconciliation
/// read would echo a write.
#[derive(Debug, Clone)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    pub power_on: bool,
    /// Brightness normalized against the device's own ceiling, 0-100.
    pub brightness_percent: u8,
    pub brightness_ratio: Ratio,
    pub kelvin: u16,
    pub temperature_ratio: Ratio,
    pub brightness_accent: Rgb,
    pub temperature_accent: Rgb,
    /// Hardware summary, present once accessory info has been read.
    pub details: Option<String>,
}

/// Result of a registry upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Inserted,
    Known,
}

/// The address-keyed set of known devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert. Discovery events repeat constantly, so an already
    /// known id must not disturb the existing record, its state, or its
    /// pending writes.
    pub(crate) fn ensure(&mut self, info: DeviceInfo, client: DeviceClient) -> EnsureOutcome {
        if self.devices.contains_key(&info.id) {
            return EnsureOutcome::Known;
        }
        self.devices
            .insert(info.id.clone(), Device::new(info, client));
        EnsureOutcome::Inserted
    }

    /// Remove a device, cancelling its pending timers first.
    pub(crate) fn remove(&mut self, id: &str) -> Option<Device> {
        let mut device = self.devices.remove(id)?;
        device.cancel_pending();
        Some(device)
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub(crate) fn devices_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    /// The aggregate status line: a settled count once anything is known,
    /// otherwise either "still discovering" or "nothing found".
    pub fn status_line(&self, discovering: bool) -> String {
        match self.len() {
            0 if discovering => "Discovering Key Lights...".to_string(),
            0 => "No Key Light devices found".to_string(),
            1 => "1 device found".to_string(),
            n => format!("{n} devices found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_http_client;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn info(last_octet: u8) -> DeviceInfo {
        DeviceInfo::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)),
            9123,
            "Key Light",
            "kl.local",
        )
    }

    fn client() -> DeviceClient {
        let http = build_http_client(Duration::from_secs(2)).unwrap();
        DeviceClient::new(http, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 9123)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.ensure(info(20), client()), EnsureOutcome::Inserted);

        // Mark some state, then re-discover the same id.
        registry
            .get_mut("192.168.1.20:9123")
            .unwrap()
            .apply_reported_state(&LightState {
                on: 1,
                brightness: 40,
                temperature: 300,
            });
        assert_eq!(registry.ensure(info(20), client()), EnsureOutcome::Known);

        assert_eq!(registry.len(), 1);
        let device = registry.get("192.168.1.20:9123").unwrap();
        assert_eq!(device.state().unwrap().brightness, 40);
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_timers() {
        let mut registry = DeviceRegistry::new();
        registry.ensure(info(20), client());

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fired_clone.store(true, Ordering::SeqCst);
        });

        let device = registry.get_mut("192.168.1.20:9123").unwrap();
        let seq = device.next_write_seq();
        device.pending.replace(WriteField::Brightness, handle, seq);

        assert!(registry.remove("192.168.1.20:9123").is_some());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_replace_aborts_previous_timer_for_field() {
        let mut registry = DeviceRegistry::new();
        registry.ensure(info(20), client());
        let device = registry.get_mut("192.168.1.20:9123").unwrap();

        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let seq1 = device.next_write_seq();
        device.pending.replace(WriteField::Brightness, first, seq1);
        let seq2 = device.next_write_seq();
        device.pending.replace(WriteField::Brightness, second, seq2);

        // The stale firing must not claim the slot; the current one must.
        assert!(!device.pending.take_if_current(WriteField::Brightness, seq1));
        assert!(device.pending.take_if_current(WriteField::Brightness, seq2));
        assert!(!device.pending.is_pending(WriteField::Brightness));
    }

    #[tokio::test]
    async fn test_unit_inference_from_reported_state() {
        let mut registry = DeviceRegistry::new();
        registry.ensure(info(20), client());
        let device = registry.get_mut("192.168.1.20:9123").unwrap();

        device.apply_reported_state(&LightState {
            on: 1,
            brightness: 40,
            temperature: 300,
        });
        assert_eq!(device.temperature_unit(), TemperatureUnit::Mired);
        assert_eq!(device.kelvin().get(), 3333);
        assert_eq!(device.state().unwrap().temperature, 300);

        device.apply_reported_state(&LightState {
            on: 1,
            brightness: 40,
            temperature: 4000,
        });
        assert_eq!(device.temperature_unit(), TemperatureUnit::Kelvin);
        assert_eq!(device.kelvin().get(), 4000);
        assert_eq!(device.state().unwrap().temperature, 4000);
    }

    #[tokio::test]
    async fn test_view_derives_ratios_from_canonical_state() {
        let mut registry = DeviceRegistry::new();
        registry.ensure(info(20), client());
        let device = registry.get_mut("192.168.1.20:9123").unwrap();
        device.apply_reported_state(&LightState {
            on: 1,
            brightness: 50,
            temperature: 4950,
        });

        let view = device.view();
        assert!(view.power_on);
        assert_eq!(view.brightness_percent, 50);
        assert!((view.brightness_ratio.get() - 0.5).abs() < 1e-9);
        assert_eq!(view.kelvin, 4950);
        assert!((view.temperature_ratio.get() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_line() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.status_line(true), "Discovering Key Lights...");
        assert_eq!(registry.status_line(false), "No Key Light devices found");

        registry.ensure(info(20), client());
        assert_eq!(registry.status_line(false), "1 device found");
        assert_eq!(registry.status_line(true), "1 device found");

        registry.ensure(info(21), client());
        assert_eq!(registry.status_line(false), "2 devices found");
    }
}
