//! State synchronization between edits and device-reported truth.

use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::api::{LightPatch, LightsEnvelope};
use crate::client::DeviceClient;
use crate::controller::{EditIntent, Event, Frontend};
use crate::errors::Error;
use crate::registry::{Device, DeviceRegistry, WriteField};
use crate::types::{
    Kelvin, Ratio, brightness_from_ratio, fallback_step, kelvin_to_wire, snap_to_step,
};

type Result<T> = std::result::Result<T, Error>;

/// Turns edit intents into debounced, validated device writes and folds
/// device responses back into the registry.
///
/// All methods run on the controller's event-loop task; network work happens
/// in spawned tasks that report back through the event channel.
pub(crate) struct StateSyncController {
    events: mpsc::UnboundedSender<Event>,
    debounce_window: Duration,
    io: JoinSet<()>,
}

impl StateSyncController {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>, debounce_window: Duration) -> Self {
        StateSyncController {
            events,
            debounce_window,
            io: JoinSet::new(),
        }
    }

    /// Apply an edit intent: render optimistically, then either write
    /// immediately (power) or arm the field's debounce timer.
    pub(crate) fn handle_edit(
        &mut self,
        registry: &mut DeviceRegistry,
        frontend: &mut dyn Frontend,
        id: &str,
        intent: EditIntent,
    ) {
        let Some(device) = registry.get_mut(id) else {
            return;
        };
        let current = device.state().copied().unwrap_or_default();

        match intent {
            EditIntent::Power(on) => {
                let mut patch = LightPatch::new();
                patch.on(on);
                frontend.device_updated(&device.render(on, current.brightness, device.kelvin()));
                Self::spawn_write(&mut self.io, &self.events, device, patch, None);
            }
            EditIntent::TogglePower => {
                let on = current.on != 1;
                let mut patch = LightPatch::new();
                patch.on(on);
                frontend.device_updated(&device.render(on, current.brightness, device.kelvin()));
                Self::spawn_write(&mut self.io, &self.events, device, patch, None);
            }
            EditIntent::BrightnessRatio(ratio) => {
                let brightness =
                    brightness_from_ratio(Ratio::new(ratio), device.brightness_max());
                frontend.device_updated(&device.render(
                    current.on == 1,
                    brightness,
                    device.kelvin(),
                ));
                self.schedule_write(device, WriteField::Brightness, u32::from(brightness));
            }
            EditIntent::TemperatureRatio(ratio) => {
                let kelvin = Kelvin::from_ratio(Ratio::new(ratio));
                let wire = kelvin_to_wire(kelvin, device.temperature_unit());
                frontend.device_updated(&device.render(current.on == 1, current.brightness, kelvin));
                self.schedule_write(device, WriteField::Temperature, wire);
            }
        }
    }

    /// Arm (or re-arm) the debounce timer for one field. The previous timer
    /// for that field, fired or not, is superseded.
    fn schedule_write(&self, device: &mut Device, field: WriteField, value: u32) {
        let seq = device.next_write_seq();
        let events = self.events.clone();
        let id = device.id().to_string();
        let window = self.debounce_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = events.send(Event::WriteDue {
                id,
                field,
                value,
                seq,
            });
        });
        device.pending.replace(field, handle, seq);
    }

    /// A debounce timer fired. Ignore it unless it is still the current
    /// timer for its field; otherwise a newer edit has superseded it.
    pub(crate) fn write_due(
        &mut self,
        registry: &mut DeviceRegistry,
        id: &str,
        field: WriteField,
        value: u32,
        seq: u64,
    ) {
        let Some(device) = registry.get_mut(id) else {
            return;
        };
        if !device.pending.take_if_current(field, seq) {
            debug!("dropping superseded {field:?} write for {id}");
            return;
        }

        let mut patch = LightPatch::new();
        let fallback = match field {
            WriteField::Brightness => {
                patch.brightness(value.min(255) as u8);
                Some(fallback_payload(device, value.min(255) as u8))
            }
            WriteField::Temperature => {
                patch.temperature(value);
                None
            }
        };
        Self::spawn_write(&mut self.io, &self.events, device, patch, fallback);
    }

    fn spawn_write(
        io: &mut JoinSet<()>,
        events: &mpsc::UnboundedSender<Event>,
        device: &Device,
        patch: LightPatch,
        fallback: Option<LightPatch>,
    ) {
        let client = device.client.clone();
        let id = device.id().to_string();
        let events = events.clone();
        io.spawn(async move {
            let outcome = write_with_fallback(&client, &patch, fallback).await;
            let _ = events.send(Event::WriteDone { id, outcome });
        });
    }

    /// A write finished. Success re-renders from the canonical state in the
    /// response; failure becomes a per-device status message and nothing
    /// else.
    pub(crate) fn write_done(
        &self,
        registry: &mut DeviceRegistry,
        frontend: &mut dyn Frontend,
        discovering: bool,
        id: &str,
        outcome: Result<LightsEnvelope>,
    ) {
        match outcome {
            Ok(envelope) => {
                let Some(device) = registry.get_mut(id) else {
                    return;
                };
                if let Some(state) = envelope.first() {
                    device.apply_reported_state(state);
                    let view = device.view();
                    frontend.device_updated(&view);
                    frontend.status_changed(&registry.status_line(discovering));
                }
            }
            Err(err) => {
                let name = registry.get(id).map_or(id, Device::name).to_string();
                frontend.status_changed(&format!("Failed to update {name}: {err}"));
            }
        }
    }

    /// Kick off a full refresh of one device: accessory metadata
    /// (best-effort), then light state.
    pub(crate) fn refresh_device(&mut self, registry: &DeviceRegistry, id: &str) {
        let Some(device) = registry.get(id) else {
            return;
        };
        let client = device.client.clone();
        let id = id.to_string();
        let events = self.events.clone();
        self.io.spawn(async move {
            // Accessory info is missing on some firmware; its absence never
            // fails the refresh.
            let info = client.accessory_info().await.ok();
            let state = client.lights().await;
            let _ = events.send(Event::RefreshDone { id, info, state });
        });
    }

    /// A refresh finished. Metadata lands regardless; a state read failure
    /// only sets status text and leaves the device registered for the next
    /// poll.
    pub(crate) fn refresh_done(
        &self,
        registry: &mut DeviceRegistry,
        frontend: &mut dyn Frontend,
        discovering: bool,
        id: &str,
        info: Option<crate::api::AccessoryInfo>,
        state: Result<LightsEnvelope>,
    ) {
        let Some(device) = registry.get_mut(id) else {
            return;
        };
        let had_info = info.is_some();
        if let Some(info) = info {
            device.apply_accessory_info(info);
        }

        match state {
            Ok(envelope) => {
                if let Some(state) = envelope.first() {
                    device.apply_reported_state(state);
                }
                let view = device.view();
                frontend.device_updated(&view);
                frontend.status_changed(&registry.status_line(discovering));
            }
            Err(err) => {
                // The metadata half may still have landed; show it.
                if had_info {
                    let view = device.view();
                    frontend.device_updated(&view);
                }
                let name = registry.get(id).map_or(id, Device::name).to_string();
                frontend.status_changed(&format!("Failed to query {name}: {err}"));
            }
        }
    }

    /// Refresh every registered device.
    pub(crate) fn poll_all(&mut self, registry: &DeviceRegistry) {
        for id in registry.ids() {
            self.refresh_device(registry, &id);
        }
    }

    /// Cancel all per-device timers and abort in-flight I/O.
    pub(crate) fn teardown(&mut self, registry: &mut DeviceRegistry) {
        for device in registry.devices_mut() {
            device.cancel_pending();
        }
        self.io.abort_all();
    }
}

/// The synthesized full payload used when a device rejects brightness-only
/// patches: last known power and temperature (or safe defaults) plus the
/// requested brightness re-snapped to the coarser retry granularity.
fn fallback_payload(device: &Device, requested: u8) -> LightPatch {
    let step = fallback_step(device.brightness_max());
    let brightness = snap_to_step(i32::from(requested), step, 0, device.brightness_max());

    let mut patch = LightPatch::new();
    patch.on(device.state().map_or(true, |state| state.is_on()));
    patch.brightness(brightness);
    patch.temperature(device.state().map_or_else(
        || kelvin_to_wire(Kelvin::new(4000), device.temperature_unit()),
        |state| state.temperature,
    ));
    patch
}

/// Issue a patch; on an HTTP 404 against a brightness-only patch, retry
/// exactly once with the synthesized full payload. Everything else fails
/// as-is.
async fn write_with_fallback(
    client: &DeviceClient,
    patch: &LightPatch,
    fallback: Option<LightPatch>,
) -> Result<LightsEnvelope> {
    match client.set_lights(patch).await {
        Ok(envelope) => Ok(envelope),
        Err(err) if patch.is_brightness_only() && err.is_not_found() => match fallback {
            Some(full) => {
                debug!("brightness-only patch rejected with 404, retrying with full payload");
                client.set_lights(&full).await
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_http_client;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DeviceClient {
        let http = build_http_client(Duration::from_secs(2)).unwrap();
        DeviceClient::new(http, server.address().ip(), server.address().port())
    }

    fn envelope_json(on: u8, brightness: u8, temperature: u32) -> serde_json::Value {
        json!({
            "numberOfLights": 1,
            "lights": [{"on": on, "brightness": brightness, "temperature": temperature}]
        })
    }

    #[tokio::test]
    async fn test_brightness_only_404_retries_once_with_full_payload() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .and(body_json(json!({
                "numberOfLights": 1,
                "lights": [{"brightness": 40}]
            })))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .and(body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 40, "temperature": 250}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(envelope_json(1, 40, 250)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut patch = LightPatch::new();
        patch.brightness(40);
        let mut full = LightPatch::new();
        full.on(true).brightness(40).temperature(250);

        let envelope = write_with_fallback(&client, &patch, Some(full)).await.unwrap();
        assert_eq!(envelope.first().unwrap().brightness, 40);
    }

    #[tokio::test]
    async fn test_non_404_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut patch = LightPatch::new();
        patch.brightness(40);
        let mut full = LightPatch::new();
        full.on(true).brightness(40).temperature(250);

        let err = write_with_fallback(&client, &patch, Some(full)).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_404_on_mixed_patch_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut patch = LightPatch::new();
        patch.on(true).brightness(40);
        let mut full = LightPatch::new();
        full.on(true).brightness(40).temperature(250);

        let err = write_with_fallback(&client, &patch, Some(full)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
