//! # keylight_rs
//!
//! An async Rust library for discovering and controlling Elgato Key Lights
//! over their local HTTP API.
//!
//! This crate finds Key Light devices on your network through several
//! **redundant discovery strategies** and keeps their power, brightness, and
//! color temperature synchronized between a presentation layer of your
//! choice and the devices themselves.
//!
//! ## Quick Start
//!
//! ```ignore
//! use keylight_rs::{EditIntent, Frontend, KeyLightController, Options};
//!
//! struct MyUi;
//! impl Frontend for MyUi {
//!     // render devices, show status text...
//!     # fn status_changed(&mut self, _: &str) {}
//!     # fn device_added(&mut self, _: &keylight_rs::DeviceView) {}
//!     # fn device_updated(&mut self, _: &keylight_rs::DeviceView) {}
//!     # fn device_removed(&mut self, _: &str) {}
//! }
//!
//! let controller = KeyLightController::start(Options::default(), MyUi)?;
//! let handle = controller.handle();
//!
//! // Forward raw slider input; the controller snaps, debounces, and writes.
//! handle.edit("192.168.1.20:9123", EditIntent::BrightnessRatio(0.8))?;
//! ```
//!
//! ## Discovery
//!
//! Four independent paths feed one deduplicated registry, so devices are
//! found even where multicast announcements are filtered:
//!
//! - **mDNS browsing** of `_elg._tcp` through the system's multicast DNS
//!   ([`MdnsServiceBus`](bus::MdnsServiceBus))
//! - **Passive browse** via the `avahi-browse` tool as a confirmation path
//! - **Neighbor scan** probing the kernel's ARP cache
//! - **Subnet sweep** probing the local subnets, bounded and capped
//!
//! Probes only accept hosts whose accessory info names a known product, so
//! sweeping a subnet does not mistake other HTTP servers for lights.
//!
//! ## Synchronization
//!
//! User edits arrive as raw slider ratios and are rendered optimistically,
//! debounced per field, validated against each device's own limits, and
//! written as partial patches. The device's response is authoritative and
//! re-renders the canonical state. A periodic poll reconciles out-of-band
//! changes such as the physical power button. Firmware that rejects
//! brightness-only patches with HTTP 404 gets one retry with a full payload.
//!
//! ## Communication
//!
//! Devices speak plain unauthenticated HTTP on port 9123 (by design of the
//! hardware); the library talks to `GET`/`PUT /elgato/lights` and
//! `GET /elgato/accessory-info`. Some firmware reports color temperature in
//! mired and some in Kelvin; the unit is inferred from observed values and
//! writes follow whatever the device last reported.

mod api;
mod broker;
pub mod bus;
mod client;
mod controller;
mod errors;
mod options;
mod registry;
pub mod scan;
mod sync;
mod types;

// Re-export public API
pub use api::{AccessoryInfo, LightPatch, LightState, LightsEnvelope, PowerInfo};
pub use broker::{
    DiscoveredCallback, ErrorCallback, RemovedCallback, ServiceDiscoveryBroker,
};
pub use client::{DeviceClient, build_http_client};
pub use controller::{ControllerHandle, EditIntent, Frontend, KeyLightController};
pub use errors::Error;
pub use options::Options;
pub use registry::{Device, DeviceInfo, DeviceRegistry, DeviceView, EnsureOutcome, WriteField};
pub use types::{
    BRIGHTNESS_MAX, DEFAULT_DEVICE_BRIGHTNESS_MAX, Kelvin, Mired, Ratio, Rgb,
    TemperatureReading, TemperatureUnit, brightness_from_ratio, brightness_percent,
    fallback_step, kelvin_to_wire, slider_step, snap_to_step,
};
