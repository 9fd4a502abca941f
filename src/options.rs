//! Controller tuning knobs.

use std::time::Duration;

use crate::client::DeviceClient;

/// Everything tunable about discovery and synchronization.
///
/// The defaults match real Key Light hardware and home-network scale; hosts
/// embedding the controller can override individual fields.
///
/// # Examples
///
/// ```
/// use keylight_rs::Options;
///
/// let opts = Options {
///     poll_interval: std::time::Duration::from_secs(4),
///     ..Options::default()
/// };
/// assert_eq!(opts.device_port, 9123);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// DNS-SD service type announced by the devices.
    pub service_type: String,
    /// DNS-SD domain the devices announce in.
    pub service_domain: String,
    /// Port probed on scan candidates and used for discovered services
    /// announcing no port.
    pub device_port: u16,
    /// Whole-request timeout for device HTTP calls.
    pub http_timeout: Duration,
    /// Quiet window that coalesces a burst of slider edits into one write.
    pub debounce_window: Duration,
    /// Interval of the full-state reconciliation poll.
    pub poll_interval: Duration,
    /// How long after startup the status keeps reading "discovering" when
    /// nothing has been found yet.
    pub discovery_quiet_period: Duration,
    /// Hard cap on hosts swept per subnet.
    pub sweep_max_hosts: u16,
    /// Worker count for the subnet sweep.
    pub sweep_concurrency: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            service_type: "_elg._tcp".to_string(),
            service_domain: "local".to_string(),
            device_port: DeviceClient::DEFAULT_PORT,
            http_timeout: Duration::from_secs(2),
            debounce_window: Duration::from_millis(120),
            poll_interval: Duration::from_secs(8),
            discovery_quiet_period: Duration::from_secs(6),
            sweep_max_hosts: 512,
            sweep_concurrency: 24,
        }
    }
}
