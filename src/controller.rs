//! Controller lifecycle and the single event loop.
//!
//! Everything that mutates the registry funnels through one task: broker
//! callbacks, scan sinks, debounce timers, poll ticks, and completed I/O all
//! post events onto one channel, and the loop applies them in order. That
//! confinement is what makes the registry safe without per-device locks.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::api::{AccessoryInfo, LightsEnvelope};
use crate::broker::ServiceDiscoveryBroker;
use crate::bus::{MdnsServiceBus, ServiceBus};
use crate::client::{DeviceClient, build_http_client};
use crate::errors::Error;
use crate::options::Options;
use crate::registry::{DeviceInfo, DeviceRegistry, DeviceView, EnsureOutcome, WriteField};
use crate::scan::{self, CommandRunner, DiscoverySink, ProbeSession, TokioCommandRunner};
use crate::sync::StateSyncController;

type Result<T> = std::result::Result<T, Error>;

/// Field-level edit intents forwarded by a presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditIntent {
    /// Set power directly. Applied immediately, never debounced.
    Power(bool),
    /// Flip the last rendered power state. Applied immediately.
    TogglePower,
    /// Raw brightness slider position in [0, 1]. Debounced.
    BrightnessRatio(f64),
    /// Raw temperature slider position in [0, 1]. Debounced.
    TemperatureRatio(f64),
}

/// What a presentation layer implements to observe the controller.
///
/// Calls arrive on the controller's event-loop task. Implementations must
/// not forward a render back as an edit intent: re-rendering is how the
/// controller reports canonical device state, and echoing it would turn
/// every reconciliation read into a write.
pub trait Frontend: Send + 'static {
    /// The one-line aggregate status text changed.
    fn status_changed(&mut self, status: &str);
    /// A device entered the registry.
    fn device_added(&mut self, view: &DeviceView);
    /// A device's rendered state changed, optimistically or canonically.
    fn device_updated(&mut self, view: &DeviceView);
    /// A device left the registry.
    fn device_removed(&mut self, id: &str);
}

pub(crate) enum Event {
    Discovered(DeviceInfo),
    Lost(String),
    DiscoveryError(String),
    Edit {
        id: String,
        intent: EditIntent,
    },
    Refresh(String),
    WriteDue {
        id: String,
        field: WriteField,
        value: u32,
        seq: u64,
    },
    WriteDone {
        id: String,
        outcome: Result<LightsEnvelope>,
    },
    RefreshDone {
        id: String,
        info: Option<AccessoryInfo>,
        state: Result<LightsEnvelope>,
    },
    PollTick,
    QuietElapsed,
    Shutdown,
}

/// Clonable entry point for presentation layers to reach the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl ControllerHandle {
    /// Forward a user edit for one device.
    pub fn edit(&self, id: &str, intent: EditIntent) -> Result<()> {
        self.send(Event::Edit {
            id: id.to_string(),
            intent,
        })
    }

    /// Request an immediate full refresh of one device.
    pub fn refresh(&self, id: &str) -> Result<()> {
        self.send(Event::Refresh(id.to_string()))
    }

    /// Ask the controller to tear down.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Event::Shutdown)
    }

    fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::ControllerStopped)
    }
}

/// Discovers Key Lights and keeps them synchronized with a frontend.
///
/// The controller owns its whole lifecycle: [`start`](Self::start) spawns
/// the engine, [`stop`](Self::stop) tears it down (cancelling every timer
/// and in-flight request, and releasing the discovery bus). Dropping the
/// controller requests shutdown without waiting for it.
///
/// # Example
///
/// ```no_run
/// use keylight_rs::{DeviceView, EditIntent, KeyLightController, Options};
///
/// struct LogFrontend;
///
/// impl keylight_rs::Frontend for LogFrontend {
///     fn status_changed(&mut self, status: &str) {
///         println!("{status}");
///     }
///     fn device_added(&mut self, view: &DeviceView) {
///         println!("+ {} ({})", view.name, view.id);
///     }
///     fn device_updated(&mut self, view: &DeviceView) {
///         println!("  {}: {}% {}K", view.name, view.brightness_percent, view.kelvin);
///     }
///     fn device_removed(&mut self, id: &str) {
///         println!("- {id}");
///     }
/// }
///
/// # async fn run() -> Result<(), keylight_rs::Error> {
/// let controller = KeyLightController::start(Options::default(), LogFrontend)?;
/// let handle = controller.handle();
/// handle.edit("192.168.1.20:9123", EditIntent::BrightnessRatio(0.8))?;
/// controller.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct KeyLightController {
    handle: ControllerHandle,
    engine: Option<JoinHandle<()>>,
}

impl KeyLightController {
    /// Start against the system's mDNS bus and the real external tools.
    pub fn start<F: Frontend>(options: Options, frontend: F) -> Result<Self> {
        Self::start_with(
            options,
            frontend,
            MdnsServiceBus::new(),
            Arc::new(TokioCommandRunner),
        )
    }

    /// Start with explicit discovery backends.
    pub fn start_with<F, B>(
        options: Options,
        frontend: F,
        bus: B,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self>
    where
        F: Frontend,
        B: ServiceBus,
    {
        let http = build_http_client(options.http_timeout)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ControllerHandle {
            events: events_tx.clone(),
        };

        let broker = {
            let discovered = events_tx.clone();
            let removed = events_tx.clone();
            let errored = events_tx.clone();
            ServiceDiscoveryBroker::new(
                bus,
                &options.service_type,
                &options.service_domain,
                Box::new(move |info| {
                    let _ = discovered.send(Event::Discovered(info));
                }),
                Box::new(move |id| {
                    let _ = removed.send(Event::Lost(id));
                }),
                Box::new(move |message| {
                    let _ = errored.send(Event::DiscoveryError(message));
                }),
            )
        };

        let engine = tokio::spawn(engine_loop(
            options, frontend, broker, http, runner, events_tx, events_rx,
        ));
        Ok(KeyLightController {
            handle,
            engine: Some(engine),
        })
    }

    /// A handle for forwarding edits and requesting shutdown.
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Shut the engine down and wait for its teardown to finish.
    pub async fn stop(mut self) {
        let _ = self.handle.shutdown();
        if let Some(engine) = self.engine.take() {
            let _ = engine.await;
        }
    }
}

impl Drop for KeyLightController {
    fn drop(&mut self) {
        let _ = self.handle.shutdown();
    }
}

async fn engine_loop<F, B>(
    options: Options,
    mut frontend: F,
    mut broker: ServiceDiscoveryBroker<B>,
    http: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
    events_tx: mpsc::UnboundedSender<Event>,
    mut events_rx: mpsc::UnboundedReceiver<Event>,
) where
    F: Frontend,
    B: ServiceBus,
{
    let mut registry = DeviceRegistry::new();
    let mut sync = StateSyncController::new(events_tx.clone(), options.debounce_window);
    let mut discovering = true;
    frontend.status_changed(&registry.status_line(discovering));

    if let Err(err) = broker.start() {
        frontend.status_changed(&format!("Discovery error: {err}"));
    }

    let sink: DiscoverySink = {
        let tx = events_tx.clone();
        Arc::new(move |info| {
            let _ = tx.send(Event::Discovered(info));
        })
    };
    let session = ProbeSession::new(http.clone(), options.device_port, Arc::clone(&sink));

    let mut scans = JoinSet::new();
    {
        let runner = Arc::clone(&runner);
        let sink = Arc::clone(&sink);
        let service_type = options.service_type.clone();
        let domain = options.service_domain.clone();
        scans.spawn(async move {
            if let Err(err) =
                scan::passive_browse(runner.as_ref(), &service_type, &domain, &sink).await
            {
                debug!("passive browse failed: {err}");
            }
        });
    }
    {
        let runner = Arc::clone(&runner);
        let session = Arc::clone(&session);
        scans.spawn(async move {
            if let Err(err) = scan::neighbor_scan(runner.as_ref(), &session).await {
                debug!("neighbor scan failed: {err}");
            }
        });
    }
    {
        let runner = Arc::clone(&runner);
        let session = Arc::clone(&session);
        let max_hosts = options.sweep_max_hosts;
        let concurrency = options.sweep_concurrency;
        scans.spawn(async move {
            if let Err(err) =
                scan::subnet_sweep(runner.as_ref(), &session, max_hosts, concurrency).await
            {
                debug!("subnet sweep failed: {err}");
            }
        });
    }

    let mut quiet = Some({
        let tx = events_tx.clone();
        let period = options.discovery_quiet_period;
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            let _ = tx.send(Event::QuietElapsed);
        })
    });

    let poll = {
        let tx = events_tx.clone();
        let period = options.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Event::PollTick).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(event) = events_rx.recv().await {
        match event {
            Event::Discovered(info) => {
                let client = DeviceClient::new(http.clone(), info.address, info.port);
                let id = info.id.clone();
                let outcome = registry.ensure(info, client);

                // Any discovery while a device is known settles the status
                // early; the quiet timer only matters while nothing at all
                // has been found.
                if !registry.is_empty() {
                    discovering = false;
                    if let Some(quiet) = quiet.take() {
                        quiet.abort();
                    }
                }

                if outcome == EnsureOutcome::Inserted {
                    if let Some(device) = registry.get(&id) {
                        frontend.device_added(&device.view());
                    }
                    sync.refresh_device(&registry, &id);
                }
                frontend.status_changed(&registry.status_line(discovering));
            }
            Event::Lost(id) => {
                if registry.remove(&id).is_some() {
                    frontend.device_removed(&id);
                    frontend.status_changed(&registry.status_line(discovering));
                }
            }
            Event::DiscoveryError(message) => {
                frontend.status_changed(&format!("Discovery error: {message}"));
            }
            Event::Edit { id, intent } => {
                sync.handle_edit(&mut registry, &mut frontend, &id, intent);
            }
            Event::Refresh(id) => sync.refresh_device(&registry, &id),
            Event::WriteDue {
                id,
                field,
                value,
                seq,
            } => sync.write_due(&mut registry, &id, field, value, seq),
            Event::WriteDone { id, outcome } => {
                sync.write_done(&mut registry, &mut frontend, discovering, &id, outcome);
            }
            Event::RefreshDone { id, info, state } => {
                sync.refresh_done(&mut registry, &mut frontend, discovering, &id, info, state);
            }
            Event::PollTick => sync.poll_all(&registry),
            Event::QuietElapsed => {
                quiet = None;
                discovering = false;
                frontend.status_changed(&registry.status_line(discovering));
            }
            Event::Shutdown => break,
        }
    }

    poll.abort();
    if let Some(quiet) = quiet.take() {
        quiet.abort();
    }
    scans.abort_all();
    sync.teardown(&mut registry);
    broker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::scan::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A bus that never produces events; discovery flows through the
    /// scripted passive-browse output instead.
    struct NullBus;

    impl ServiceBus for NullBus {
        fn subscribe(
            &mut self,
            _service_type: &str,
            _domain: &str,
        ) -> Result<mpsc::UnboundedReceiver<BusEvent>> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }

        fn unsubscribe(&mut self) {}
    }

    struct ScriptedRunner {
        browse: String,
    }

    impl CommandRunner for ScriptedRunner {
        fn run<'a>(
            &'a self,
            program: &'a str,
            _args: &'a [&'a str],
        ) -> BoxFuture<'a, std::result::Result<String, Error>> {
            Box::pin(async move {
                if program == "avahi-browse" {
                    Ok(self.browse.clone())
                } else {
                    Ok(String::new())
                }
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingFrontend {
        statuses: Arc<Mutex<Vec<String>>>,
        added: Arc<Mutex<Vec<String>>>,
        updates: Arc<Mutex<Vec<DeviceView>>>,
    }

    impl Frontend for RecordingFrontend {
        fn status_changed(&mut self, status: &str) {
            self.statuses.lock().unwrap().push(status.to_string());
        }
        fn device_added(&mut self, view: &DeviceView) {
            self.added.lock().unwrap().push(view.id.clone());
        }
        fn device_updated(&mut self, view: &DeviceView) {
            self.updates.lock().unwrap().push(view.clone());
        }
        fn device_removed(&mut self, _id: &str) {}
    }

    async fn mock_device() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elgato/accessory-info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "productName": "Elgato Key Light",
                "displayName": "Desk Key Light",
                "power-info": {"maximumBrightness": 100}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/elgato/lights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 20, "temperature": 250}]
            })))
            .mount(&server)
            .await;
        server
    }

    fn test_options() -> Options {
        Options {
            debounce_window: Duration::from_millis(100),
            poll_interval: Duration::from_secs(120),
            discovery_quiet_period: Duration::from_secs(60),
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn test_discovery_through_passive_browse_adds_and_refreshes_device() {
        let server = mock_device().await;
        let device_id = server.address().to_string();
        let runner = ScriptedRunner {
            browse: format!(
                "=;lo;IPv4;Key Light;_elg._tcp;local;kl.local;{};{};\"md=1\"\n",
                server.address().ip(),
                server.address().port()
            ),
        };

        let frontend = RecordingFrontend::default();
        let observed = frontend.clone();
        let controller =
            KeyLightController::start_with(test_options(), frontend, NullBus, Arc::new(runner))
                .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(observed.added.lock().unwrap().as_slice(), [device_id]);
        {
            let updates = observed.updates.lock().unwrap();
            let last = updates.last().expect("refresh should have rendered");
            assert_eq!(last.name, "Desk Key Light");
            assert_eq!(last.brightness_percent, 20);
            assert_eq!(last.kelvin, 4000);
        }
        assert!(
            observed
                .statuses
                .lock()
                .unwrap()
                .contains(&"1 device found".to_string())
        );

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_overlapping_brightness_edits_coalesce_into_one_write() {
        let server = mock_device().await;
        let device_id = server.address().to_string();

        // Only the later edit's value may reach the device, exactly once.
        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .and(body_json(json!({
                "numberOfLights": 1,
                "lights": [{"brightness": 50}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 50, "temperature": 250}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let runner = ScriptedRunner {
            browse: format!(
                "=;lo;IPv4;Key Light;_elg._tcp;local;kl.local;{};{};\"md=1\"\n",
                server.address().ip(),
                server.address().port()
            ),
        };

        let frontend = RecordingFrontend::default();
        let observed = frontend.clone();
        let controller =
            KeyLightController::start_with(test_options(), frontend, NullBus, Arc::new(runner))
                .unwrap();
        let handle = controller.handle();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!observed.added.lock().unwrap().is_empty());

        handle
            .edit(&device_id, EditIntent::BrightnessRatio(0.3))
            .unwrap();
        handle
            .edit(&device_id, EditIntent::BrightnessRatio(0.52))
            .unwrap();

        // Let the debounce window close and the single write round-trip.
        tokio::time::sleep(Duration::from_millis(400)).await;

        // The optimistic renders happened for both edits; the canonical
        // render carries the device's answer.
        let updates = observed.updates.lock().unwrap();
        assert_eq!(updates.last().unwrap().brightness_percent, 50);
        drop(updates);

        controller.stop().await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_clean_without_devices() {
        let runner = ScriptedRunner {
            browse: String::new(),
        };
        let frontend = RecordingFrontend::default();
        let observed = frontend.clone();
        let controller =
            KeyLightController::start_with(test_options(), frontend, NullBus, Arc::new(runner))
                .unwrap();
        let handle = controller.handle();

        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.stop().await;

        assert_eq!(
            observed.statuses.lock().unwrap().first().unwrap(),
            "Discovering Key Lights..."
        );
        // The engine is gone; the handle must say so.
        assert!(matches!(
            handle.refresh("192.168.1.20:9123"),
            Err(Error::ControllerStopped)
        ));
    }
}
