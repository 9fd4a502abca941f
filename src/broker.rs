//! Bus-driven service discovery.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::task::JoinHandle;

use crate::bus::{BusEvent, ServiceBus, ServiceKey};
use crate::errors::Error;
use crate::registry::DeviceInfo;

type Result<T> = std::result::Result<T, Error>;

pub type DiscoveredCallback = Box<dyn Fn(DeviceInfo) + Send + Sync + 'static>;
pub type RemovedCallback = Box<dyn Fn(String) + Send + Sync + 'static>;
pub type ErrorCallback = Box<dyn Fn(String) + Send + Sync + 'static>;

struct Callbacks {
    on_discovered: DiscoveredCallback,
    on_removed: RemovedCallback,
    on_error: ErrorCallback,
}

#[derive(Default)]
struct Book {
    /// Keys announced but not yet resolved. A key in here has an active
    /// resolution; repeat announcements for it are ignored.
    resolving: HashSet<ServiceKey>,
    /// Keys that resolved, mapped to the device id their resolution produced
    /// so a later withdrawal can name the device to remove.
    resolved: HashMap<ServiceKey, String>,
}

/// Tracks service announcements on a [`ServiceBus`] and turns them into
/// device discovered/removed callbacks.
///
/// `Idle` until [`start`](Self::start) subscribes the bus; a setup failure
/// returns the error and leaves the broker `Idle`. [`stop`](Self::stop) is
/// idempotent and safe before `start`: it clears the per-key bookkeeping,
/// then releases the bus subscription handles.
pub struct ServiceDiscoveryBroker<B: ServiceBus> {
    bus: B,
    service_type: String,
    domain: String,
    callbacks: Arc<Callbacks>,
    book: Arc<Mutex<Book>>,
    drain: Option<JoinHandle<()>>,
}

impl<B: ServiceBus> ServiceDiscoveryBroker<B> {
    pub fn new(
        bus: B,
        service_type: &str,
        domain: &str,
        on_discovered: DiscoveredCallback,
        on_removed: RemovedCallback,
        on_error: ErrorCallback,
    ) -> Self {
        ServiceDiscoveryBroker {
            bus,
            service_type: service_type.to_string(),
            domain: domain.to_string(),
            callbacks: Arc::new(Callbacks {
                on_discovered,
                on_removed,
                on_error,
            }),
            book: Arc::new(Mutex::new(Book::default())),
            drain: None,
        }
    }

    /// Begin browsing. Any prior subscription is released first.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        let mut events = self.bus.subscribe(&self.service_type, &self.domain)?;
        let callbacks = Arc::clone(&self.callbacks);
        let book = Arc::clone(&self.book);

        self.drain = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    BusEvent::Announced(announcement) => {
                        let key = announcement.key();
                        let mut book = book.lock().unwrap();
                        if book.resolving.contains(&key) || book.resolved.contains_key(&key) {
                            debug!("ignoring duplicate announcement for {key}");
                            continue;
                        }
                        book.resolving.insert(key);
                    }
                    BusEvent::Resolved(service) => {
                        let key = service.announcement.key();
                        let id = SocketAddr::new(service.address, service.port).to_string();
                        {
                            let mut book = book.lock().unwrap();
                            book.resolving.remove(&key);
                            book.resolved.insert(key, id.clone());
                        }
                        (callbacks.on_discovered)(DeviceInfo {
                            id,
                            address: service.address,
                            port: service.port,
                            name: service.announcement.name,
                            host: service.host,
                        });
                    }
                    BusEvent::Withdrawn(announcement) => {
                        let key = announcement.key();
                        let id = {
                            let mut book = book.lock().unwrap();
                            book.resolving.remove(&key);
                            book.resolved.remove(&key)
                        };
                        if let Some(id) = id {
                            (callbacks.on_removed)(id);
                        }
                    }
                    BusEvent::Failure(message) => {
                        (callbacks.on_error)(format!("resolver failure: {message}"));
                    }
                }
            }
        }));
        Ok(())
    }

    /// Release the subscription and forget every tracked key.
    pub fn stop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        {
            let mut book = self.book.lock().unwrap();
            book.resolving.clear();
            book.resolved.clear();
        }
        self.bus.unsubscribe();
    }
}

impl<B: ServiceBus> Drop for ServiceDiscoveryBroker<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
