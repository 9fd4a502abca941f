//! Service-discovery bus access.
//!
//! The broker consumes discovery through the [`ServiceBus`] trait so its
//! bookkeeping can be exercised against a scripted bus; [`MdnsServiceBus`]
//! is the production backend over the system's multicast DNS.

use std::fmt;
use std::net::IpAddr;

use log::{debug, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Identity of one announced service instance.
///
/// Distinct from a device id: a service is known by name before it resolves
/// to an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    name: String,
    service_type: String,
    domain: String,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.name, self.service_type, self.domain)
    }
}

/// A service instance seen on the bus, not yet resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAnnouncement {
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

impl ServiceAnnouncement {
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            name: self.name.clone(),
            service_type: self.service_type.clone(),
            domain: self.domain.clone(),
        }
    }
}

/// An announcement that resolved to a concrete network location.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub announcement: ServiceAnnouncement,
    pub host: String,
    pub address: IpAddr,
    pub port: u16,
}

/// Events a bus subscription yields.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A service instance was announced.
    Announced(ServiceAnnouncement),
    /// An announced instance resolved to an address and port.
    Resolved(ResolvedService),
    /// An instance withdrew its announcement.
    Withdrawn(ServiceAnnouncement),
    /// Resolution failed for an instance, or the bus reported an error.
    Failure(String),
}

/// A browsable service-discovery bus.
///
/// `subscribe` starts one browse and hands back its event stream;
/// `unsubscribe` releases the browse and root handles deterministically.
/// Dropping a bus without unsubscribing leaks the subscription on buses
/// that keep server-side state, so implementations release on `Drop` too.
pub trait ServiceBus: Send + 'static {
    /// Begin browsing for `service_type` in `domain`. Events arrive on the
    /// returned channel until `unsubscribe` closes it.
    fn subscribe(
        &mut self,
        service_type: &str,
        domain: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusEvent>>;

    /// Release every handle held by the current subscription. Safe to call
    /// repeatedly, and before `subscribe`.
    fn unsubscribe(&mut self);
}

/// [`ServiceBus`] over multicast DNS.
#[derive(Default)]
pub struct MdnsServiceBus {
    daemon: Option<ServiceDaemon>,
    browse_type: Option<String>,
    pump: Option<JoinHandle<()>>,
}

impl MdnsServiceBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceBus for MdnsServiceBus {
    fn subscribe(
        &mut self,
        service_type: &str,
        domain: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusEvent>> {
        self.unsubscribe();

        let daemon = ServiceDaemon::new()?;
        let browse_type = format!("{service_type}.{domain}.");
        let events = daemon.browse(&browse_type)?;
        let (tx, rx) = mpsc::unbounded_channel();

        // The daemon resolves announcements on its own, so its one event
        // stream carries announce, resolve, and withdraw traffic; the pump
        // remaps it onto the bus contract.
        let pump = tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let mapped = match event {
                    ServiceEvent::ServiceFound(ty, fullname) => {
                        parse_fullname(&ty, &fullname).map(BusEvent::Announced)
                    }
                    ServiceEvent::ServiceResolved(info) => map_resolved(&info),
                    ServiceEvent::ServiceRemoved(ty, fullname) => {
                        parse_fullname(&ty, &fullname).map(BusEvent::Withdrawn)
                    }
                    ServiceEvent::SearchStarted(_) | ServiceEvent::SearchStopped(_) => None,
                };
                if let Some(mapped) = mapped {
                    if tx.send(mapped).is_err() {
                        break;
                    }
                }
            }
            debug!("mdns event pump ended");
        });

        self.daemon = Some(daemon);
        self.browse_type = Some(browse_type);
        self.pump = Some(pump);
        Ok(rx)
    }

    fn unsubscribe(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(daemon) = self.daemon.take() {
            if let Some(browse_type) = self.browse_type.take() {
                if let Err(err) = daemon.stop_browse(&browse_type) {
                    warn!("failed to stop mdns browse for {browse_type}: {err}");
                }
            }
            if let Err(err) = daemon.shutdown() {
                warn!("failed to shut down mdns daemon: {err}");
            }
        }
        self.browse_type = None;
    }
}

impl Drop for MdnsServiceBus {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn map_resolved(info: &ServiceInfo) -> Option<BusEvent> {
    let announcement = parse_fullname(info.get_type(), info.get_fullname())?;
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;
    Some(BusEvent::Resolved(ResolvedService {
        announcement,
        host: info.get_hostname().to_string(),
        address,
        port: info.get_port(),
    }))
}

/// Split a browse type like `_elg._tcp.local.` and an instance fullname like
/// `Key Light Left._elg._tcp.local.` into announcement parts.
fn parse_fullname(ty: &str, fullname: &str) -> Option<ServiceAnnouncement> {
    let trimmed_ty = ty.trim_end_matches('.');
    let mut labels = trimmed_ty.split('.');
    let service = labels.next()?;
    let protocol = labels.next()?;
    let domain = labels.collect::<Vec<_>>().join(".");
    if !service.starts_with('_') || !protocol.starts_with('_') || domain.is_empty() {
        return None;
    }

    let name = fullname
        .strip_suffix(ty)
        .or_else(|| fullname.strip_suffix(trimmed_ty))?
        .trim_end_matches('.');
    if name.is_empty() {
        return None;
    }

    Some(ServiceAnnouncement {
        name: name.to_string(),
        service_type: format!("{service}.{protocol}"),
        domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fullname() {
        let announcement =
            parse_fullname("_elg._tcp.local.", "Key Light Left._elg._tcp.local.").unwrap();
        assert_eq!(announcement.name, "Key Light Left");
        assert_eq!(announcement.service_type, "_elg._tcp");
        assert_eq!(announcement.domain, "local");
        assert_eq!(
            announcement.key().to_string(),
            "Key Light Left::_elg._tcp::local"
        );
    }

    #[test]
    fn test_parse_fullname_rejects_malformed() {
        assert!(parse_fullname("_elg._tcp.local.", "_elg._tcp.local.").is_none());
        assert!(parse_fullname("elg.tcp.local.", "x.elg.tcp.local.").is_none());
        assert!(parse_fullname("_elg._tcp.", "x._elg._tcp.").is_none());
    }
}
