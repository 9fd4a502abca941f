//! Redundant local-network scan strategies.
//!
//! Each strategy is a one-shot sweep feeding the same discovery sink. They
//! are deliberately overlapping rather than layered: any one of them finding
//! a device is enough, and running them together covers networks where
//! multicast announcements are filtered.

use std::collections::HashSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use log::debug;
use tokio::process::Command;

use crate::client::DeviceClient;
use crate::errors::Error;
use crate::registry::DeviceInfo;

type Result<T> = std::result::Result<T, Error>;

/// Shortest prefix worth sweeping; anything wider than ~510 hosts is
/// refused outright.
const MIN_SWEEP_PREFIX: u8 = 23;

/// Record marker opening each resolved line of parseable browse output.
const BROWSE_RECORD_MARKER: &str = "=;";

/// A boxed future type for object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receives every device record a strategy produces.
pub type DiscoverySink = Arc<dyn Fn(DeviceInfo) + Send + Sync + 'static>;

/// Runs an external tool and captures its stdout.
///
/// The strategies go through this seam so their parsers can be exercised on
/// canned output without spawning processes.
pub trait CommandRunner: Send + Sync + 'static {
    fn run<'a>(&'a self, program: &'a str, args: &'a [&'a str]) -> BoxFuture<'a, Result<String>>;
}

/// [`CommandRunner`] backed by `tokio::process`.
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [&'a str]) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|err| Error::command(program, err))?;
            if !output.status.success() {
                return Err(Error::command(
                    program,
                    std::io::Error::other(format!("exit status {}", output.status)),
                ));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                debug!("{program} stderr: {}", stderr.trim());
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}

/// Shared per-session probe state: the HTTP client, the sink, and the set
/// of addresses already probed so no strategy probes an address twice.
pub struct ProbeSession {
    http: reqwest::Client,
    port: u16,
    sink: DiscoverySink,
    probed: Mutex<HashSet<Ipv4Addr>>,
}

impl ProbeSession {
    pub fn new(http: reqwest::Client, port: u16, sink: DiscoverySink) -> Arc<Self> {
        Arc::new(ProbeSession {
            http,
            port,
            sink,
            probed: Mutex::new(HashSet::new()),
        })
    }

    /// Probe one candidate address.
    ///
    /// A candidate counts as a device only when its accessory info names a
    /// known product; arbitrary hosts with the port open stay silent. Every
    /// failure mode (timeout, refused, non-2xx, non-match) is ignored, since
    /// nearly all scanned addresses are not lights.
    pub async fn probe(&self, address: Ipv4Addr) {
        if !self.probed.lock().unwrap().insert(address) {
            return;
        }

        let client = DeviceClient::new(self.http.clone(), IpAddr::V4(address), self.port);
        let Ok(info) = client.accessory_info().await else {
            return;
        };

        let product = info.product_name.as_deref().unwrap_or_default().to_lowercase();
        if !product.contains("key light") && !product.contains("elgato") {
            return;
        }

        let name = info
            .preferred_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Key Light ({address})"));
        (self.sink)(DeviceInfo::new(
            IpAddr::V4(address),
            self.port,
            &name,
            "",
        ));
    }
}

/// Parse `avahi-browse -rtp` style output and forward matching records.
///
/// Confirmation path for when this process's own multicast browsing misses
/// announcements; the tool's resolved records are trusted without a probe.
pub async fn passive_browse(
    runner: &dyn CommandRunner,
    service_type: &str,
    domain: &str,
    sink: &DiscoverySink,
) -> Result<()> {
    let args = ["-rtp", service_type];
    let output = runner.run("avahi-browse", &args).await?;
    for info in parse_browse_records(&output, service_type, domain) {
        sink(info);
    }
    Ok(())
}

/// Probe every address in the kernel's IPv4 neighbor table.
pub async fn neighbor_scan(runner: &dyn CommandRunner, session: &ProbeSession) -> Result<()> {
    let args = ["-4", "neigh", "show"];
    let output = runner.run("ip", &args).await?;
    let candidates = parse_neighbor_addresses(&output);
    debug!("neighbor scan probing {} candidates", candidates.len());
    join_all(candidates.into_iter().map(|ip| session.probe(ip))).await;
    Ok(())
}

/// Probe the host range of every globally-scoped local subnet, with a
/// bounded worker pool.
pub async fn subnet_sweep(
    runner: &dyn CommandRunner,
    session: &ProbeSession,
    max_hosts: u16,
    concurrency: usize,
) -> Result<()> {
    let args = ["-4", "-o", "addr", "show", "scope", "global"];
    let output = runner.run("ip", &args).await?;

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for (local, prefix) in parse_global_addresses(&output) {
        for ip in sweep_candidates(local, prefix, max_hosts) {
            if seen.insert(ip) {
                candidates.push(ip);
            }
        }
    }

    debug!("subnet sweep probing {} candidates", candidates.len());
    stream::iter(candidates)
        .for_each_concurrent(concurrency.max(1), |ip| session.probe(ip))
        .await;
    Ok(())
}

/// Extract device records from parseable browse output. A line qualifies
/// only with the resolved-record marker, at least nine `;`-fields, and the
/// expected service type and domain.
fn parse_browse_records(output: &str, service_type: &str, domain: &str) -> Vec<DeviceInfo> {
    let mut records = Vec::new();
    for line in output.lines() {
        // =;iface;proto;name;_elg._tcp;local;host.local;192.168.x.x;9123;"txt"
        if !line.starts_with(BROWSE_RECORD_MARKER) {
            continue;
        }
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 9 {
            continue;
        }
        let (name, host) = (fields[3], fields[6]);
        if fields[4] != service_type || fields[5] != domain {
            continue;
        }
        let Ok(address) = IpAddr::from_str(fields[7]) else {
            continue;
        };
        let Ok(port) = fields[8].parse::<u16>() else {
            continue;
        };
        if port == 0 {
            continue;
        }
        records.push(DeviceInfo::new(address, port, name, host));
    }
    records
}

/// First whitespace token of each line, kept when it is a dotted-quad
/// IPv4 address.
fn parse_neighbor_addresses(output: &str) -> HashSet<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| Ipv4Addr::from_str(token).ok())
        .collect()
}

/// Extract `inet <ip>/<prefix>` pairs from one-line address listings.
fn parse_global_addresses(output: &str) -> Vec<(Ipv4Addr, u8)> {
    let mut pairs = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "inet" {
                continue;
            }
            let Some(cidr) = tokens.next() else {
                break;
            };
            let Some((ip, prefix)) = cidr.split_once('/') else {
                continue;
            };
            if let (Ok(ip), Ok(prefix)) = (Ipv4Addr::from_str(ip), prefix.parse::<u8>()) {
                if prefix <= 32 {
                    pairs.push((ip, prefix));
                }
            }
        }
    }
    pairs
}

/// The usable host addresses of `local`'s subnet: `[network+1, network+n]`
/// where `n = min(2^(32-prefix) - 2, max_hosts)`, never the network or
/// broadcast address. Prefixes shorter than 23 bits are refused entirely.
fn expand_subnet_hosts(local: Ipv4Addr, prefix: u8, max_hosts: u16) -> Vec<Ipv4Addr> {
    if !(MIN_SWEEP_PREFIX..31).contains(&prefix) {
        return Vec::new();
    }

    let host_bits = 32 - u32::from(prefix);
    let subnet_hosts = (1u32 << host_bits) - 2;
    let host_count = subnet_hosts.min(u32::from(max_hosts));
    let network = u32::from(local) & (u32::MAX << host_bits);

    (1..=host_count).map(|i| Ipv4Addr::from(network + i)).collect()
}

/// Sweep candidates for one local address: its subnet's hosts minus itself.
fn sweep_candidates(local: Ipv4Addr, prefix: u8, max_hosts: u16) -> Vec<Ipv4Addr> {
    expand_subnet_hosts(local, prefix, max_hosts)
        .into_iter()
        .filter(|ip| *ip != local)
        .collect()
}
