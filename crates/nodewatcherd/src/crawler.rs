//! Interface crawler - statistics snapshot and neighbor census per interface
//!
//! One crawl visits every interface once, in name order with the client
//! interface forced first:
//!
//! ```text
//! skip lo / down ──▶ snapshot stats ──▶ has L2 address? ──no──▶ next
//!                                            │ yes
//!                                            ▼
//!                     read neighbors ──▶ solicit stale link-local ──▶ close session
//!                                                                        │
//!                     count distinct reachable MACs ◀── re-read neighbors
//! ```
//!
//! Any kernel or socket failure aborts the whole crawl; a partial snapshot
//! is never handed out.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Interface statistics and client census
//! - SI-4: System Monitoring - Reachability confirmed by active probing

use crate::error::Result;
use crate::ndp::{ProbeFactory, ProbeSession};
use crate::netlink::{LinkSource, NeighborTable};
use crate::types::{InterfaceInfo, MacAddress};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

/// Solicitation window per interface
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Name the client interface is reported under when renaming is enabled
pub const RENAMED_CLIENT_INTERFACE: &str = "br-client";

const LOOPBACK_NAME: &str = "lo";

/// Statistics recorded for every interface that is up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStats {
    pub name: String,
    pub mtu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<MacAddress>,
    pub traffic_rx: u64,
    pub traffic_tx: u64,
}

impl From<&InterfaceInfo> for InterfaceStats {
    fn from(info: &InterfaceInfo) -> Self {
        Self {
            name: info.name.clone(),
            mtu: info.mtu,
            mac_addr: info.mac,
            traffic_rx: info.rx_bytes,
            traffic_tx: info.tx_bytes,
        }
    }
}

/// Reachable neighbor count on one layer-2 interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCount {
    pub interface: String,
    pub count: usize,
}

/// Finished result of one crawl
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSnapshot {
    pub interfaces: Vec<InterfaceStats>,
    pub clients: Vec<ClientCount>,
    pub client_total: usize,
}

/// Accumulates per-interface records in visiting order
#[derive(Debug, Default)]
pub struct CrawlBuilder {
    interfaces: Vec<InterfaceStats>,
    clients: Vec<ClientCount>,
    client_total: usize,
}

impl CrawlBuilder {
    pub fn push_interface(&mut self, stats: InterfaceStats) {
        self.interfaces.push(stats);
    }

    pub fn push_clients(&mut self, interface: &str, count: usize) {
        self.client_total += count;
        self.clients.push(ClientCount {
            interface: interface.to_string(),
            count,
        });
    }

    pub fn finish(self) -> CrawlSnapshot {
        CrawlSnapshot {
            interfaces: self.interfaces,
            clients: self.clients,
            client_total: self.client_total,
        }
    }
}

/// Crawl tuning taken from the configuration
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub client_interface: String,
    pub rename_client_interface: bool,
    pub probe_timeout: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            client_interface: RENAMED_CLIENT_INTERFACE.to_string(),
            rename_client_interface: false,
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

/// Sort by name with `client` first
pub fn order_links(links: &mut [InterfaceInfo], client: &str) {
    links.sort_by(|a, b| match (a.name == client, b.name == client) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Walks the kernel's interfaces and runs the neighbor census
pub struct Crawler<K, F> {
    kernel: K,
    probes: F,
    options: CrawlOptions,
}

impl<K, F> Crawler<K, F>
where
    K: LinkSource + NeighborTable,
    F: ProbeFactory,
{
    pub fn new(kernel: K, probes: F, options: CrawlOptions) -> Self {
        Self {
            kernel,
            probes,
            options,
        }
    }

    /// Run one crawl over all interfaces
    #[instrument(skip(self))]
    pub fn crawl(&mut self) -> Result<CrawlSnapshot> {
        let mut links = self.kernel.list_links()?;
        order_links(&mut links, &self.options.client_interface);

        if self.options.rename_client_interface {
            if let Some(first) = links.first_mut() {
                if first.name == self.options.client_interface {
                    first.name = RENAMED_CLIENT_INTERFACE.to_string();
                }
            }
        }

        let mut builder = CrawlBuilder::default();
        for link in &links {
            if link.loopback || link.name == LOOPBACK_NAME || !link.up {
                trace!(interface = %link.name, up = link.up, "Skipping interface");
                continue;
            }

            builder.push_interface(InterfaceStats::from(link));

            // Solicitations need a link-layer identity to embed
            if !link.has_link_layer_address() {
                trace!(interface = %link.name, "No link-layer address, not probing");
                continue;
            }

            let count = self.census(link)?;
            builder.push_clients(&link.name, count);
        }

        let snapshot = builder.finish();
        info!(
            interfaces = snapshot.interfaces.len(),
            clients = snapshot.client_total,
            "Crawl complete"
        );
        Ok(snapshot)
    }

    /// Probe stale link-local neighbors, then count distinct reachable MACs
    fn census(&mut self, link: &InterfaceInfo) -> Result<usize> {
        let candidates: Vec<IpAddr> = self
            .kernel
            .list_neighbors(link.index)?
            .into_iter()
            .filter(|n| n.is_probe_candidate())
            .map(|n| n.ip)
            .collect();

        self.probe(link, &candidates)?;

        let reachable: BTreeSet<MacAddress> = self
            .kernel
            .list_neighbors(link.index)?
            .into_iter()
            .filter(|n| n.state.is_reachable())
            .filter_map(|n| n.mac)
            .collect();

        debug!(
            interface = %link.name,
            candidates = candidates.len(),
            reachable = reachable.len(),
            "Neighbor census"
        );
        Ok(reachable.len())
    }

    /// The session is closed whether or not the solicitation succeeded
    fn probe(&self, link: &InterfaceInfo, candidates: &[IpAddr]) -> Result<()> {
        let mut session = self.probes.open()?;
        let solicited = session.solicit(self.options.probe_timeout, link, candidates);
        let closed = session.close();

        let replies = solicited?;
        closed?;

        trace!(interface = %link.name, replies = replies.len(), "Probe session finished");
        Ok(())
    }
}
