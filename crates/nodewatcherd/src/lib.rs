//! Node-health probe for mesh-network gateways
//!
//! This crate implements nodewatcherd: it censuses the reachable layer-2
//! neighbors on every interface with active IPv6 Neighbor Discovery,
//! gathers link, host and routing-daemon state, and pushes one report per
//! cycle to the monitoring server with exponential-backoff retry.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Raw ICMPv6 sockets require CAP_NET_RAW |
//! | AU-3 | Content of Audit Records | Structured logging with phase and attempt |
//! | CM-6 | Configuration Settings | Command line layered over a TOML file |
//! | CM-8 | System Component Inventory | Per-interface neighbor census |
//! | IA-3 | Device Identification | MAC address tracking |
//! | SC-8 | Transmission Confidentiality | HTTPS delivery via rustls |
//! | SI-4 | System Monitoring | Periodic node health reports |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+     +------------------+
//! |  Linux Kernel    |     |   nodewatcherd   |     |   Monitoring     |
//! |                  |     |                  |     |                  |
//! |  RTM_GETLINK     |---->|   Crawler        |     |                  |
//! |  RTM_GETNEIGH    |<--->|     |  NdpProber |     |                  |
//! |  ICMPv6 NS/NA    |<--->|     v            |     |                  |
//! |  /proc           |---->|   Report         |     |                  |
//! +------------------+     |     |            |     |                  |
//! +------------------+     |     v            |     |                  |
//! |  babeld / bird   |---->|   Delivery       |---->|  HTTPS POST      |
//! +------------------+     +------------------+     +------------------+
//! ```

pub mod config;
pub mod crawler;
pub mod delivery;
pub mod error;
pub mod ndp;
pub mod netlink;
pub mod report;
pub mod routing;
pub mod sysinfo;
pub mod types;

pub use config::{Cli, Config, FileConfig, NodeIdentity};
pub use crawler::{CrawlOptions, CrawlSnapshot, Crawler};
pub use delivery::{
    CycleOutcome, DeliveryPipeline, HttpSender, NodeGatherer, ReportSender, ReportSource,
    RetryPolicy,
};
pub use error::{NodewatcherError, Result};
pub use ndp::{NdpProber, ProbeFactory, ProbeSession, RawProbeFactory};
pub use netlink::{LinkSource, NeighborTable, NetlinkSocket};
pub use report::{Report, encode_payload};
pub use routing::{RoutingConfig, RoutingInfo};
pub use sysinfo::SystemSnapshot;
pub use types::{InterfaceInfo, MacAddress, NeighborEntry, NeighborState};
