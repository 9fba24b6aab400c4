//! Core types shared by the crawler, the prober and the report
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Interfaces and neighbors as network components
//! - SI-4: System Monitoring - Neighbor reachability tracking

use serde::{Serialize, Serializer};
use std::net::{IpAddr, Ipv6Addr};

/// MAC address representation
///
/// # NIST Controls
/// - IA-3: Device Identification - MAC addresses identify neighbors and interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Zero MAC address (interfaces without a link-layer identity)
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from a kernel link-layer attribute; only 6-byte addresses qualify
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    #[inline]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Kernel neighbor state (NUD_* values from linux/neighbour.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum NeighborState {
    Incomplete = 0x01,
    Reachable = 0x02,
    Stale = 0x04,
    Delay = 0x08,
    Probe = 0x10,
    Failed = 0x20,
    NoArp = 0x40,
    Permanent = 0x80,
    Unknown = 0x00,
}

impl NeighborState {
    /// Create from kernel NUD_* value
    pub fn from_kernel(state: u16) -> Self {
        match state {
            0x01 => Self::Incomplete,
            0x02 => Self::Reachable,
            0x04 => Self::Stale,
            0x08 => Self::Delay,
            0x10 => Self::Probe,
            0x20 => Self::Failed,
            0x40 => Self::NoArp,
            0x80 => Self::Permanent,
            _ => Self::Unknown,
        }
    }

    /// Only NUD_REACHABLE counts; stale/delay/probe entries are unconfirmed
    #[inline]
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// One entry of the kernel neighbor table for an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ifindex: u32,
    pub ip: IpAddr,
    /// Absent for incomplete/failed entries
    pub mac: Option<MacAddress>,
    pub state: NeighborState,
}

impl NeighborEntry {
    /// Whether this entry is worth actively soliciting
    pub fn is_probe_candidate(&self) -> bool {
        !self.state.is_reachable() && is_link_local_unicast(&self.ip)
    }
}

/// Snapshot of a network interface as enumerated from the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    /// None when the link has no 6-byte hardware address
    pub mac: Option<MacAddress>,
    pub up: bool,
    pub loopback: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl InterfaceInfo {
    /// Whether the interface has a usable link-layer identity for NDP
    pub fn has_link_layer_address(&self) -> bool {
        self.mac.is_some_and(|mac| !mac.is_zero())
    }
}

/// Link-local unicast check for both families (fe80::/10, 169.254.0.0/16)
pub fn is_link_local_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V6(addr) => is_ipv6_link_local(addr),
        IpAddr::V4(addr) => addr.is_link_local(),
    }
}

/// Check if IPv6 address is link-local (fe80::/10)
#[inline]
pub fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    let segments = addr.segments();
    (segments[0] & 0xffc0) == 0xfe80
}
