//! Netlink access to the kernel link and neighbor tables
//!
//! The crawler consumes the kernel through the [`LinkSource`] and
//! [`NeighborTable`] traits; [`NetlinkSocket`] implements both with
//! RTM_GETLINK / RTM_GETNEIGH dumps over a NETLINK_ROUTE socket.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for network state
//! - CM-8: System Component Inventory - Interface and neighbor enumeration

use crate::error::Result;
use crate::types::{InterfaceInfo, NeighborEntry};

/// Enumerates network interfaces with their statistics
pub trait LinkSource {
    fn list_links(&mut self) -> Result<Vec<InterfaceInfo>>;
}

/// Reads the kernel neighbor cache for one interface
pub trait NeighborTable {
    /// All neighbor entries (both families) on `ifindex`.
    ///
    /// Fails with `InterfaceNotFound` if the index does not name an interface.
    fn list_neighbors(&mut self, ifindex: u32) -> Result<Vec<NeighborEntry>>;
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{LinkSource, NeighborTable};
    use crate::error::{NodewatcherError, Result};
    use crate::types::{InterfaceInfo, MacAddress, NeighborEntry, NeighborState};
    use netlink_packet_core::{
        NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::RouteNetlinkMessage;
    use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::net::IpAddr;
    use tracing::{debug, instrument, trace};

    /// Receive buffer capacity; one dump chunk from the kernel fits easily
    const RECV_BUFFER_SIZE: usize = 65536;

    /// Request/response netlink socket for table dumps
    pub struct NetlinkSocket {
        socket: Socket,
        /// Pre-allocated receive buffer (reused across calls)
        buffer: Vec<u8>,
        sequence: u32,
    }

    impl NetlinkSocket {
        /// Create and connect a NETLINK_ROUTE socket
        ///
        /// # NIST Controls
        /// - AC-3: Access Enforcement - Kernel socket permissions
        #[instrument]
        pub fn new() -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| NodewatcherError::Netlink(format!("Failed to create socket: {}", e)))?;
            socket
                .bind_auto()
                .map_err(|e| NodewatcherError::Netlink(format!("Failed to bind socket: {}", e)))?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| NodewatcherError::Netlink(format!("Failed to connect socket: {}", e)))?;

            debug!("Netlink route socket ready");

            Ok(Self {
                socket,
                buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
                sequence: 0,
            })
        }

        /// Send a dump request and collect every reply until NLMSG_DONE
        fn dump(&mut self, request: RouteNetlinkMessage) -> Result<Vec<RouteNetlinkMessage>> {
            self.sequence = self.sequence.wrapping_add(1);

            let mut header = NetlinkHeader::default();
            header.flags = NLM_F_REQUEST | NLM_F_DUMP;
            header.sequence_number = self.sequence;

            let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(request));
            packet.finalize();

            let mut buf = vec![0u8; packet.buffer_len()];
            packet.serialize(&mut buf);

            self.socket.send(&buf, 0).map_err(|e| {
                NodewatcherError::Netlink(format!("Failed to send dump request: {}", e))
            })?;

            let mut replies = Vec::new();
            loop {
                self.buffer.clear();
                let len = self
                    .socket
                    .recv(&mut self.buffer, 0)
                    .map_err(|e| NodewatcherError::Netlink(format!("Failed to receive: {}", e)))?;

                let mut offset = 0;
                while offset < len {
                    let msg =
                        NetlinkMessage::<RouteNetlinkMessage>::deserialize(&self.buffer[offset..len])
                            .map_err(|e| {
                                NodewatcherError::Netlink(format!("Failed to parse message: {}", e))
                            })?;

                    let msg_len = msg.header.length as usize;
                    if msg_len == 0 {
                        return Err(NodewatcherError::Netlink("Zero-length netlink message".into()));
                    }
                    // Align to 4 bytes (netlink alignment requirement)
                    offset = (offset + msg_len + 3) & !3;

                    match msg.payload {
                        NetlinkPayload::Done(_) => {
                            trace!(count = replies.len(), "Netlink dump complete");
                            return Ok(replies);
                        }
                        NetlinkPayload::Error(err) => {
                            return Err(NodewatcherError::Netlink(format!(
                                "Kernel rejected dump: {:?}",
                                err
                            )));
                        }
                        NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                        _ => {}
                    }
                }
            }
        }
    }

    impl LinkSource for NetlinkSocket {
        #[instrument(skip(self))]
        fn list_links(&mut self) -> Result<Vec<InterfaceInfo>> {
            let replies = self.dump(RouteNetlinkMessage::GetLink(LinkMessage::default()))?;
            let links: Vec<InterfaceInfo> = replies
                .iter()
                .filter_map(|msg| match msg {
                    RouteNetlinkMessage::NewLink(link) => Some(parse_link(link)),
                    _ => None,
                })
                .collect();

            debug!(count = links.len(), "Enumerated links");
            Ok(links)
        }
    }

    impl NeighborTable for NetlinkSocket {
        #[instrument(skip(self))]
        fn list_neighbors(&mut self, ifindex: u32) -> Result<Vec<NeighborEntry>> {
            resolve_ifindex(ifindex)?;

            let replies = self.dump(RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default()))?;
            let neighbors: Vec<NeighborEntry> = replies
                .iter()
                .filter_map(|msg| match msg {
                    RouteNetlinkMessage::NewNeighbour(n) if n.header.ifindex == ifindex => {
                        parse_neighbor(n)
                    }
                    _ => None,
                })
                .collect();

            debug!(ifindex, count = neighbors.len(), "Read neighbor table");
            Ok(neighbors)
        }
    }

    /// Fails for an index no interface carries; an unknown index comes
    /// back from `if_indextoname` as an empty name
    fn resolve_ifindex(ifindex: u32) -> Result<()> {
        match nix::net::if_::if_indextoname(ifindex) {
            Ok(name) if !name.as_bytes().is_empty() => Ok(()),
            _ => {
                debug!(ifindex, "Interface index does not resolve");
                Err(NodewatcherError::InterfaceNotFound(ifindex))
            }
        }
    }

    fn parse_link(link: &LinkMessage) -> InterfaceInfo {
        let mut info = InterfaceInfo {
            index: link.header.index,
            name: String::new(),
            mtu: 0,
            mac: None,
            up: link.header.flags.contains(LinkFlags::Up),
            loopback: link.header.flags.contains(LinkFlags::Loopback),
            rx_bytes: 0,
            tx_bytes: 0,
        };

        for attr in &link.attributes {
            match attr {
                LinkAttribute::IfName(name) => info.name = name.clone(),
                LinkAttribute::Mtu(mtu) => info.mtu = *mtu,
                LinkAttribute::Address(bytes) => info.mac = MacAddress::from_slice(bytes),
                LinkAttribute::Stats64(stats) => {
                    info.rx_bytes = stats.rx_bytes;
                    info.tx_bytes = stats.tx_bytes;
                }
                _ => {}
            }
        }

        info
    }

    fn parse_neighbor(msg: &NeighbourMessage) -> Option<NeighborEntry> {
        let mut ip: Option<IpAddr> = None;
        let mut mac: Option<MacAddress> = None;

        for attr in &msg.attributes {
            match attr {
                NeighbourAttribute::Destination(addr) => ip = parse_neigh_address(addr),
                NeighbourAttribute::LinkLocalAddress(bytes) => mac = MacAddress::from_slice(bytes),
                _ => {}
            }
        }

        let Some(ip) = ip else {
            trace!("Neighbor message missing IP address");
            return None;
        };

        Some(NeighborEntry {
            ifindex: msg.header.ifindex,
            ip,
            mac,
            state: NeighborState::from_kernel(u16::from(msg.header.state)),
        })
    }

    fn parse_neigh_address(addr: &NeighbourAddress) -> Option<IpAddr> {
        match addr {
            NeighbourAddress::Inet(ipv4) => Some(IpAddr::V4(*ipv4)),
            NeighbourAddress::Inet6(ipv6) => Some(IpAddr::V6(*ipv6)),
            _ => None,
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::error::NodewatcherError;

    /// Index far above anything a test host allocates
    const UNUSED_IFINDEX: u32 = 0x7fff_fff0;

    #[test]
    fn test_unknown_ifindex_is_lookup_error() {
        let mut socket = NetlinkSocket::new().unwrap();
        let result = socket.list_neighbors(UNUSED_IFINDEX);
        assert!(matches!(
            result,
            Err(NodewatcherError::InterfaceNotFound(UNUSED_IFINDEX))
        ));
    }

    #[test]
    fn test_loopback_neighbors_resolve() {
        let mut socket = NetlinkSocket::new().unwrap();
        let links = socket.list_links().unwrap();
        let lo = links.iter().find(|l| l.loopback).unwrap();
        let neighbors = socket.list_neighbors(lo.index).unwrap();
        assert!(neighbors.iter().all(|n| n.ifindex == lo.index));
    }
}

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::{LinkSource, NeighborTable};
    use crate::error::Result;
    use crate::types::{InterfaceInfo, NeighborEntry};

    pub struct NetlinkSocket;

    impl NetlinkSocket {
        pub fn new() -> Result<Self> {
            Ok(Self)
        }
    }

    impl LinkSource for NetlinkSocket {
        fn list_links(&mut self) -> Result<Vec<InterfaceInfo>> {
            Ok(Vec::new())
        }
    }

    impl NeighborTable for NetlinkSocket {
        fn list_neighbors(&mut self, _ifindex: u32) -> Result<Vec<NeighborEntry>> {
            Ok(Vec::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
