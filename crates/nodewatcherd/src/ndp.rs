//! Active IPv6 Neighbor Discovery probing
//!
//! A probe round fires one batch of Neighbor Solicitations (one per target,
//! each addressed to the target's solicited-node multicast group) and then
//! drains replies from the raw ICMPv6 socket until either one reply per
//! requested target has arrived or the read deadline passes. Deadline expiry
//! is the normal end of a round: multicast listeners are not obliged to
//! answer, so whatever arrived by then is the result.
//!
//! The kernel picks up the advertisements itself and refreshes its neighbor
//! cache; callers re-read the neighbor table afterwards to learn the outcome.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Active neighbor reachability census
//! - SC-5: DoS Protection - One bounded batch per interface and round
//! - AC-3: Access Enforcement - Raw sockets require CAP_NET_RAW

use crate::error::{NodewatcherError, Result};
use crate::types::{InterfaceInfo, MacAddress};
use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace, warn};

/// ff02::1:ff00:0/104, the low 24 bits are taken from the target
pub const SOLICITED_NODE_PREFIX: [u8; 16] = [
    0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xff, 0x00, 0x00, 0x00,
];

pub const ICMPV6_NEIGHBOR_SOLICITATION: u8 = 135;
pub const ICMPV6_NEIGHBOR_ADVERTISEMENT: u8 = 136;

/// NDP option type 1, length in units of 8 octets
const OPT_SOURCE_LINK_LAYER_ADDR: u8 = 1;
const OPT_SOURCE_LINK_LAYER_LEN: u8 = 1;

/// RFC 4861 §7.1.1: receivers drop NDP messages with any other hop limit
pub const NDP_HOP_LIMIT: libc::c_int = 255;

/// Size of a Neighbor Solicitation carrying a 6-byte SLLA option
pub const SOLICITATION_LEN: usize = 32;

/// IPv6 minimum link MTU, used when the interface reports none
const MIN_RECV_BUFFER: usize = 1280;

/// Derive the solicited-node multicast group for `target`
pub fn solicited_node_multicast(target: &Ipv6Addr) -> Ipv6Addr {
    let mut group = SOLICITED_NODE_PREFIX;
    group[13..].copy_from_slice(&target.octets()[13..]);
    Ipv6Addr::from(group)
}

/// Build an ICMPv6 Neighbor Solicitation for `target` with a Source
/// Link-Layer Address option carrying `source`.
///
/// The checksum is left zero; the kernel fills it in for raw ICMPv6 sockets.
pub fn build_solicitation(source: MacAddress, target: &Ipv6Addr) -> Vec<u8> {
    let mut packet = Vec::with_capacity(SOLICITATION_LEN);
    packet.extend_from_slice(&[ICMPV6_NEIGHBOR_SOLICITATION, 0, 0, 0]);
    // Reserved
    packet.extend_from_slice(&[0, 0, 0, 0]);
    packet.extend_from_slice(&target.octets());
    packet.extend_from_slice(&[OPT_SOURCE_LINK_LAYER_ADDR, OPT_SOURCE_LINK_LAYER_LEN]);
    packet.extend_from_slice(&source.octets());
    packet
}

/// Whether an I/O error is the read deadline expiring
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// One solicitation queued for the batch send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub destination: Ipv6Addr,
    /// Interface index the multicast group is scoped to
    pub scope_id: u32,
    pub payload: Vec<u8>,
}

/// A receive slot; `len` is zero until a message lands in it
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub buffer: Vec<u8>,
    pub len: usize,
    pub source: Option<Ipv6Addr>,
}

impl InboundPacket {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size],
            len: 0,
            source: None,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len.min(self.buffer.len())]
    }

    pub fn icmp_type(&self) -> Option<u8> {
        self.data().first().copied()
    }

    pub fn is_neighbor_advertisement(&self) -> bool {
        self.icmp_type() == Some(ICMPV6_NEIGHBOR_ADVERTISEMENT)
    }

    /// Target address field of a Neighbor Advertisement
    pub fn advertised_target(&self) -> Option<Ipv6Addr> {
        if !self.is_neighbor_advertisement() {
            return None;
        }
        let octets: [u8; 16] = self.data().get(8..24)?.try_into().ok()?;
        Some(Ipv6Addr::from(octets))
    }
}

/// Batched datagram I/O used by the prober
pub trait PacketSocket {
    /// Send all packets in one call, returning how many were accepted
    fn send_batch(&mut self, packets: &[OutboundPacket]) -> io::Result<usize>;

    /// Bound every following receive by `deadline`
    fn set_read_deadline(&mut self, deadline: Instant) -> io::Result<()>;

    /// Fill as many slots as are ready; blocks for the first one until the
    /// deadline, after which a timeout-class error is returned
    fn recv_batch(&mut self, slots: &mut [InboundPacket]) -> io::Result<usize>;

    fn close(self) -> Result<()>;
}

/// One probing round on one interface
pub trait ProbeSession {
    fn solicit(
        &mut self,
        timeout: Duration,
        iface: &InterfaceInfo,
        targets: &[IpAddr],
    ) -> Result<Vec<InboundPacket>>;

    /// Release the session's socket; consumes the session so it runs once
    fn close(self) -> Result<()>;
}

/// Opens probe sessions; one per interface and crawl cycle
pub trait ProbeFactory {
    type Session: ProbeSession;

    fn open(&self) -> Result<Self::Session>;
}

/// NDP prober over any [`PacketSocket`]
pub struct NdpProber<S: PacketSocket> {
    socket: S,
}

impl<S: PacketSocket> NdpProber<S> {
    pub fn with_socket(socket: S) -> Self {
        Self { socket }
    }
}

impl NdpProber<RawIcmpv6Socket> {
    /// Open a raw ICMPv6 socket with the NDP hop limit configured
    pub fn open() -> Result<Self> {
        Ok(Self::with_socket(RawIcmpv6Socket::open()?))
    }
}

impl<S: PacketSocket> ProbeSession for NdpProber<S> {
    #[instrument(skip(self, iface, targets), fields(interface = %iface.name, targets = targets.len()))]
    fn solicit(
        &mut self,
        timeout: Duration,
        iface: &InterfaceInfo,
        targets: &[IpAddr],
    ) -> Result<Vec<InboundPacket>> {
        let eligible: Vec<Ipv6Addr> = targets
            .iter()
            .filter_map(|target| match target {
                IpAddr::V6(addr) if addr.to_ipv4_mapped().is_none() => Some(*addr),
                _ => None,
            })
            .collect();

        if eligible.is_empty() {
            trace!("No IPv6 targets, nothing to solicit");
            return Ok(Vec::new());
        }

        let source = iface.mac.filter(|mac| !mac.is_zero()).ok_or_else(|| {
            NodewatcherError::Gather(format!("{} has no link-layer address", iface.name))
        })?;

        let packets: Vec<OutboundPacket> = eligible
            .iter()
            .map(|target| {
                let destination = solicited_node_multicast(target);
                debug!(target = %target, group = %destination, "Sending Neighbor Solicitation");
                OutboundPacket {
                    destination,
                    scope_id: iface.index,
                    payload: build_solicitation(source, target),
                }
            })
            .collect();

        let sent = self
            .socket
            .send_batch(&packets)
            .map_err(|source| NodewatcherError::Socket { op: "sendmmsg", source })?;
        if sent < packets.len() {
            warn!(sent, queued = packets.len(), "Kernel accepted only part of the batch");
        }

        self.socket
            .set_read_deadline(Instant::now() + timeout)
            .map_err(|source| NodewatcherError::Socket { op: "setsockopt", source })?;

        // One slot per requested target bounds the replies we wait for
        let slot_size = (iface.mtu as usize).max(MIN_RECV_BUFFER);
        let mut slots: Vec<InboundPacket> = (0..targets.len())
            .map(|_| InboundPacket::with_capacity(slot_size))
            .collect();

        let mut received = 0;
        while received < slots.len() {
            match self.socket.recv_batch(&mut slots[received..]) {
                Ok(0) => break,
                Ok(n) => {
                    for reply in &slots[received..received + n] {
                        if let Some(target) = reply.advertised_target() {
                            trace!(%target, source = ?reply.source, "Neighbor Advertisement");
                        }
                    }
                    received += n;
                }
                Err(e) if is_timeout(&e) => break,
                // SO_RCVTIMEO sockets are never restarted after a signal
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    trace!("Receive interrupted, retrying");
                }
                Err(source) => {
                    return Err(NodewatcherError::Socket { op: "recvmmsg", source });
                }
            }
        }

        slots.truncate(received);
        debug!(replies = slots.len(), "Solicitation round complete");
        Ok(slots)
    }

    fn close(self) -> Result<()> {
        let mut errors = Vec::new();
        match self.socket.close() {
            Ok(()) => {}
            Err(NodewatcherError::Close(mut errs)) => errors.append(&mut errs),
            Err(other) => errors.push(io::Error::other(other.to_string())),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NodewatcherError::Close(errors))
        }
    }
}

/// Opens a fresh raw-socket prober per round
#[derive(Debug, Default, Clone, Copy)]
pub struct RawProbeFactory;

impl ProbeFactory for RawProbeFactory {
    type Session = NdpProber<RawIcmpv6Socket>;

    fn open(&self) -> Result<Self::Session> {
        NdpProber::open()
    }
}

#[cfg(target_os = "linux")]
mod raw {
    use super::{InboundPacket, NDP_HOP_LIMIT, OutboundPacket, PacketSocket};
    use crate::error::{NodewatcherError, Result};
    use std::io;
    use std::mem::{size_of, zeroed};
    use std::net::Ipv6Addr;
    use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
    use std::time::{Duration, Instant};
    use tracing::debug;

    /// Raw ICMPv6 socket, unbound so it serves every interface
    #[derive(Debug)]
    pub struct RawIcmpv6Socket {
        fd: OwnedFd,
        deadline: Option<Instant>,
    }

    impl RawIcmpv6Socket {
        pub fn open() -> Result<Self> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_INET6,
                    libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                    libc::IPPROTO_ICMPV6,
                )
            };
            if fd < 0 {
                return Err(NodewatcherError::last_os("socket"));
            }

            // SAFETY: fd was just returned by socket(2) and is owned by nothing else
            let socket = Self {
                fd: unsafe { OwnedFd::from_raw_fd(fd) },
                deadline: None,
            };
            socket
                .setsockopt(libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, &NDP_HOP_LIMIT)
                .map_err(|source| NodewatcherError::Socket {
                    op: "setsockopt(IPV6_MULTICAST_HOPS)",
                    source,
                })?;

            debug!(fd, "Opened raw ICMPv6 socket");
            Ok(socket)
        }

        fn setsockopt<T>(&self, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
            let rc = unsafe {
                libc::setsockopt(
                    self.raw(),
                    level,
                    name,
                    value as *const T as *const libc::c_void,
                    size_of::<T>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        fn raw(&self) -> RawFd {
            self.fd.as_raw_fd()
        }

        /// None blocks indefinitely
        fn set_recv_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            let tv = match timeout {
                Some(d) => libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    // A zero timeval would mean "no timeout"
                    tv_usec: d.subsec_micros().max(1) as libc::suseconds_t,
                },
                None => libc::timeval { tv_sec: 0, tv_usec: 0 },
            };
            self.setsockopt(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &tv)
        }
    }

    fn sockaddr_from(addr: Ipv6Addr, scope_id: u32) -> libc::sockaddr_in6 {
        let mut sa: libc::sockaddr_in6 = unsafe { zeroed() };
        sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sa.sin6_addr = libc::in6_addr {
            s6_addr: addr.octets(),
        };
        sa.sin6_scope_id = scope_id;
        sa
    }

    fn message_header(addr: &mut libc::sockaddr_in6, iov: &mut libc::iovec) -> libc::mmsghdr {
        let mut hdr: libc::msghdr = unsafe { zeroed() };
        hdr.msg_name = addr as *mut libc::sockaddr_in6 as *mut libc::c_void;
        hdr.msg_namelen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        hdr.msg_iov = iov as *mut libc::iovec;
        hdr.msg_iovlen = 1;
        libc::mmsghdr {
            msg_hdr: hdr,
            msg_len: 0,
        }
    }

    impl PacketSocket for RawIcmpv6Socket {
        fn send_batch(&mut self, packets: &[OutboundPacket]) -> io::Result<usize> {
            if packets.is_empty() {
                return Ok(0);
            }

            let mut addrs: Vec<libc::sockaddr_in6> = packets
                .iter()
                .map(|p| sockaddr_from(p.destination, p.scope_id))
                .collect();
            let mut iovecs: Vec<libc::iovec> = packets
                .iter()
                .map(|p| libc::iovec {
                    iov_base: p.payload.as_ptr() as *mut libc::c_void,
                    iov_len: p.payload.len(),
                })
                .collect();
            let mut msgs: Vec<libc::mmsghdr> = addrs
                .iter_mut()
                .zip(iovecs.iter_mut())
                .map(|(addr, iov)| message_header(addr, iov))
                .collect();

            let rc = unsafe {
                libc::sendmmsg(self.raw(), msgs.as_mut_ptr(), msgs.len() as libc::c_uint, 0)
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(rc as usize)
        }

        fn set_read_deadline(&mut self, deadline: Instant) -> io::Result<()> {
            self.deadline = Some(deadline);
            Ok(())
        }

        fn recv_batch(&mut self, slots: &mut [InboundPacket]) -> io::Result<usize> {
            if slots.is_empty() {
                return Ok(0);
            }

            let remaining = match self.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.set_recv_timeout(remaining)?;

            let mut addrs: Vec<libc::sockaddr_in6> =
                (0..slots.len()).map(|_| unsafe { zeroed() }).collect();
            let mut iovecs: Vec<libc::iovec> = slots
                .iter_mut()
                .map(|slot| libc::iovec {
                    iov_base: slot.buffer.as_mut_ptr() as *mut libc::c_void,
                    iov_len: slot.buffer.len(),
                })
                .collect();
            let mut msgs: Vec<libc::mmsghdr> = addrs
                .iter_mut()
                .zip(iovecs.iter_mut())
                .map(|(addr, iov)| message_header(addr, iov))
                .collect();

            // MSG_WAITFORONE: block for the first datagram only
            let rc = unsafe {
                libc::recvmmsg(
                    self.raw(),
                    msgs.as_mut_ptr(),
                    msgs.len() as libc::c_uint,
                    libc::MSG_WAITFORONE,
                    std::ptr::null_mut(),
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            let count = rc as usize;
            for (i, slot) in slots.iter_mut().take(count).enumerate() {
                slot.len = msgs[i].msg_len as usize;
                let namelen = msgs[i].msg_hdr.msg_namelen as usize;
                slot.source = (namelen >= size_of::<libc::sockaddr_in6>())
                    .then(|| Ipv6Addr::from(addrs[i].sin6_addr.s6_addr));
            }
            Ok(count)
        }

        /// Close the descriptor, reporting a close(2) failure
        fn close(self) -> Result<()> {
            let fd = self.fd.into_raw_fd();
            let rc = unsafe { libc::close(fd) };
            if rc < 0 {
                return Err(NodewatcherError::Close(vec![io::Error::last_os_error()]));
            }
            debug!(fd, "Closed raw ICMPv6 socket");
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
pub use raw::RawIcmpv6Socket;

/// Mock raw socket for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod raw {
    use super::{InboundPacket, OutboundPacket, PacketSocket};
    use crate::error::{NodewatcherError, Result};
    use std::io;
    use std::time::Instant;

    #[derive(Debug)]
    pub struct RawIcmpv6Socket;

    impl RawIcmpv6Socket {
        pub fn open() -> Result<Self> {
            Err(NodewatcherError::Socket {
                op: "socket",
                source: io::ErrorKind::Unsupported.into(),
            })
        }
    }

    impl PacketSocket for RawIcmpv6Socket {
        fn send_batch(&mut self, _packets: &[OutboundPacket]) -> io::Result<usize> {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn set_read_deadline(&mut self, _deadline: Instant) -> io::Result<()> {
            Ok(())
        }

        fn recv_batch(&mut self, _slots: &mut [InboundPacket]) -> io::Result<usize> {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use raw::RawIcmpv6Socket;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted socket: each recv step either fills `n` slots or fails
    #[derive(Default)]
    struct FakeSocket {
        sent: Vec<OutboundPacket>,
        send_error: Option<io::ErrorKind>,
        deadline: Option<Instant>,
        recv_steps: VecDeque<io::Result<usize>>,
        recv_calls: usize,
        slots_offered: Vec<usize>,
        io_calls: usize,
        close_error: bool,
    }

    impl PacketSocket for FakeSocket {
        fn send_batch(&mut self, packets: &[OutboundPacket]) -> io::Result<usize> {
            self.io_calls += 1;
            if let Some(kind) = self.send_error {
                return Err(kind.into());
            }
            self.sent.extend_from_slice(packets);
            Ok(packets.len())
        }

        fn set_read_deadline(&mut self, deadline: Instant) -> io::Result<()> {
            self.io_calls += 1;
            self.deadline = Some(deadline);
            Ok(())
        }

        fn recv_batch(&mut self, slots: &mut [InboundPacket]) -> io::Result<usize> {
            self.io_calls += 1;
            self.recv_calls += 1;
            self.slots_offered.push(slots.len());
            match self.recv_steps.pop_front() {
                Some(Ok(n)) => {
                    let n = n.min(slots.len());
                    for slot in slots.iter_mut().take(n) {
                        slot.buffer[0] = ICMPV6_NEIGHBOR_ADVERTISEMENT;
                        slot.len = 24;
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn close(self) -> Result<()> {
            if self.close_error {
                Err(NodewatcherError::Close(vec![io::Error::other("ebadf")]))
            } else {
                Ok(())
            }
        }
    }

    fn iface() -> InterfaceInfo {
        InterfaceInfo {
            index: 7,
            name: "br-client".into(),
            mtu: 1500,
            mac: Some(MacAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])),
            up: true,
            loopback: false,
            rx_bytes: 0,
            tx_bytes: 0,
        }
    }

    fn v6(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_solicited_node_multicast_derivation() {
        let target: Ipv6Addr = "fe80::2aa:ff:fe28:9c5a".parse().unwrap();
        let group = solicited_node_multicast(&target);
        assert_eq!(group, "ff02::1:ff28:9c5a".parse::<Ipv6Addr>().unwrap());
        assert_eq!(group.octets()[..13], SOLICITED_NODE_PREFIX[..13]);
        assert_eq!(group.octets()[13..], target.octets()[13..]);
    }

    #[test]
    fn test_solicited_node_multicast_is_deterministic() {
        let target: Ipv6Addr = "2001:db8::abcd:ef01".parse().unwrap();
        assert_eq!(
            solicited_node_multicast(&target),
            solicited_node_multicast(&target)
        );
        assert_eq!(
            solicited_node_multicast(&target),
            "ff02::1:ffcd:ef01".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_build_solicitation_bytes() {
        let mac = MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let target: Ipv6Addr = "fe80::1".parse().unwrap();
        let packet = build_solicitation(mac, &target);

        let expected: [u8; SOLICITATION_LEN] = [
            135, 0, 0, 0, // type, code, checksum
            0, 0, 0, 0, // reserved
            0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, // target
            0x01, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // SLLA option
        ];
        assert_eq!(packet, expected);
    }

    #[test]
    fn test_empty_targets_do_no_io() {
        let mut prober = NdpProber::with_socket(FakeSocket::default());
        let replies = prober
            .solicit(Duration::from_secs(2), &iface(), &[])
            .unwrap();
        assert!(replies.is_empty());
        assert_eq!(prober.socket.io_calls, 0);
    }

    #[test]
    fn test_ipv4_and_mapped_targets_do_no_io() {
        let mut prober = NdpProber::with_socket(FakeSocket::default());
        let targets = [
            "169.254.0.1".parse().unwrap(),
            v6("::ffff:169.254.0.2"),
        ];
        let replies = prober
            .solicit(Duration::from_secs(2), &iface(), &targets)
            .unwrap();
        assert!(replies.is_empty());
        assert_eq!(prober.socket.io_calls, 0);
    }

    #[test]
    fn test_one_packet_per_eligible_target() {
        let mut prober = NdpProber::with_socket(FakeSocket::default());
        let targets = [v6("fe80::1"), "169.254.3.3".parse().unwrap(), v6("fe80::aa:bbcc")];
        prober
            .solicit(Duration::from_secs(2), &iface(), &targets)
            .unwrap();

        let sent = &prober.socket.sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].destination, "ff02::1:ff00:1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(sent[1].destination, "ff02::1:ffaa:bbcc".parse::<Ipv6Addr>().unwrap());
        assert!(sent.iter().all(|p| p.scope_id == 7 && p.payload.len() == SOLICITATION_LEN));
    }

    #[test]
    fn test_receive_slots_match_requested_targets() {
        let mut prober = NdpProber::with_socket(FakeSocket::default());
        let targets = [v6("fe80::1"), v6("fe80::2"), "169.254.3.3".parse().unwrap()];
        prober
            .solicit(Duration::from_secs(2), &iface(), &targets)
            .unwrap();
        assert_eq!(prober.socket.slots_offered, vec![3]);
    }

    #[test]
    fn test_timeout_returns_partial_result() {
        let socket = FakeSocket {
            recv_steps: VecDeque::from([Ok(1), Err(io::ErrorKind::WouldBlock.into())]),
            ..Default::default()
        };
        let mut prober = NdpProber::with_socket(socket);
        let targets = [v6("fe80::1"), v6("fe80::2"), v6("fe80::3")];
        let replies = prober
            .solicit(Duration::from_millis(50), &iface(), &targets)
            .unwrap();

        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_neighbor_advertisement());
        assert!(prober.socket.deadline.is_some());
    }

    #[test]
    fn test_drain_stops_when_all_slots_filled() {
        let socket = FakeSocket {
            recv_steps: VecDeque::from([Ok(1), Ok(2), Ok(5)]),
            ..Default::default()
        };
        let mut prober = NdpProber::with_socket(socket);
        let targets = [v6("fe80::1"), v6("fe80::2"), v6("fe80::3")];
        let replies = prober
            .solicit(Duration::from_secs(2), &iface(), &targets)
            .unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(prober.socket.recv_calls, 2);
        assert_eq!(prober.socket.slots_offered, vec![3, 2]);
    }

    #[test]
    fn test_interrupted_receive_is_retried() {
        let socket = FakeSocket {
            recv_steps: VecDeque::from([
                Err(io::ErrorKind::Interrupted.into()),
                Ok(1),
                Err(io::ErrorKind::Interrupted.into()),
                Err(io::ErrorKind::TimedOut.into()),
            ]),
            ..Default::default()
        };
        let mut prober = NdpProber::with_socket(socket);
        let targets = [v6("fe80::1"), v6("fe80::2")];
        let replies = prober
            .solicit(Duration::from_secs(2), &iface(), &targets)
            .unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(prober.socket.recv_calls, 4);
        assert_eq!(prober.socket.slots_offered, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_other_receive_error_aborts() {
        let socket = FakeSocket {
            recv_steps: VecDeque::from([Err(io::ErrorKind::PermissionDenied.into())]),
            ..Default::default()
        };
        let mut prober = NdpProber::with_socket(socket);
        let err = prober
            .solicit(Duration::from_secs(2), &iface(), &[v6("fe80::1")])
            .unwrap_err();
        assert!(matches!(err, NodewatcherError::Socket { op: "recvmmsg", .. }));
    }

    #[test]
    fn test_send_failure_aborts_before_receiving() {
        let socket = FakeSocket {
            send_error: Some(io::ErrorKind::PermissionDenied),
            ..Default::default()
        };
        let mut prober = NdpProber::with_socket(socket);
        let err = prober
            .solicit(Duration::from_secs(2), &iface(), &[v6("fe80::1")])
            .unwrap_err();
        assert!(matches!(err, NodewatcherError::Socket { op: "sendmmsg", .. }));
        assert_eq!(prober.socket.recv_calls, 0);
    }

    #[test]
    fn test_missing_link_layer_address_is_an_error() {
        let mut prober = NdpProber::with_socket(FakeSocket::default());
        let mut no_mac = iface();
        no_mac.mac = None;
        assert!(
            prober
                .solicit(Duration::from_secs(2), &no_mac, &[v6("fe80::1")])
                .is_err()
        );
    }

    #[test]
    fn test_close_reports_socket_failure() {
        let prober = NdpProber::with_socket(FakeSocket {
            close_error: true,
            ..Default::default()
        });
        let err = prober.close().unwrap_err();
        assert!(matches!(err, NodewatcherError::Close(ref errs) if errs.len() == 1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_raw_socket_opens_and_closes() {
        // Raw sockets need CAP_NET_RAW
        let Ok(socket) = RawIcmpv6Socket::open() else {
            return;
        };
        socket.close().unwrap();
    }

    #[test]
    fn test_advertised_target_parsing() {
        let mut packet = InboundPacket::with_capacity(64);
        packet.buffer[0] = ICMPV6_NEIGHBOR_ADVERTISEMENT;
        packet.buffer[8..24].copy_from_slice(&"fe80::9".parse::<Ipv6Addr>().unwrap().octets());
        packet.len = 24;
        assert_eq!(
            packet.advertised_target(),
            Some("fe80::9".parse::<Ipv6Addr>().unwrap())
        );

        packet.buffer[0] = ICMPV6_NEIGHBOR_SOLICITATION;
        assert_eq!(packet.advertised_target(), None);
    }

    #[test]
    fn test_timeout_classification() {
        assert!(is_timeout(&io::ErrorKind::WouldBlock.into()));
        assert!(is_timeout(&io::ErrorKind::TimedOut.into()));
        assert!(!is_timeout(&io::ErrorKind::ConnectionRefused.into()));
    }
}
