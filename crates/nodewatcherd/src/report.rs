//! Report assembly and the uplink payload codec
//!
//! One `Report` is built per cycle from the crawl, the host metrics and
//! the routing daemons. It is rendered as a `<data>` XML document and the
//! payload POSTed upstream is a JSON object with a single key, the hardware
//! address of the first reported interface, mapping to that document:
//!
//! ```text
//! {"02:ca:fe:00:00:01":"<?xml version='1.0' standalone='yes'?><data>...</data>"}
//! ```
//!
//! Interfaces and client counts are elements named after their interface,
//! e.g. `<clients><br-client>3</br-client></clients>`.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! - SI-4: System Monitoring - node health data handed to the operator

use crate::config::NodeIdentity;
use crate::crawler::{ClientCount, CrawlSnapshot, InterfaceStats};
use crate::error::{NodewatcherError, Result};
use crate::routing::{RoutingInfo, RoutingNeighbour};
use crate::sysinfo::SystemSnapshot;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Agent version reported as `nodewatcher_version`
pub const AGENT_VERSION: &str = concat!("nodewatcherd-", env!("CARGO_PKG_VERSION"));

const STATUS_ONLINE: &str = "online";
const FIRMWARE_VERSION: &str = "Generic";

/// Root element of the report document
const DOCUMENT_ROOT: &str = "data";
const XML_DECLARATION: &str = "<?xml version='1.0' standalone='yes'?>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Geo {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemData {
    pub status: &'static str,
    pub hostname: String,
    pub description: String,
    pub geo: Geo,
    pub position_comment: String,
    pub contact: String,
    pub hood: String,
    pub distname: String,
    pub distversion: String,
    pub memory_total: u64,
    pub memory_available: u64,
    pub memory_free: u64,
    pub memory_buffering: u64,
    pub memory_caching: u64,
    pub loadavg: f64,
    pub processes: String,
    pub uptime: f64,
    pub idletime: f64,
    pub local_time: i64,
    pub babel_version: String,
    pub kernel_version: String,
    pub nodewatcher_version: &'static str,
    pub firmware_version: &'static str,
}

/// Everything known about the node for one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub system_data: SystemData,
    #[serde(serialize_with = "interfaces_by_name")]
    pub interface_data: Vec<InterfaceStats>,
    #[serde(serialize_with = "neighbour_list")]
    pub babel_neighbours: Vec<RoutingNeighbour>,
    pub client_count: usize,
    #[serde(serialize_with = "clients_by_interface")]
    pub clients: Vec<ClientCount>,
}

fn interfaces_by_name<S: Serializer>(
    interfaces: &[InterfaceStats],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(interfaces.len()))?;
    for iface in interfaces {
        map.serialize_entry(&iface.name, iface)?;
    }
    map.end()
}

fn clients_by_interface<S: Serializer>(
    clients: &[ClientCount],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(clients.len()))?;
    for client in clients {
        map.serialize_entry(&client.interface, &client.count)?;
    }
    map.end()
}

/// `<babel_neighbours><neighbour>..</neighbour>..</babel_neighbours>`
fn neighbour_list<S: Serializer>(
    neighbours: &[RoutingNeighbour],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Neighbours<'a> {
        neighbour: &'a [RoutingNeighbour],
    }
    Neighbours {
        neighbour: neighbours,
    }
    .serialize(serializer)
}

impl Report {
    /// Assemble a report stamped with the current time
    pub fn assemble(
        identity: &NodeIdentity,
        system: SystemSnapshot,
        crawl: CrawlSnapshot,
        routing: RoutingInfo,
    ) -> Self {
        Self::assemble_at(
            identity,
            system,
            crawl,
            routing,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Assemble a report for the given unix time
    pub fn assemble_at(
        identity: &NodeIdentity,
        system: SystemSnapshot,
        crawl: CrawlSnapshot,
        routing: RoutingInfo,
        local_time: i64,
    ) -> Self {
        let system_data = SystemData {
            status: STATUS_ONLINE,
            hostname: identity.hostname.clone(),
            description: identity.description.clone(),
            geo: Geo {
                lat: identity.lat,
                lng: identity.lng,
            },
            position_comment: identity.position_comment.clone(),
            contact: identity.contact.clone(),
            hood: identity.hood.clone(),
            distname: identity.distname.clone(),
            distversion: identity.distversion.clone(),
            memory_total: system.memory.total,
            memory_available: system.memory.available,
            memory_free: system.memory.free,
            memory_buffering: system.memory.buffers,
            memory_caching: system.memory.cached,
            loadavg: system.load.load15,
            processes: format!("{}/{}", system.load.runnable, system.load.procs),
            uptime: system.uptime_secs,
            idletime: system.idle_secs,
            local_time,
            babel_version: routing.version,
            kernel_version: system.kernel_version,
            nodewatcher_version: AGENT_VERSION,
            firmware_version: FIRMWARE_VERSION,
        };

        Self {
            system_data,
            interface_data: crawl.interfaces,
            babel_neighbours: routing.neighbours,
            client_count: crawl.client_total,
            clients: crawl.clients,
        }
    }

    /// Key the monitoring server files this node under
    pub fn node_key(&self) -> Option<String> {
        self.interface_data
            .first()
            .map(|iface| iface.mac_addr.map(|m| m.to_string()).unwrap_or_default())
    }

    /// Render the `<data>` document, declaration included
    pub fn to_xml(&self) -> Result<String> {
        let body = quick_xml::se::to_string_with_root(DOCUMENT_ROOT, self)?;
        Ok(format!("{XML_DECLARATION}{body}"))
    }
}

/// Encode the POST body; a report without interfaces has no key and fails
pub fn encode_payload(report: &Report) -> Result<Vec<u8>> {
    let key = report.node_key().ok_or_else(|| {
        NodewatcherError::Gather("report has no interfaces to key the payload".to_string())
    })?;

    let mut body = BTreeMap::new();
    body.insert(key, report.to_xml()?);
    Ok(serde_json::to_vec(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo::{LoadAvg, MemInfo};
    use crate::types::MacAddress;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    fn identity() -> NodeIdentity {
        NodeIdentity {
            hostname: "gw01".into(),
            lat: 49.45,
            lng: 11.08,
            contact: "noc@example.org".into(),
            hood: "Nuernberg".into(),
            ..Default::default()
        }
    }

    fn system() -> SystemSnapshot {
        SystemSnapshot {
            memory: MemInfo {
                total: 1000,
                free: 200,
                available: 600,
                buffers: 50,
                cached: 300,
            },
            load: LoadAvg {
                load1: 0.5,
                load5: 0.3,
                load15: 0.12,
                runnable: 1,
                procs: 80,
            },
            uptime_secs: 100.5,
            idle_secs: 42.0,
            kernel_version: "6.1.0".into(),
        }
    }

    fn crawl() -> CrawlSnapshot {
        CrawlSnapshot {
            interfaces: vec![InterfaceStats {
                name: "br-client".into(),
                mtu: 1500,
                mac_addr: Some(MacAddress::new([0x02, 0xca, 0xfe, 0, 0, 1])),
                traffic_rx: 10,
                traffic_tx: 20,
            }],
            clients: vec![ClientCount {
                interface: "br-client".into(),
                count: 3,
            }],
            client_total: 3,
        }
    }

    #[test]
    fn test_assemble_maps_fields() {
        let routing = RoutingInfo {
            version: "babeld-1.13, bird-2.14".into(),
            neighbours: vec![],
        };
        let report = Report::assemble_at(&identity(), system(), crawl(), routing, 1_700_000_000);

        let sys = &report.system_data;
        assert_eq!(sys.status, "online");
        assert_eq!(sys.loadavg, 0.12);
        assert_eq!(sys.processes, "1/80");
        assert_eq!(sys.memory_caching, 300);
        assert_eq!(sys.babel_version, "babeld-1.13, bird-2.14");
        assert_eq!(sys.firmware_version, "Generic");
        assert_eq!(sys.local_time, 1_700_000_000);
        assert_eq!(report.client_count, 3);
    }

    #[derive(Debug, Deserialize)]
    struct DataDoc {
        system_data: SystemDoc,
        interface_data: BTreeMap<String, InterfaceDoc>,
        babel_neighbours: NeighboursDoc,
        client_count: usize,
        clients: BTreeMap<String, usize>,
    }

    #[derive(Debug, Deserialize)]
    struct SystemDoc {
        status: String,
        hostname: String,
        description: String,
        geo: GeoDoc,
        loadavg: f64,
        processes: String,
        nodewatcher_version: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct GeoDoc {
        lat: f64,
        lng: f64,
    }

    #[derive(Debug, Deserialize)]
    struct InterfaceDoc {
        name: String,
        mtu: u32,
        mac_addr: Option<String>,
        traffic_rx: u64,
        traffic_tx: u64,
    }

    #[derive(Debug, Default, Deserialize)]
    struct NeighboursDoc {
        #[serde(default)]
        neighbour: Vec<NeighbourDoc>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NeighbourDoc {
        ip: String,
        outgoing_interface: String,
        link_cost: String,
    }

    fn routing() -> RoutingInfo {
        RoutingInfo {
            version: "babeld-1.13".into(),
            neighbours: vec![RoutingNeighbour {
                ip: "fe80::1".into(),
                outgoing_interface: "wg0".into(),
                link_cost: "96".into(),
            }],
        }
    }

    fn payload_document(payload: &[u8]) -> (String, String) {
        let body: BTreeMap<String, String> = serde_json::from_slice(payload).unwrap();
        assert_eq!(body.len(), 1);
        body.into_iter().next().unwrap()
    }

    #[test]
    fn test_payload_keyed_by_first_interface_mac() {
        let report = Report::assemble_at(&identity(), system(), crawl(), routing(), 0);
        let payload = encode_payload(&report).unwrap();

        let (key, xml) = payload_document(&payload);
        assert_eq!(key, "02:ca:fe:00:00:01");
        assert!(xml.starts_with("<?xml version='1.0' standalone='yes'?><data><system_data>"));
        assert!(xml.ends_with("</data>"));
        assert!(xml.contains("<clients><br-client>3</br-client></clients>"));
        assert!(xml.contains(
            "<interface_data><br-client><name>br-client</name><mtu>1500</mtu>\
             <mac_addr>02:ca:fe:00:00:01</mac_addr>"
        ));
    }

    #[test]
    fn test_report_document_reads_back() {
        let mut identity = identity();
        identity.description = "roof <north> & mast".into();
        let report = Report::assemble_at(&identity, system(), crawl(), routing(), 0);
        let (_, xml) = payload_document(&encode_payload(&report).unwrap());

        let doc: DataDoc = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(doc.system_data.status, "online");
        assert_eq!(doc.system_data.hostname, "gw01");
        assert_eq!(doc.system_data.description, "roof <north> & mast");
        assert_eq!(doc.system_data.geo, GeoDoc { lat: 49.45, lng: 11.08 });
        assert_eq!(doc.system_data.loadavg, 0.12);
        assert_eq!(doc.system_data.processes, "1/80");
        assert_eq!(doc.system_data.nodewatcher_version, AGENT_VERSION);

        let iface = &doc.interface_data["br-client"];
        assert_eq!(iface.name, "br-client");
        assert_eq!(iface.mtu, 1500);
        assert_eq!(iface.mac_addr.as_deref(), Some("02:ca:fe:00:00:01"));
        assert_eq!((iface.traffic_rx, iface.traffic_tx), (10, 20));

        assert_eq!(
            doc.babel_neighbours.neighbour,
            vec![NeighbourDoc {
                ip: "fe80::1".into(),
                outgoing_interface: "wg0".into(),
                link_cost: "96".into(),
            }]
        );
        assert_eq!(doc.client_count, 3);
        assert_eq!(doc.clients["br-client"], 3);
    }

    #[test]
    fn test_interface_without_mac_omits_element() {
        let mut snapshot = crawl();
        snapshot.interfaces.push(InterfaceStats {
            name: "wg0".into(),
            mtu: 1420,
            mac_addr: None,
            traffic_rx: 1,
            traffic_tx: 2,
        });
        let report = Report::assemble_at(&identity(), system(), snapshot, RoutingInfo::default(), 0);
        let xml = report.to_xml().unwrap();

        assert!(xml.contains("<wg0><name>wg0</name><mtu>1420</mtu><traffic_rx>1</traffic_rx>"));
        assert!(!xml.contains("<neighbour>"));
    }

    #[test]
    fn test_payload_without_interfaces_is_gather_error() {
        let report = Report::assemble_at(
            &identity(),
            system(),
            CrawlSnapshot::default(),
            RoutingInfo::default(),
            0,
        );
        assert!(matches!(
            encode_payload(&report),
            Err(NodewatcherError::Gather(_))
        ));
    }
}
