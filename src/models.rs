use crate::mac::MacAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Lifecycle flags of a node, reset and re-derived every processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub gateway: bool,
    #[serde(default)]
    pub client: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Firmware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Software {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mesh_interfaces: BTreeSet<MacAddress>,
}

/// Self-reported node description (the `nodeinfo` attribute category).
///
/// Every field is optional: absence means "not reported this cycle", never
/// an error. Fields the engine does not interpret are carried through in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<Software>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<Hardware>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeInfo {
    /// The mesh interfaces this node reports for itself, if any.
    pub fn mesh_interfaces(&self) -> impl Iterator<Item = &MacAddress> {
        self.network.iter().flat_map(|n| n.mesh_interfaces.iter())
    }
}

/// Whitelisted per-node statistics (the `statistics` attribute category).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadavg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<Value>,
}

impl Statistics {
    /// Start-of-cycle state: a zero client count, everything else unknown.
    pub fn reset() -> Self {
        Statistics { clients: Some(0), ..Default::default() }
    }
}

/// Canonical record for one physical mesh participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: MacAddress,
    /// Every identifier known to refer to this node. The set only grows.
    pub aliases: BTreeSet<MacAddress>,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodeinfo: Option<NodeInfo>,
    #[serde(default)]
    pub statistics: Statistics,
    /// Opaque per-source payload the engine merges but does not interpret.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Interfaces of this node known to be tunnel endpoints.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub vpn_interfaces: BTreeSet<MacAddress>,
    /// Count of client devices attached to this node, derived from the
    /// routing snapshot.
    #[serde(default)]
    pub client_count: u32,
}

impl Node {
    pub(crate) fn new(id: MacAddress) -> Self {
        let mut aliases = BTreeSet::new();
        aliases.insert(id);
        Node {
            id,
            aliases,
            flags: NodeFlags::default(),
            nodeinfo: None,
            statistics: Statistics::default(),
            extra: Map::new(),
            first_seen: None,
            last_seen: None,
            vpn_interfaces: BTreeSet::new(),
            client_count: 0,
        }
    }

    /// The primary identifier: the first alias this node was seen under,
    /// unless a static alias record explicitly overrode it.
    pub fn id(&self) -> MacAddress {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: MacAddress) {
        self.id = id;
        self.aliases.insert(id);
    }

    pub(crate) fn mark_online(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(now);
        self.first_seen.get_or_insert(now);
        self.flags.online = true;
    }

    /// Deep-merge a partial payload into the opaque attribute bag.
    pub fn merge_extra(&mut self, partial: &Map<String, Value>) {
        let mut dest = Value::Object(std::mem::take(&mut self.extra));
        crate::identity::deep_merge(&mut dest, &Value::Object(partial.clone()));
        if let Value::Object(map) = dest {
            self.extra = map;
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.nodeinfo.as_ref().and_then(|info| info.hostname.as_deref())
    }
}

/// One self-description record, keyed by the node identifier it arrived under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfoRecord {
    pub node_id: MacAddress,
    #[serde(flatten)]
    pub info: NodeInfo,
}

/// One statistics record; the payload stays undecoded so malformed fields
/// can be skipped individually during import.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRecord {
    pub node_id: MacAddress,
    pub data: Value,
}

/// One decoded entry of a routing daemon's neighbor snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisRecord {
    /// Declares `primary` as a primary mesh interface.
    Primary { primary: MacAddress },
    /// Declares `secondary` as a secondary interface of the primary `of`.
    Secondary { secondary: MacAddress, of: MacAddress },
    /// A directed router → neighbor observation with a quality metric.
    Neighbor { router: MacAddress, neighbor: MacAddress, quality: f64 },
    /// A client device attached to `router`.
    Client { router: MacAddress, client: MacAddress },
}

/// Static per-address alias data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Geo-coordinates as "<latitude> <longitude>".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn: Option<bool>,
    /// Explicit primary-id override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MacAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Mesh,
    Vpn,
    Client,
}

/// One reduced, undirected topology link between two canonical nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyLink {
    /// Order-independent key: the sorted endpoint ids joined with `-`.
    pub id: String,
    pub source: MacAddress,
    pub target: MacAddress,
    pub quality: f64,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub vpn: bool,
    pub bidirectional: bool,
}

/// Order-independent link key for two interface or node identifiers.
pub fn link_id(a: &MacAddress, b: &MacAddress) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}-{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_link_id_is_order_independent() {
        let a = mac("aa:00:00:00:00:11");
        let b = mac("bb:00:00:00:00:21");
        assert_eq!(link_id(&a, &b), link_id(&b, &a));
        assert_eq!(link_id(&a, &b), "aa:00:00:00:00:11-bb:00:00:00:00:21");
    }

    #[test]
    fn test_mark_online_sets_first_seen_once() {
        let mut node = Node::new(mac("00:00:00:00:00:01"));
        let t1 = "2026-08-04T10:00:00Z".parse().unwrap();
        let t2 = "2026-08-04T10:05:00Z".parse().unwrap();

        node.mark_online(t1);
        node.mark_online(t2);

        assert_eq!(node.first_seen, Some(t1));
        assert_eq!(node.last_seen, Some(t2));
        assert!(node.flags.online);
    }

    #[test]
    fn test_nodeinfo_decodes_nested_payload() {
        let info: NodeInfo = serde_json::from_value(json!({
            "hostname": "node-one",
            "network": {"mesh_interfaces": ["00:00:00:00:00:01", "00:00:00:00:00:02"]},
            "location": {"latitude": 53.56, "longitude": 10.0},
            "software": {"firmware": {"release": "1.4"}},
            "hardware": {"model": "tp-link-841"},
            "vendor_field": {"anything": true}
        }))
        .unwrap();

        assert_eq!(info.hostname.as_deref(), Some("node-one"));
        assert_eq!(info.mesh_interfaces().count(), 2);
        assert_eq!(
            info.software.as_ref().and_then(|s| s.firmware.as_ref()).and_then(|f| f.release.as_deref()),
            Some("1.4")
        );
        assert!(info.extra.contains_key("vendor_field"));
    }

    #[test]
    fn test_node_serde_roundtrip() {
        let mut node = Node::new(mac("00:00:00:00:00:01"));
        node.aliases.insert(mac("00:00:00:00:00:02"));
        node.statistics = Statistics { clients: Some(4), uptime: Some(3600.0), ..Default::default() };
        node.merge_extra(json!({"site": {"code": "hh"}}).as_object().unwrap());

        let encoded = serde_json::to_string(&node).unwrap();
        let decoded: Node = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id(), node.id());
        assert_eq!(decoded.aliases, node.aliases);
        assert_eq!(decoded.statistics, node.statistics);
        assert_eq!(decoded.extra, node.extra);
    }
}
