//! Per-source merge rules. Each importer folds one source's records into
//! the node store and reports what it imported and what it had to skip.

use crate::identity::{AmbiguityError, NodeKey, Resolution};
use crate::mac::MacAddress;
use crate::models::{
    AliasRecord, Firmware, Location, NetworkInfo, NodeInfo, NodeInfoRecord, Software,
    StatisticsRecord, VisRecord,
};
use crate::store::NodeStore;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one importer run.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    /// Records that would have merged two distinct nodes.
    pub conflicts: Vec<AmbiguityError>,
}

impl ImportReport {
    fn conflict(&mut self, err: AmbiguityError) {
        self.skipped += 1;
        self.conflicts.push(err);
    }
}

/// Import self-description records. The node's `nodeinfo` category is
/// replaced wholesale and its flags are reset; live sources pass
/// `assume_online` so the node is immediately confirmed for this cycle.
pub fn import_nodeinfo(
    store: &mut NodeStore,
    records: &[NodeInfoRecord],
    now: DateTime<Utc>,
    assume_online: bool,
) -> ImportReport {
    let mut report = ImportReport::default();
    for record in records {
        let mut aliases = vec![record.node_id];
        aliases.extend(record.info.mesh_interfaces().copied());

        let key = match store.resolve(&aliases) {
            Ok(key) => key,
            Err(err) => {
                warn!("node-info record {}: {err}", record.node_id);
                report.conflict(err);
                continue;
            }
        };

        let node = store.get_mut(key);
        node.nodeinfo = Some(record.info.clone());
        node.flags.online = false;
        node.flags.gateway = false;
        if assume_online {
            store.mark_online(key, now);
        }
        report.imported += 1;
    }
    report
}

pub fn reset_statistics(store: &mut NodeStore) {
    store.reset_statistics();
}

/// Merge whitelisted statistics fields per node. Missing or malformed
/// source fields are skipped individually, never the whole record.
pub fn import_statistics(store: &mut NodeStore, records: &[StatisticsRecord]) -> ImportReport {
    let mut report = ImportReport::default();
    for record in records {
        let Some(key) = store.key_for_alias(&record.node_id) else {
            debug!("statistics for unknown node {} skipped", record.node_id);
            report.skipped += 1;
            continue;
        };

        let data = &record.data;
        let stats = &mut store.get_mut(key).statistics;
        if let Some(clients) = field(data, &["clients", "total"]).and_then(Value::as_u64) {
            stats.clients = Some(clients);
        }
        if let Some(uptime) = number(data, &["uptime"]) {
            stats.uptime = Some(uptime);
        }
        if let Some(loadavg) = number(data, &["loadavg"]) {
            stats.loadavg = Some(loadavg);
        }
        if let (Some(free), Some(total)) = (number(data, &["memory", "free"]), number(data, &["memory", "total"])) {
            if total > 0.0 {
                stats.memory_usage = Some(1.0 - free / total);
            }
        }
        if let Some(rootfs) = number(data, &["rootfs_usage"]) {
            stats.rootfs_usage = Some(rootfs);
        }
        if let Some(traffic) = field(data, &["traffic"]) {
            stats.traffic = Some(traffic.clone());
        }
        report.imported += 1;
    }
    report
}

fn field<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, segment| value.get(segment))
}

fn number(data: &Value, path: &[&str]) -> Option<f64> {
    field(data, path)?.as_f64()
}

/// Flag known gateways. Unmatched identifiers are warnings, not errors.
pub fn import_gateways(store: &mut NodeStore, gateways: &[MacAddress]) -> ImportReport {
    let mut report = ImportReport::default();
    for gateway in gateways {
        if store.mark_gateway(gateway) {
            report.imported += 1;
        } else {
            warn!("gateway {gateway} not found in node database");
            report.skipped += 1;
        }
    }
    report
}

/// Fold primary/secondary interface groupings from the routing snapshot
/// into each node's known mesh interfaces. Groups are only ever unioned in;
/// interfaces are never removed.
pub fn import_mesh_interfaces(store: &mut NodeStore, vis: &[VisRecord]) -> ImportReport {
    let mut report = ImportReport::default();

    let mut groups: BTreeMap<MacAddress, BTreeSet<MacAddress>> = BTreeMap::new();
    for record in vis {
        if let VisRecord::Secondary { secondary, of } = record {
            let group = groups.entry(*of).or_default();
            group.insert(*of);
            group.insert(*secondary);
        }
    }

    for (primary, group) in &groups {
        let members: Vec<MacAddress> = group.iter().copied().collect();
        match store.lookup(&members) {
            Resolution::Found(key) => {
                fold_group(store, key, &members);
                report.imported += 1;
            }
            Resolution::Ambiguous(err) => {
                warn!("interface group of {primary}: {err}");
                report.conflict(err);
            }
            Resolution::NotFound => {
                // No member is known yet. The group may still belong to a
                // node whose primary address it was derived from.
                let target = store
                    .iter()
                    .filter(|(_, node)| node.id().likely_derived_interface(primary))
                    .min_by_key(|(_, node)| node.id())
                    .map(|(key, _)| key);
                match target {
                    Some(key) => {
                        fold_group(store, key, &members);
                        report.imported += 1;
                    }
                    None => {
                        debug!("unclaimed interface group of {primary}");
                        report.skipped += 1;
                    }
                }
            }
        }
    }
    report
}

fn fold_group(store: &mut NodeStore, key: NodeKey, members: &[MacAddress]) {
    for member in members {
        store.add_alias(key, *member);
    }
    let node = store.get_mut(key);
    let info = node.nodeinfo.get_or_insert_with(NodeInfo::default);
    let network = info.network.get_or_insert_with(NetworkInfo::default);
    network.mesh_interfaces.extend(members.iter().copied());
}

/// Confirm nodes whose interfaces appear anywhere in the routing snapshot.
pub fn mark_vis_online(store: &mut NodeStore, vis: &[VisRecord], now: DateTime<Utc>) {
    let mut seen: BTreeSet<MacAddress> = BTreeSet::new();
    for record in vis {
        match record {
            VisRecord::Primary { primary } => {
                seen.insert(*primary);
            }
            VisRecord::Secondary { secondary, .. } => {
                seen.insert(*secondary);
            }
            // On older nodes the primary address shows up among the
            // client entries.
            VisRecord::Client { client, .. } => {
                seen.insert(*client);
            }
            VisRecord::Neighbor { .. } => {}
        }
    }
    for mac in seen {
        if let Some(key) = store.key_for_alias(&mac) {
            store.mark_online(key, now);
        }
    }
}

/// Merge static alias records. Creates offline placeholder nodes for
/// addresses nothing else has reported yet.
pub fn import_aliases(
    store: &mut NodeStore,
    aliases: &BTreeMap<MacAddress, AliasRecord>,
) -> ImportReport {
    let mut report = ImportReport::default();
    for (mac, alias) in aliases {
        let key = match store.resolve(&[*mac]) {
            Ok(key) => key,
            Err(err) => {
                warn!("alias record {mac}: {err}");
                report.conflict(err);
                continue;
            }
        };

        let node = store.get_mut(key);
        if alias.name.is_some() || alias.gps.is_some() || alias.firmware.is_some() {
            let info = node.nodeinfo.get_or_insert_with(NodeInfo::default);
            if let Some(name) = &alias.name {
                info.hostname = Some(name.clone());
            }
            if let Some(gps) = &alias.gps {
                match parse_gps(gps) {
                    Some(location) => info.location = Some(location),
                    None => debug!("alias record {mac}: unusable gps {gps:?}"),
                }
            }
            if let Some(firmware) = &alias.firmware {
                let software = info.software.get_or_insert_with(Software::default);
                let entry = software.firmware.get_or_insert_with(Firmware::default);
                entry.release = Some(firmware.clone());
            }
        }
        if alias.vpn == Some(true) {
            node.vpn_interfaces.insert(*mac);
        }
        if let Some(id) = alias.id {
            store.set_primary_id(key, id);
        }
        report.imported += 1;
    }
    report
}

fn parse_gps(gps: &str) -> Option<Location> {
    let mut parts = gps.split_whitespace();
    let latitude = parts.next()?.parse().ok()?;
    let longitude = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Location { latitude, longitude })
}
