//! Integration tests for the mesh map backend.
//!
//! These drive a full processing cycle over in-memory telemetry records
//! and over files on disk, the way the binary runs one invocation.

use meshmap::config::HistoryConfig;
use meshmap::export;
use meshmap::graph::RawGraph;
use meshmap::import;
use meshmap::mac::MacAddress;
use meshmap::models::{LinkType, NetworkInfo, NodeInfo, NodeInfoRecord, StatisticsRecord, VisRecord};
use meshmap::storage::History;
use meshmap::store::NodeStore;

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tempfile::TempDir;

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn nodeinfo_record(node_id: &str, hostname: &str) -> NodeInfoRecord {
    NodeInfoRecord {
        node_id: mac(node_id),
        info: NodeInfo {
            hostname: Some(hostname.to_string()),
            network: Some(NetworkInfo {
                mac: Some(mac(node_id)),
                mesh_interfaces: [mac(node_id)].into_iter().collect(),
            }),
            ..Default::default()
        },
    }
}

/// The documented minimal scenario: an interface pairing, one directed
/// neighbor observation, and a node-info record for the router.
#[test]
fn test_minimal_snapshot_builds_one_node_then_one_link() {
    let now = ts("2026-08-04T12:00:00Z");
    let mut store = NodeStore::new();

    let vis = [
        VisRecord::Primary { primary: mac("aa:00:00:00:00:11") },
        VisRecord::Secondary {
            secondary: mac("aa:00:00:00:00:12"),
            of: mac("aa:00:00:00:00:11"),
        },
        VisRecord::Neighbor {
            router: mac("aa:00:00:00:00:11"),
            neighbor: mac("bb:00:00:00:00:21"),
            quality: 200.0,
        },
    ];

    import::import_nodeinfo(
        &mut store,
        &[nodeinfo_record("aa:00:00:00:00:11", "router-one")],
        now,
        true,
    );
    import::import_mesh_interfaces(&mut store, &vis);
    import::mark_vis_online(&mut store, &vis, now);

    // Only the router is known: its secondary folds in, the neighbor
    // cannot contribute a link yet.
    assert_eq!(store.len(), 1);
    let key = store.key_for_alias(&mac("aa:00:00:00:00:12")).unwrap();
    assert_eq!(store.get(key).id(), mac("aa:00:00:00:00:11"));
    assert!(store.get(key).aliases.contains(&mac("aa:00:00:00:00:12")));

    let graph = RawGraph::build(&vis, &mut store);
    assert!(graph.reduce(&store).links.is_empty());

    // Once the neighbor is known as well, exactly one undirected link
    // appears.
    import::import_nodeinfo(
        &mut store,
        &[nodeinfo_record("bb:00:00:00:00:21", "router-two")],
        now,
        true,
    );
    let graph = RawGraph::build(&vis, &mut store);
    let topology = graph.reduce(&store);

    assert_eq!(topology.links.len(), 1);
    let link = &topology.links[0];
    assert_eq!(link.source, mac("aa:00:00:00:00:11"));
    assert_eq!(link.target, mac("bb:00:00:00:00:21"));
    assert_eq!(link.quality, 200.0);
    assert_eq!(link.link_type, LinkType::Mesh);
    assert!(!link.bidirectional);
}

#[test]
fn test_full_cycle_over_files() {
    let temp_dir = TempDir::new().unwrap();
    let nodes_path = temp_dir.path().join("nodes.json");
    let graph_path = temp_dir.path().join("graph.json");
    let now = ts("2026-08-04T12:00:00Z");

    let nodeinfo = [
        nodeinfo_record("aa:00:00:00:00:11", "alpha"),
        nodeinfo_record("bb:00:00:00:00:21", "bravo"),
        nodeinfo_record("cc:00:00:00:00:31", "charlie"),
    ];
    let statistics = [StatisticsRecord {
        node_id: mac("aa:00:00:00:00:11"),
        data: json!({"clients": {"total": 5}, "uptime": 3600.0, "memory": {"free": 1, "total": 4}}),
    }];
    let vis = [
        VisRecord::Primary { primary: mac("aa:00:00:00:00:11") },
        VisRecord::Primary { primary: mac("bb:00:00:00:00:21") },
        VisRecord::Primary { primary: mac("cc:00:00:00:00:31") },
        VisRecord::Neighbor {
            router: mac("aa:00:00:00:00:11"),
            neighbor: mac("bb:00:00:00:00:21"),
            quality: 5.0,
        },
        VisRecord::Neighbor {
            router: mac("aa:00:00:00:00:11"),
            neighbor: mac("bb:00:00:00:00:21"),
            quality: 9.0,
        },
        VisRecord::Neighbor {
            router: mac("bb:00:00:00:00:21"),
            neighbor: mac("aa:00:00:00:00:11"),
            quality: 7.0,
        },
        VisRecord::Neighbor {
            router: mac("bb:00:00:00:00:21"),
            neighbor: mac("cc:00:00:00:00:31"),
            quality: 250.0,
        },
        VisRecord::Client {
            router: mac("aa:00:00:00:00:11"),
            client: mac("ee:ee:ee:00:00:01"),
        },
    ];
    let gateways = [mac("bb:00:00:00:00:21")];

    let mut store = NodeStore::new();
    import::import_nodeinfo(&mut store, &nodeinfo, now, true);
    import::reset_statistics(&mut store);
    import::import_statistics(&mut store, &statistics);
    import::import_mesh_interfaces(&mut store, &vis);
    import::mark_vis_online(&mut store, &vis, now);
    import::import_gateways(&mut store, &gateways);

    let mut graph = RawGraph::build(&vis, &mut store);
    let vpn: BTreeSet<MacAddress> = [mac("cc:00:00:00:00:31")].into_iter().collect();
    graph.mark_vpn(&vpn);
    let topology = graph.reduce(&store);

    // Worst quality per direction, best direction across: min(5, 9) then
    // max(5, 7).
    assert_eq!(topology.links.len(), 2);
    let ab = topology.links.iter().find(|l| l.target == mac("bb:00:00:00:00:21")).unwrap();
    assert_eq!(ab.quality, 7.0);
    assert!(ab.bidirectional);

    // Everything shares one component with the tunnel interface, so the
    // flood reaches both links.
    let bc = topology.links.iter().find(|l| l.target == mac("cc:00:00:00:00:31")).unwrap();
    assert!(bc.vpn);
    assert!(ab.vpn);
    assert_eq!(bc.link_type, LinkType::Vpn);
    assert!(!bc.bidirectional);

    // Client edge is counted but absent from the topology.
    let key = store.key_for_alias(&mac("aa:00:00:00:00:11")).unwrap();
    assert_eq!(store.get(key).client_count, 1);
    assert!(topology.links.iter().all(|l| l.link_type != LinkType::Client));
    // Self-reported client total wins over the derived count.
    assert_eq!(store.get(key).statistics.clients, Some(5));

    assert!(store.get(key).statistics.memory_usage.unwrap() > 0.74);
    let gw = store.key_for_alias(&mac("bb:00:00:00:00:21")).unwrap();
    assert!(store.get(gw).flags.gateway);

    // Persist and reload as the next cycle would.
    export::write_node_db(&nodes_path, &store.snapshot(now)).unwrap();
    export::write_topology(&graph_path, &store, &topology).unwrap();

    let reloaded = export::load_node_db(&nodes_path).unwrap();
    let (mut next_store, skipped) = NodeStore::restore(&reloaded);
    assert_eq!(skipped, 0);
    assert_eq!(next_store.len(), 3);

    // The next cycle starts with nothing confirmed online.
    next_store.reset_flags();
    assert_eq!(next_store.online_count(), 0);
    let key = next_store.key_for_alias(&mac("aa:00:00:00:00:11")).unwrap();
    assert_eq!(next_store.get(key).last_seen, Some(now));

    let links = export::read_topology(&graph_path).unwrap();
    assert_eq!(links.len(), 2);
}

#[test]
fn test_offline_nodes_survive_until_pruned() {
    let now = ts("2026-08-04T12:00:00Z");
    let later = ts("2026-08-20T12:00:00Z");
    let mut store = NodeStore::new();

    import::import_nodeinfo(
        &mut store,
        &[nodeinfo_record("aa:00:00:00:00:11", "alpha")],
        now,
        true,
    );

    // Next cycle: the node is not re-confirmed.
    store.reset_flags();
    assert_eq!(store.online_count(), 0);
    assert_eq!(store.len(), 1);

    // Within retention it stays; past retention it goes.
    assert_eq!(store.prune(later, 30), 0);
    assert_eq!(store.prune(later, 14), 1);
    assert!(store.is_empty());
}

#[test]
fn test_history_records_cycle_aggregates() {
    let temp_dir = TempDir::new().unwrap();
    let config = HistoryConfig {
        enabled: true,
        path: temp_dir.path().join("history.db"),
        pool_size: 2,
        retention_days: 30,
        enable_wal: false,
    };
    let now = ts("2026-08-04T12:00:00Z");

    let mut store = NodeStore::new();
    import::import_nodeinfo(
        &mut store,
        &[
            nodeinfo_record("aa:00:00:00:00:11", "alpha"),
            nodeinfo_record("bb:00:00:00:00:21", "bravo"),
        ],
        now,
        true,
    );
    import::reset_statistics(&mut store);
    let key = store.key_for_alias(&mac("aa:00:00:00:00:11")).unwrap();
    store.get_mut(key).statistics.clients = Some(4);

    let history = History::new(&config).unwrap();
    history.record_cycle(now, &store).unwrap();

    assert_eq!(history.cycle_count().unwrap(), 1);
    assert_eq!(history.sample_count().unwrap(), 2);
    assert_eq!(history.cleanup(config.retention_days).unwrap(), 0);
}

#[test]
fn test_alias_files_enrich_persisted_state() {
    let temp_dir = TempDir::new().unwrap();
    let alias_path: PathBuf = temp_dir.path().join("aliases.json");
    std::fs::write(
        &alias_path,
        r#"{"aa:00:00:00:00:11": {"name": "rooftop", "gps": "53.56 10.00", "vpn": true}}"#,
    )
    .unwrap();
    let now = ts("2026-08-04T12:00:00Z");

    let mut store = NodeStore::new();
    import::import_nodeinfo(
        &mut store,
        &[nodeinfo_record("aa:00:00:00:00:11", "alpha")],
        now,
        true,
    );

    let aliases = meshmap::collect::read_alias_file(&alias_path).unwrap();
    let report = import::import_aliases(&mut store, &aliases);
    assert_eq!(report.imported, 1);

    let key = store.key_for_alias(&mac("aa:00:00:00:00:11")).unwrap();
    // The static name overrides the self-reported one.
    assert_eq!(store.get(key).hostname(), Some("rooftop"));
    assert!(store.vpn_interfaces().contains(&mac("aa:00:00:00:00:11")));

    // The enriched state round-trips through the node database.
    let nodes_path = temp_dir.path().join("nodes.json");
    export::write_node_db(&nodes_path, &store.snapshot(now)).unwrap();
    let (restored, _) = NodeStore::restore(&export::load_node_db(&nodes_path).unwrap());
    let key = restored.key_for_alias(&mac("aa:00:00:00:00:11")).unwrap();
    assert_eq!(restored.get(key).hostname(), Some("rooftop"));
    assert!(restored.vpn_interfaces().contains(&mac("aa:00:00:00:00:11")));
}
