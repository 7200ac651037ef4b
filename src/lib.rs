// Mesh network map backend
//
// This library merges periodic snapshots of a mesh network's topology and
// per-node telemetry from several independent, unreliable sources into one
// canonical, deduplicated node and link graph:
// 1. Collecting neighbor snapshots, self-reported node data and static
//    alias lists (routing daemon tools, distributed fact tables, files)
// 2. Resolving the many addresses a node is known under onto one record
// 3. Reducing the raw multi-edge link graph into a simplified, VPN-aware,
//    undirected topology
// 4. Persisting the node database and topology as JSON and recording
//    per-cycle statistics into a local history database

pub mod collect;
pub mod config;
pub mod export;
pub mod graph;
pub mod identity;
pub mod import;
pub mod mac;
pub mod models;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use config::BackendConfig;
pub use graph::{RawGraph, Topology};
pub use identity::{AmbiguityError, IdentityIndex, NodeKey, Resolution};
pub use mac::MacAddress;
pub use models::{Node, NodeFlags, NodeInfoRecord, StatisticsRecord, TopologyLink, VisRecord};
pub use storage::History;
pub use store::{NodeDb, NodeStore};
