//! JSON outputs of a processing cycle: the node database (which doubles as
//! the persisted state for the next cycle), the reduced topology in a d3
//! node-link layout, and a bat-hosts style name table.

use crate::graph::Topology;
use crate::mac::MacAddress;
use crate::models::{LinkType, TopologyLink};
use crate::store::{NodeDb, NodeStore};
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Write the node database. The same file is read back by
/// [`load_node_db`] at the start of the next cycle.
pub fn write_node_db(path: &Path, db: &NodeDb) -> ExportResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), db)?;
    info!("wrote {} nodes to {:?}", db.nodes.len(), path);
    Ok(())
}

/// Load the persisted node database. A missing or unreadable file starts
/// the cycle from an empty state rather than failing the run.
pub fn load_node_db(path: &Path) -> Option<NodeDb> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("ignoring unreadable node database {path:?}: {err}");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(db) => Some(db),
        Err(err) => {
            warn!("ignoring node database {path:?} in unknown format: {err}");
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    batadv: GraphExport,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphExport {
    directed: bool,
    multigraph: bool,
    graph: Map<String, Value>,
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphNode {
    id: MacAddress,
}

/// One topology link with its endpoints as indexes into the node list.
#[derive(Debug, Serialize, Deserialize)]
struct GraphLink {
    source: usize,
    target: usize,
    quality: f64,
    #[serde(rename = "type")]
    link_type: LinkType,
    vpn: bool,
    bidirectional: bool,
    id: String,
}

/// Write the reduced topology as a d3 node-link document.
pub fn write_topology(path: &Path, store: &NodeStore, topology: &Topology) -> ExportResult<()> {
    let ids: Vec<MacAddress> = store
        .iter()
        .filter(|(_, node)| !node.flags.client)
        .map(|(_, node)| node.id())
        .sorted()
        .collect();
    let positions: HashMap<MacAddress, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let links = topology
        .links
        .iter()
        .filter_map(|link| {
            let source = *positions.get(&link.source)?;
            let target = *positions.get(&link.target)?;
            Some(GraphLink {
                source,
                target,
                quality: link.quality,
                link_type: link.link_type,
                vpn: link.vpn,
                bidirectional: link.bidirectional,
                id: link.id.clone(),
            })
        })
        .collect();

    let document = GraphFile {
        batadv: GraphExport {
            directed: false,
            multigraph: false,
            graph: Map::new(),
            nodes: ids.into_iter().map(|id| GraphNode { id }).collect(),
            links,
        },
    };

    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), &document)?;
    info!("wrote {} links to {:?}", topology.links.len(), path);
    Ok(())
}

/// Write a bat-hosts style name table: one `<address> <name>` row per alias
/// of every named node.
pub fn write_bat_hosts(path: &Path, store: &NodeStore) -> ExportResult<()> {
    let mut out = String::new();
    for (_, node) in store.iter() {
        let Some(name) = node.hostname() else { continue };
        for alias in &node.aliases {
            out.push_str(&format!("{alias} {name}\n"));
        }
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Read back the links of a topology document, mostly for tooling and
/// tests.
pub fn read_topology(path: &Path) -> ExportResult<Vec<TopologyLink>> {
    let contents = std::fs::read_to_string(path)?;
    let document: GraphFile = serde_json::from_str(&contents)?;
    let nodes = document.batadv.nodes;
    Ok(document
        .batadv
        .links
        .into_iter()
        .filter_map(|link| {
            let source = nodes.get(link.source)?.id;
            let target = nodes.get(link.target)?.id;
            Some(TopologyLink {
                id: link.id,
                source,
                target,
                quality: link.quality,
                link_type: link.link_type,
                vpn: link.vpn,
                bidirectional: link.bidirectional,
            })
        })
        .collect())
}
