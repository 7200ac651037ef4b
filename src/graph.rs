//! Raw link graph and its reduction into the exported topology.
//!
//! The routing snapshot is first projected into a directed, possibly
//! multi-edge graph keyed by raw interface addresses. Reduction then runs
//! in four steps: VPN flood over connected components, folding of
//! interfaces onto their canonical nodes, a conservative directed merge
//! (worst quality wins), and an optimistic undirected merge (best
//! direction wins).

use crate::identity::NodeKey;
use crate::mac::MacAddress;
use crate::models::{link_id, LinkType, TopologyLink, VisRecord};
use crate::store::NodeStore;
use itertools::Itertools;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One raw directed observation between two interfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub source: MacAddress,
    pub target: MacAddress,
    pub quality: f64,
    pub vpn: bool,
    /// Client edges attach an end-user device; they are counted but never
    /// merged into the topology.
    pub client: bool,
}

/// Directed multigraph of raw interface observations.
#[derive(Debug, Default)]
pub struct RawGraph {
    /// Interface → its declared primary interface.
    primaries: HashMap<MacAddress, MacAddress>,
    edges: Vec<RawEdge>,
}

/// The reduced, undirected link set.
#[derive(Debug, Default)]
pub struct Topology {
    pub links: Vec<TopologyLink>,
}

impl RawGraph {
    /// Project one routing snapshot into the raw graph.
    ///
    /// Client entries are resolved against the store: addresses that look
    /// like another interface of the serving node are folded in as aliases,
    /// everything else becomes a client pseudo-edge and is tallied into the
    /// serving node's client count. Entries whose serving node is unknown
    /// are dropped.
    pub fn build(vis: &[VisRecord], store: &mut NodeStore) -> RawGraph {
        let mut graph = RawGraph::default();
        let mut client_counts: HashMap<NodeKey, u32> = HashMap::new();

        for record in vis {
            match record {
                VisRecord::Primary { primary } => {
                    graph.primaries.insert(*primary, *primary);
                }
                VisRecord::Secondary { secondary, of } => {
                    graph.primaries.insert(*secondary, *of);
                    graph.primaries.entry(*of).or_insert(*of);
                }
                VisRecord::Neighbor { router, neighbor, quality } => {
                    graph.edges.push(RawEdge {
                        source: *router,
                        target: *neighbor,
                        quality: *quality,
                        vpn: false,
                        client: false,
                    });
                }
                VisRecord::Client { router, client } => {
                    let Some(key) = store.key_for_alias(router) else {
                        debug!("client entry for unknown router {router} dropped");
                        continue;
                    };
                    if router.likely_same_node(client) {
                        // Another address of the node itself, not a client.
                        store.add_alias(key, *client);
                    } else {
                        *client_counts.entry(key).or_default() += 1;
                        graph.edges.push(RawEdge {
                            source: *router,
                            target: *client,
                            quality: 0.0,
                            vpn: false,
                            client: true,
                        });
                    }
                }
            }
        }

        for (key, count) in client_counts {
            store.import_client_count(key, count);
        }
        graph
    }

    pub fn edges(&self) -> &[RawEdge] {
        &self.edges
    }

    /// Flood-fill the vpn flag over the weakly-connected components of the
    /// non-client edge set. Every component containing a known tunnel
    /// interface has all of its edges flagged.
    ///
    /// Runs to a fixed point; flags only ever flip false → true, so the
    /// loop is bounded by the edge count.
    pub fn mark_vpn(&mut self, vpn_interfaces: &BTreeSet<MacAddress>) {
        let mut tainted: HashSet<MacAddress> = vpn_interfaces.iter().copied().collect();
        loop {
            let mut changed = false;
            for edge in self.edges.iter_mut().filter(|edge| !edge.client) {
                if tainted.contains(&edge.source) || tainted.contains(&edge.target) {
                    changed |= tainted.insert(edge.source);
                    changed |= tainted.insert(edge.target);
                    if !edge.vpn {
                        edge.vpn = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Collapse the raw graph onto canonical node ids and merge parallel
    /// observations into one undirected link per node pair.
    pub fn reduce(&self, store: &NodeStore) -> Topology {
        let canonical = |interface: &MacAddress| -> Option<NodeKey> {
            let primary = self.primaries.get(interface).unwrap_or(interface);
            store.key_for_alias(primary).or_else(|| store.key_for_alias(interface))
        };

        // Fold interfaces onto nodes, keeping all parallel edges, then
        // merge each ordered pair: worst quality, vpn only if every
        // observation agreed.
        let directed: BTreeMap<(MacAddress, MacAddress), (f64, bool)> = self
            .edges
            .iter()
            .filter(|edge| !edge.client)
            .filter_map(|edge| {
                let source = canonical(&edge.source)?;
                let target = canonical(&edge.target)?;
                if source == target {
                    return None;
                }
                let pair = (store.get(source).id(), store.get(target).id());
                Some((pair, (edge.quality, edge.vpn)))
            })
            .into_group_map()
            .into_iter()
            .map(|(pair, observations)| {
                let quality = observations.iter().map(|(q, _)| *q).fold(f64::INFINITY, f64::min);
                let vpn = observations.iter().all(|(_, vpn)| *vpn);
                (pair, (quality, vpn))
            })
            .collect();

        // Combine the two directions of each pair: best direction wins,
        // vpn only if both agreed.
        let mut links = Vec::new();
        let mut seen: HashSet<(MacAddress, MacAddress)> = HashSet::new();
        for (&(a, b), &(quality, vpn)) in &directed {
            let pair = if a <= b { (a, b) } else { (b, a) };
            if !seen.insert(pair) {
                continue;
            }
            let (quality, vpn, bidirectional) = match directed.get(&(b, a)) {
                Some(&(reverse_quality, reverse_vpn)) => {
                    (quality.max(reverse_quality), vpn && reverse_vpn, true)
                }
                None => (quality, vpn, false),
            };
            links.push(TopologyLink {
                id: link_id(&pair.0, &pair.1),
                source: pair.0,
                target: pair.1,
                quality,
                link_type: if vpn { LinkType::Vpn } else { LinkType::Mesh },
                vpn,
                bidirectional,
            });
        }
        links.sort_by(|x, y| x.id.cmp(&y.id));
        Topology { links }
    }
}
