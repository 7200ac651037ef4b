use crate::identity::{AmbiguityError, IdentityIndex, NodeKey, Resolution};
use crate::mac::MacAddress;
use crate::models::{Node, Statistics};
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Serialized form of the node database, written at the end of a cycle and
/// read back at the start of the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDb {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub nodes: BTreeMap<MacAddress, Node>,
}

/// Owns all node records of one processing cycle.
///
/// Nodes live in an arena and are addressed by [`NodeKey`]; all mutation
/// goes through the identity index, which is never handed out for external
/// modification.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: Vec<Node>,
    index: IdentityIndex,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeKey(i), node))
    }

    pub fn get(&self, key: NodeKey) -> &Node {
        &self.nodes[key.index()]
    }

    pub fn get_mut(&mut self, key: NodeKey) -> &mut Node {
        &mut self.nodes[key.index()]
    }

    pub fn key_for_alias(&self, alias: &MacAddress) -> Option<NodeKey> {
        self.index.get(alias)
    }

    pub fn lookup(&self, aliases: &[MacAddress]) -> Resolution {
        self.index.lookup(aliases)
    }

    /// Resolve `aliases` to an existing node, or create one whose id is the
    /// first alias. Afterwards every given alias is registered as pointing
    /// to the resolved node. `aliases` must be non-empty.
    pub fn resolve(&mut self, aliases: &[MacAddress]) -> Result<NodeKey, AmbiguityError> {
        let key = match self.index.lookup(aliases) {
            Resolution::Found(key) => key,
            Resolution::Ambiguous(err) => return Err(err),
            Resolution::NotFound => {
                let key = NodeKey(self.nodes.len());
                self.nodes.push(Node::new(aliases[0]));
                key
            }
        };
        for alias in aliases {
            self.add_alias(key, *alias);
        }
        Ok(key)
    }

    /// Resolve and deep-merge a partial payload into the node's opaque
    /// attribute bag.
    pub fn upsert_node(
        &mut self,
        aliases: &[MacAddress],
        attrs: Option<&Map<String, Value>>,
    ) -> Result<NodeKey, AmbiguityError> {
        let key = self.resolve(aliases)?;
        if let Some(attrs) = attrs {
            self.nodes[key.index()].merge_extra(attrs);
        }
        Ok(key)
    }

    pub fn add_alias(&mut self, key: NodeKey, alias: MacAddress) {
        self.index.register(alias, key);
        self.nodes[key.index()].aliases.insert(alias);
    }

    pub fn mark_online(&mut self, key: NodeKey, now: DateTime<Utc>) {
        self.nodes[key.index()].mark_online(now);
    }

    /// Flag the node known under `alias` as a gateway. Returns false when
    /// the alias is unknown.
    pub fn mark_gateway(&mut self, alias: &MacAddress) -> bool {
        match self.index.get(alias) {
            Some(key) => {
                self.nodes[key.index()].flags.gateway = true;
                true
            }
            None => false,
        }
    }

    /// Override a node's primary id with an explicitly configured one.
    pub fn set_primary_id(&mut self, key: NodeKey, id: MacAddress) {
        self.nodes[key.index()].set_id(id);
        self.index.register(id, key);
    }

    /// Start-of-cycle reset: nothing is online until a source confirms it.
    pub fn reset_flags(&mut self) {
        for node in &mut self.nodes {
            node.flags.online = false;
        }
    }

    pub fn reset_statistics(&mut self) {
        for node in &mut self.nodes {
            node.statistics = Statistics::reset();
        }
    }

    /// Record the routing-snapshot-derived client count for a node. The
    /// self-reported statistics value, when present, takes precedence for
    /// the statistics category.
    pub fn import_client_count(&mut self, key: NodeKey, count: u32) {
        let node = &mut self.nodes[key.index()];
        node.client_count = count;
        if node.statistics.clients.is_none() {
            node.statistics.clients = Some(count as u64);
        }
    }

    /// Remove nodes whose `last_seen` age is at least `retention_days`, and
    /// nodes that were never seen online at all. Outstanding [`NodeKey`]s
    /// are invalidated.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: u64) -> usize {
        let cutoff = now - Duration::days(retention_days as i64);
        let before = self.nodes.len();
        self.nodes.retain(|node| node.last_seen.map(|seen| seen > cutoff).unwrap_or(false));

        self.index = IdentityIndex::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let key = NodeKey(i);
            for alias in &node.aliases {
                self.index.register(*alias, key);
            }
            self.index.register(node.id(), key);
        }
        before - self.nodes.len()
    }

    pub fn online_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.flags.online).count()
    }

    /// Total clients served by online nodes; falls back to the
    /// snapshot-derived count where statistics reported none.
    pub fn client_total(&self) -> u64 {
        self.nodes
            .iter()
            .filter(|node| node.flags.online)
            .map(|node| node.statistics.clients.unwrap_or(node.client_count as u64))
            .sum()
    }

    /// Union of all interfaces flagged as tunnel endpoints.
    pub fn vpn_interfaces(&self) -> BTreeSet<MacAddress> {
        self.nodes.iter().flat_map(|node| node.vpn_interfaces.iter().copied()).collect()
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> NodeDb {
        NodeDb {
            timestamp,
            nodes: self
                .nodes
                .iter()
                .filter(|node| !node.flags.client)
                .map(|node| (node.id(), node.clone()))
                .collect(),
        }
    }

    /// Rebuild a store from a persisted database. Nodes whose aliases
    /// collide with an already-restored node are dropped with a warning;
    /// the count of dropped nodes is returned.
    pub fn restore(db: &NodeDb) -> (NodeStore, usize) {
        let mut store = NodeStore::new();
        let mut skipped = 0;
        for node in db.nodes.values() {
            let aliases: Vec<MacAddress> = node.aliases.iter().copied().collect();
            match store.index.lookup(&aliases) {
                Resolution::NotFound => {
                    let key = NodeKey(store.nodes.len());
                    store.nodes.push(node.clone());
                    for alias in &aliases {
                        store.index.register(*alias, key);
                    }
                    store.index.register(node.id(), key);
                }
                _ => {
                    warn!("dropping persisted node {} with conflicting aliases", node.id());
                    skipped += 1;
                }
            }
        }
        (store, skipped)
    }
}
