use crate::mac::MacAddress;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A set of aliases would merge two nodes that are already distinct.
///
/// Never resolved silently: the offending record is skipped and the
/// conflicting identifiers are handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ambiguous identifiers: {first}, {second}")]
pub struct AmbiguityError {
    /// The alias that matched first.
    pub first: MacAddress,
    /// The alias that matched a different node.
    pub second: MacAddress,
}

/// Stable handle of a node in the store's arena for one processing cycle.
///
/// Keys are invalidated by [`NodeStore::prune`](crate::store::NodeStore::prune);
/// don't hold them across a pruning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

impl NodeKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Outcome of an alias lookup. All three cases must be handled explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(NodeKey),
    NotFound,
    Ambiguous(AmbiguityError),
}

/// Maps every known alias to the node it belongs to.
///
/// Scoped to one processing cycle and owned by the store; importers never
/// mutate the alias map directly.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    aliases: HashMap<MacAddress, NodeKey>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search the given aliases, in order, against the known mappings.
    ///
    /// Returns [`Resolution::Ambiguous`] as soon as two aliases resolve to
    /// two distinct nodes; the error names the first matching alias and the
    /// conflicting one.
    pub fn lookup(&self, aliases: &[MacAddress]) -> Resolution {
        let mut found: Option<(MacAddress, NodeKey)> = None;
        for alias in aliases {
            if let Some(&key) = self.aliases.get(alias) {
                match found {
                    Some((first, existing)) if existing != key => {
                        return Resolution::Ambiguous(AmbiguityError { first, second: *alias });
                    }
                    Some(_) => {}
                    None => found = Some((*alias, key)),
                }
            }
        }
        match found {
            Some((_, key)) => Resolution::Found(key),
            None => Resolution::NotFound,
        }
    }

    pub fn get(&self, alias: &MacAddress) -> Option<NodeKey> {
        self.aliases.get(alias).copied()
    }

    pub fn contains(&self, alias: &MacAddress) -> bool {
        self.aliases.contains_key(alias)
    }

    pub(crate) fn register(&mut self, alias: MacAddress, key: NodeKey) {
        self.aliases.insert(alias, key);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Merge `partial` into `dest`, recursing into nested maps.
///
/// Non-map leaves are overwritten; fields of `dest` absent from `partial`
/// are left untouched. The destination tree is never replaced wholesale.
pub fn deep_merge(dest: &mut Value, partial: &Value) {
    match (dest, partial) {
        (Value::Object(dest_map), Value::Object(partial_map)) => {
            for (k, v) in partial_map {
                match dest_map.get_mut(k) {
                    Some(existing) if existing.is_object() && v.is_object() => {
                        deep_merge(existing, v);
                    }
                    _ => {
                        dest_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (dest_slot, _) => *dest_slot = partial.clone(),
    }
}
