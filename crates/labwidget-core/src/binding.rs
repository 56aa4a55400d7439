//! Binding graph between properties of different objects.
//!
//! A binding declares "target follows source". Internally every binding is
//! stored as one-way edges: a [`BindMode::OneWay`] binding owns one edge
//! `source -> target`, a [`BindMode::Mirror`] binding owns that edge plus the
//! reverse `target -> source`, both created and removed together. Traversal
//! therefore never needs to special-case bidirectional links.
//!
//! Cycle safety comes from [`PropagationPass`]: each pass remembers every
//! `(object, property)` pair it has already written, and a value that arrives
//! at a visited pair is dropped. Combined with the store's equality
//! short-circuit, chains of mirror bindings settle in a single pass.
//!
//! # Key Types
//!
//! - [`BindingGraph`] - Edge storage and adjacency
//! - [`BindingId`] - Handle returned by [`BindingGraph::add`]
//! - [`BindMode`] - Mirror or one-way
//! - [`PropagationPass`] - Per-pass visited set

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

use crate::error::{Result, SyncError};
use crate::logging::targets;
use crate::object::ObjectId;
use crate::property::PropertyKey;

new_key_type! {
    /// Identifier of a declared binding (one or two edges).
    pub struct BindingId;

    /// Identifier of a single directed edge.
    struct EdgeId;
}

/// Direction semantics of a binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    /// Changes flow both ways.
    #[default]
    Mirror,
    /// Changes flow from source to target only.
    OneWay,
}

#[derive(Debug, Clone)]
struct Edge {
    source: PropertyKey,
    target: PropertyKey,
}

#[derive(Debug)]
struct BindingRecord {
    mode: BindMode,
    source: PropertyKey,
    target: PropertyKey,
    edges: Vec<EdgeId>,
}

/// Public description of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    /// The property values are copied from at bind time.
    pub source: PropertyKey,
    /// The property that follows the source.
    pub target: PropertyKey,
    /// Mirror or one-way.
    pub mode: BindMode,
}

/// Directed edges between properties.
#[derive(Debug, Default)]
pub struct BindingGraph {
    bindings: SlotMap<BindingId, BindingRecord>,
    edges: SlotMap<EdgeId, Edge>,
    outgoing: HashMap<PropertyKey, Vec<EdgeId>>,
}

impl BindingGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `target` follows `source`.
    ///
    /// Fails if the two keys are equal or if any edge the binding needs
    /// already exists. The caller performs the initial value sync.
    pub fn add(
        &mut self,
        target: PropertyKey,
        source: PropertyKey,
        mode: BindMode,
    ) -> Result<BindingId> {
        if target == source {
            return Err(SyncError::SelfBinding {
                object: target.object(),
                name: target.name().to_string(),
            });
        }
        let duplicate = self.has_edge(&source, &target)
            || (mode == BindMode::Mirror && self.has_edge(&target, &source));
        if duplicate {
            return Err(SyncError::DuplicateBinding {
                target: target.to_string(),
                source_name: source.to_string(),
            });
        }

        let mut edges = vec![self.insert_edge(source.clone(), target.clone())];
        if mode == BindMode::Mirror {
            edges.push(self.insert_edge(target.clone(), source.clone()));
        }
        let id = self.bindings.insert(BindingRecord {
            mode,
            source: source.clone(),
            target: target.clone(),
            edges,
        });
        tracing::debug!(target: targets::BINDING, %source, %target, ?mode, "binding added");
        Ok(id)
    }

    /// Remove a binding and all of its edges.
    pub fn remove(&mut self, id: BindingId) -> Result<BindingInfo> {
        let record = self.bindings.remove(id).ok_or(SyncError::UnknownBinding)?;
        for edge_id in &record.edges {
            self.remove_edge(*edge_id);
        }
        tracing::debug!(target: targets::BINDING, source = %record.source, target = %record.target, "binding removed");
        Ok(BindingInfo {
            source: record.source,
            target: record.target,
            mode: record.mode,
        })
    }

    /// Remove every binding with an endpoint on `object`.
    pub fn remove_object(&mut self, object: ObjectId) -> Vec<BindingInfo> {
        let doomed: Vec<BindingId> = self
            .bindings
            .iter()
            .filter(|(_, r)| r.source.object() == object || r.target.object() == object)
            .map(|(id, _)| id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.remove(id).ok())
            .collect()
    }

    /// Describe a binding.
    pub fn info(&self, id: BindingId) -> Option<BindingInfo> {
        self.bindings.get(id).map(|r| BindingInfo {
            source: r.source.clone(),
            target: r.target.clone(),
            mode: r.mode,
        })
    }

    /// Properties that directly follow `key`, in edge creation order.
    pub fn targets_of(&self, key: &PropertyKey) -> Vec<PropertyKey> {
        self.outgoing
            .get(key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.edges.get(*id))
                    .map(|edge| edge.target.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate over all bindings.
    pub fn iter(&self) -> impl Iterator<Item = (BindingId, BindingInfo)> + '_ {
        self.bindings.iter().map(|(id, r)| {
            (
                id,
                BindingInfo {
                    source: r.source.clone(),
                    target: r.target.clone(),
                    mode: r.mode,
                },
            )
        })
    }

    /// Number of declared bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Number of directed edges (mirror bindings count twice).
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn has_edge(&self, source: &PropertyKey, target: &PropertyKey) -> bool {
        self.outgoing.get(source).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| self.edges.get(*id))
                .any(|edge| &edge.target == target)
        })
    }

    fn insert_edge(&mut self, source: PropertyKey, target: PropertyKey) -> EdgeId {
        let outgoing_key = source.clone();
        let id = self.edges.insert(Edge { source, target });
        self.outgoing.entry(outgoing_key).or_default().push(id);
        id
    }

    fn remove_edge(&mut self, id: EdgeId) {
        let Some(edge) = self.edges.remove(id) else {
            return;
        };
        if let Some(ids) = self.outgoing.get_mut(&edge.source) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.outgoing.remove(&edge.source);
            }
        }
    }
}

/// Bookkeeping for one propagation pass.
///
/// A pass starts at a single originating write and ends when every hop it
/// triggered has been applied and every callback it queued has run.
#[derive(Debug, Default)]
pub struct PropagationPass {
    visited: HashSet<PropertyKey>,
    hops: usize,
}

impl PropagationPass {
    /// Start a fresh pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as visited. Returns `false` if it already was.
    pub fn visit(&mut self, key: &PropertyKey) -> bool {
        if self.visited.contains(key) {
            return false;
        }
        self.visited.insert(key.clone());
        self.hops += 1;
        true
    }

    /// Whether `key` has been visited in this pass.
    pub fn has_visited(&self, key: &PropertyKey) -> bool {
        self.visited.contains(key)
    }

    /// Number of distinct pairs visited so far.
    pub fn hops(&self) -> usize {
        self.hops
    }
}
