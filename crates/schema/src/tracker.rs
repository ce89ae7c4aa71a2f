//! Reference tracker: the sole owner of every live node in the state graph.
//!
//! Nodes are held by refId. User code only sees transient views produced
//! during callback dispatch; anything durable must be copied out. A node's
//! count drops via [`RefTracker::remove`]; ids that reach zero are queued
//! and reclaimed by the next [`RefTracker::gc`] pass, which recurses into
//! schema-valued fields and collection items.

use nohash_hasher::IntMap;

use crate::collections::{ArraySchema, MapSchema};
use crate::types::SchemaInstance;
use crate::value::{RefId, Value};

/// The three node kinds the tracker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Schema,
    Array,
    Map,
}

/// One owned node.
#[derive(Debug)]
pub enum RefNode {
    Schema(SchemaInstance),
    Array(ArraySchema),
    Map(MapSchema),
}

impl RefNode {
    pub fn kind(&self) -> RefKind {
        match self {
            RefNode::Schema(_) => RefKind::Schema,
            RefNode::Array(_) => RefKind::Array,
            RefNode::Map(_) => RefKind::Map,
        }
    }

    pub fn ref_id(&self) -> RefId {
        match self {
            RefNode::Schema(s) => s.ref_id(),
            RefNode::Array(a) => a.ref_id(),
            RefNode::Map(m) => m.ref_id(),
        }
    }

    pub fn as_schema(&self) -> Option<&SchemaInstance> {
        match self {
            RefNode::Schema(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArraySchema> {
        match self {
            RefNode::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapSchema> {
        match self {
            RefNode::Map(m) => Some(m),
            _ => None,
        }
    }

    fn child_values(&self) -> Vec<Value> {
        match self {
            RefNode::Schema(s) => s.values(),
            RefNode::Array(a) => a.values(),
            RefNode::Map(m) => m.values(),
        }
    }
}

struct RefEntry {
    node: RefNode,
    ref_count: i32,
}

/// Owner of all live state nodes, keyed by refId.
#[derive(Default)]
pub struct RefTracker {
    entries: IntMap<RefId, RefEntry>,
    deletion_queue: Vec<RefId>,
}

impl RefTracker {
    pub fn new() -> RefTracker {
        RefTracker::default()
    }

    /// Inserts or replaces the node at `ref_id`, optionally incrementing its
    /// count. An id queued for deletion is unqueued: a re-add within the
    /// same frame reanimates the node.
    pub fn insert(&mut self, ref_id: RefId, node: RefNode, increment: bool) {
        match self.entries.get_mut(&ref_id) {
            Some(entry) => {
                entry.node = node;
                if increment {
                    entry.ref_count += 1;
                }
            }
            None => {
                self.entries.insert(
                    ref_id,
                    RefEntry {
                        node,
                        ref_count: i32::from(increment),
                    },
                );
            }
        }
        self.deletion_queue.retain(|id| *id != ref_id);
    }

    /// Bumps an existing entry without replacing its node, and unqueues a
    /// pending deletion. Used when the wire re-references a live node.
    pub fn touch(&mut self, ref_id: RefId, increment: bool) {
        if let Some(entry) = self.entries.get_mut(&ref_id) {
            if increment {
                entry.ref_count += 1;
            }
            self.deletion_queue.retain(|id| *id != ref_id);
        }
    }

    pub fn get(&self, ref_id: RefId) -> Option<&RefNode> {
        self.entries.get(&ref_id).map(|e| &e.node)
    }

    pub fn get_mut(&mut self, ref_id: RefId) -> Option<&mut RefNode> {
        self.entries.get_mut(&ref_id).map(|e| &mut e.node)
    }

    pub fn has(&self, ref_id: RefId) -> bool {
        self.entries.contains_key(&ref_id)
    }

    pub fn kind_of(&self, ref_id: RefId) -> Option<RefKind> {
        self.entries.get(&ref_id).map(|e| e.node.kind())
    }

    pub fn ref_count(&self, ref_id: RefId) -> Option<i32> {
        self.entries.get(&ref_id).map(|e| e.ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decrements the count; when it reaches zero the id is queued for the
    /// next [`gc`](RefTracker::gc) pass. Returns `true` iff it was queued.
    pub fn remove(&mut self, ref_id: RefId) -> bool {
        let Some(entry) = self.entries.get_mut(&ref_id) else {
            log::warn!("tried to release refId {ref_id} which is not tracked");
            return false;
        };
        entry.ref_count -= 1;
        if entry.ref_count <= 0 {
            if !self.deletion_queue.contains(&ref_id) {
                self.deletion_queue.push(ref_id);
            }
            return true;
        }
        false
    }

    /// Reclaims every queued id whose count is still at or below zero,
    /// recursing into children: each reference-valued field or item of a
    /// dropped node releases one count on its target.
    pub fn gc(&mut self) {
        let mut queue = std::mem::take(&mut self.deletion_queue);
        while let Some(ref_id) = queue.pop() {
            let expired = matches!(
                self.entries.get(&ref_id),
                Some(entry) if entry.ref_count <= 0
            );
            if !expired {
                continue;
            }
            let Some(entry) = self.entries.remove(&ref_id) else {
                continue;
            };
            if let RefNode::Schema(instance) = &entry.node {
                if let Some(hooks) = instance.descriptor().hooks() {
                    hooks.free_instance(ref_id);
                }
            }
            for value in entry.node.child_values() {
                if let Value::Ref(child) = value {
                    if let Some(child_entry) = self.entries.get_mut(&child) {
                        child_entry.ref_count -= 1;
                        if child_entry.ref_count <= 0 && !queue.contains(&child) {
                            queue.push(child);
                        }
                    }
                }
            }
        }
        // Removals triggered recursively landed in the live queue; they were
        // all processed above.
        self.deletion_queue.clear();
    }

    /// Drops everything. Teardown only.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.deletion_queue.clear();
    }
}
