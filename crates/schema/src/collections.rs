//! The two collection node kinds: the ordered list and the keyed map.
//!
//! Lists keep items in a `BTreeMap` keyed by the wire index, so iteration is
//! always by ascending index even while the index set is sparse mid-frame.
//! Deletions during a frame are deferred: the slot is nulled (keeping the
//! previous value observable for change records) and the index is queued in
//! a deletion set that [`ArraySchema::on_decode_end`] drains once the frame
//! is finished.
//!
//! Maps keep items in an `IndexMap` (insertion-order iteration, stable
//! across frames that do not touch the map) plus a slot→key table: the
//! server assigns a stable numeric slot on the first ADD and may address the
//! entry by slot afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use nohash_hasher::IntMap;

use crate::spec::Operation;
use crate::types::ChildType;
use crate::value::{RefId, Value};

/// An ordered list of values, addressed by non-negative integer index.
#[derive(Debug)]
pub struct ArraySchema {
    ref_id: RefId,
    items: BTreeMap<u32, Value>,
    child: ChildType,
    deleted: BTreeSet<u32>,
}

impl ArraySchema {
    pub fn new(ref_id: RefId, child: ChildType) -> ArraySchema {
        ArraySchema {
            ref_id,
            items: BTreeMap::new(),
            child,
            deleted: BTreeSet::new(),
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    pub fn child(&self) -> &ChildType {
        &self.child
    }

    pub(crate) fn set_child(&mut self, child: ChildType) {
        self.child = child;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Value> {
        self.items.get(&index)
    }

    /// Iterates items by ascending stored index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.items.iter().map(|(i, v)| (*i, v))
    }

    /// Applies a decoded set. An `ADD` at index 0 with existing items is a
    /// prepend: every existing index shifts up by one. `DELETE_AND_MOVE`
    /// overwrites in place. Anything else upserts.
    pub fn set(&mut self, index: u32, value: Value, op: Operation) {
        self.deleted.remove(&index);
        if index == 0 && op == Operation::ADD && !self.items.is_empty() {
            let shifted: BTreeMap<u32, Value> = std::mem::take(&mut self.items)
                .into_iter()
                .map(|(i, v)| (i + 1, v))
                .collect();
            self.items = shifted;
        }
        self.items.insert(index, value);
    }

    /// Marks a slot deleted: nulls the value, queues the index for removal
    /// at end-of-frame.
    pub fn delete(&mut self, index: u32) {
        self.deleted.insert(index);
        if let Some(slot) = self.items.get_mut(&index) {
            *slot = Value::None;
        }
    }

    /// Drains every item, for `CLEAR`. The caller emits change records and
    /// releases tracked children from what is returned.
    pub fn clear_items(&mut self) -> Vec<(u32, Value)> {
        self.deleted.clear();
        std::mem::take(&mut self.items).into_iter().collect()
    }

    /// Rewrites every index to `max_index - index`.
    pub fn reverse(&mut self) {
        if self.items.len() <= 1 {
            return;
        }
        let max_index = *self.items.keys().next_back().unwrap();
        let reversed: BTreeMap<u32, Value> = std::mem::take(&mut self.items)
            .into_iter()
            .map(|(i, v)| (max_index - i, v))
            .collect();
        self.items = reversed;
    }

    /// Linear search for the slot holding the given refId.
    pub fn index_of_ref(&self, ref_id: RefId) -> Option<u32> {
        self.items
            .iter()
            .find(|(_, v)| v.ref_id() == Some(ref_id))
            .map(|(i, _)| *i)
    }

    /// The index an appended item would take.
    pub fn next_index(&self) -> u32 {
        self.items.len() as u32
    }

    /// Drops every slot queued for deletion and clears the queue. Called
    /// when the decoder leaves this list at end of frame.
    pub fn on_decode_end(&mut self) {
        for index in std::mem::take(&mut self.deleted) {
            self.items.remove(&index);
        }
    }

    /// Structural clone used when this refId is re-ADDed: items and child
    /// type are copied, inner nodes stay shared through their refIds.
    pub fn clone_with_ref_id(&self, ref_id: RefId) -> ArraySchema {
        ArraySchema {
            ref_id,
            items: self.items.clone(),
            child: self.child.clone(),
            deleted: BTreeSet::new(),
        }
    }

    /// Every stored value, for GC traversal.
    pub(crate) fn values(&self) -> Vec<Value> {
        self.items.values().cloned().collect()
    }
}

/// A keyed map of values, addressed by string key or by the numeric slot
/// the server assigned on first ADD.
#[derive(Debug)]
pub struct MapSchema {
    ref_id: RefId,
    items: IndexMap<Arc<str>, Value>,
    indexes: IntMap<u32, Arc<str>>,
    child: ChildType,
}

impl MapSchema {
    pub fn new(ref_id: RefId, child: ChildType) -> MapSchema {
        MapSchema {
            ref_id,
            items: IndexMap::new(),
            indexes: IntMap::default(),
            child,
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    pub fn child(&self) -> &ChildType {
        &self.child
    }

    pub(crate) fn set_child(&mut self, child: ChildType) {
        self.child = child;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Iterates entries in key insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.items.iter()
    }

    /// Remembers the key for a server-assigned slot.
    pub fn set_index(&mut self, slot: u32, key: Arc<str>) {
        self.indexes.insert(slot, key);
    }

    pub fn key_for_index(&self, slot: u32) -> Option<Arc<str>> {
        self.indexes.get(&slot).cloned()
    }

    pub fn get_by_index(&self, slot: u32) -> Option<&Value> {
        let key = self.indexes.get(&slot)?;
        self.items.get(key)
    }

    /// Upserts both the slot→key mapping and the key→item entry.
    pub fn set_by_index(&mut self, slot: u32, key: Arc<str>, value: Value) {
        self.indexes.insert(slot, key.clone());
        self.items.insert(key, value);
    }

    /// Resolves the slot's key and drops both entries. Returns what was
    /// removed so the caller can release tracked children.
    pub fn delete_by_index(&mut self, slot: u32) -> Option<(Arc<str>, Value)> {
        let key = self.indexes.remove(&slot)?;
        let value = self.items.shift_remove(&key)?;
        Some((key, value))
    }

    /// Drains every entry, for `CLEAR`.
    pub fn clear_items(&mut self) -> Vec<(Arc<str>, Value)> {
        self.indexes.clear();
        self.items.drain(..).collect()
    }

    /// Structural clone used when this refId is re-ADDed.
    pub fn clone_with_ref_id(&self, ref_id: RefId) -> MapSchema {
        MapSchema {
            ref_id,
            items: self.items.clone(),
            indexes: self.indexes.clone(),
            child: self.child.clone(),
        }
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.items.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;

    fn number_list() -> ArraySchema {
        ArraySchema::new(1, ChildType::Primitive(PrimitiveKind::Number))
    }

    #[test]
    fn add_at_zero_with_existing_items_prepends() {
        let mut arr = number_list();
        arr.set(0, Value::Number(1.0), Operation::ADD);
        arr.set(1, Value::Number(2.0), Operation::ADD);
        arr.set(0, Value::Number(0.0), Operation::ADD);
        let collected: Vec<f64> = arr.iter().map(|(_, v)| v.as_f64().unwrap()).collect();
        assert_eq!(collected, [0.0, 1.0, 2.0]);
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn delete_defers_removal_until_decode_end() {
        let mut arr = number_list();
        arr.set(0, Value::Number(1.0), Operation::ADD);
        arr.set(1, Value::Number(2.0), Operation::ADD);
        arr.delete(0);
        // Slot still present, nulled: previousValue stays observable.
        assert_eq!(arr.get(0), Some(&Value::None));
        assert_eq!(arr.len(), 2);
        arr.on_decode_end();
        assert_eq!(arr.get(0), None);
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn set_cancels_pending_deletion() {
        let mut arr = number_list();
        arr.set(0, Value::Number(1.0), Operation::ADD);
        arr.delete(0);
        arr.set(0, Value::Number(5.0), Operation::DELETE_AND_ADD);
        arr.on_decode_end();
        assert_eq!(arr.get(0), Some(&Value::Number(5.0)));
    }

    #[test]
    fn double_reverse_restores_order() {
        let mut arr = number_list();
        for i in 0..5u32 {
            arr.set(i, Value::Number(i as f64), Operation::ADD);
        }
        let before: Vec<f64> = arr.iter().map(|(_, v)| v.as_f64().unwrap()).collect();
        arr.reverse();
        let reversed: Vec<f64> = arr.iter().map(|(_, v)| v.as_f64().unwrap()).collect();
        assert_eq!(reversed, [4.0, 3.0, 2.0, 1.0, 0.0]);
        arr.reverse();
        let after: Vec<f64> = arr.iter().map(|(_, v)| v.as_f64().unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn index_of_ref_linear_scan() {
        let mut arr = ArraySchema::new(1, ChildType::Primitive(PrimitiveKind::Number));
        arr.set(3, Value::Ref(9), Operation::ADD);
        arr.set(7, Value::Ref(11), Operation::ADD);
        assert_eq!(arr.index_of_ref(11), Some(7));
        assert_eq!(arr.index_of_ref(42), None);
    }

    #[test]
    fn map_slot_addressing() {
        let mut map = MapSchema::new(2, ChildType::Primitive(PrimitiveKind::String));
        map.set_by_index(0, "p1".into(), Value::from("one"));
        map.set_by_index(1, "p2".into(), Value::from("two"));
        assert_eq!(map.get_by_index(1).and_then(Value::as_str), Some("two"));
        assert_eq!(map.get("p1").and_then(Value::as_str), Some("one"));

        let removed = map.delete_by_index(0).unwrap();
        assert_eq!(&*removed.0, "p1");
        assert!(!map.contains_key("p1"));
        assert_eq!(map.key_for_index(0), None);
    }

    #[test]
    fn map_iterates_in_insertion_order() {
        let mut map = MapSchema::new(2, ChildType::Primitive(PrimitiveKind::Number));
        for (slot, key) in ["zeta", "alpha", "mid"].iter().enumerate() {
            map.set_by_index(slot as u32, (*key).into(), Value::Number(slot as f64));
        }
        let keys: Vec<&str> = map.iter().map(|(k, _)| &**k).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn clone_shares_items_structurally() {
        let mut map = MapSchema::new(2, ChildType::Primitive(PrimitiveKind::Number));
        map.set_by_index(0, "a".into(), Value::Number(1.0));
        let clone = map.clone_with_ref_id(5);
        assert_eq!(clone.ref_id(), 5);
        assert_eq!(clone.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(clone.key_for_index(0).as_deref(), Some("a"));
    }
}
