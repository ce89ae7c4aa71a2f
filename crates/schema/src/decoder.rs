//! The wire decoder: applies a frame of delta-encoded bytes to the tracked
//! state graph and accumulates the frame's change records.
//!
//! The decode loop consumes bytes left to right. A [`SWITCH_TO_STRUCTURE`]
//! sentinel selects the "current reference"; between sentinels, operation
//! bytes mutate that reference. Schema mutation failure on an unknown field
//! index enters resync mode (scan forward to the next resolvable sentinel);
//! unknown refIds, cursor overruns and malformed numbers abandon the frame
//! with an error, leaving whatever mutations already applied in place.
//!
//! `decode` returns the frame's drained change list so the caller can run
//! callback dispatch before [`Decoder::gc`] reclaims released nodes.

use std::sync::Arc;

use nohash_hasher::IntMap;

use crate::buffer::{Cursor, DecodeError};
use crate::collections::{ArraySchema, MapSchema};
use crate::spec::{Operation, SWITCH_TO_STRUCTURE, TYPE_ID};
use crate::tracker::{RefKind, RefNode, RefTracker};
use crate::types::{ChildType, FieldKind, SchemaInstance, TypeDescriptor};
use crate::value::{DataChange, DynamicIndex, RefId, Value};

/// Mapping from server-sent type ids to local descriptors, populated by the
/// reflection handshake.
#[derive(Default)]
pub struct TypeContext {
    types: IntMap<u32, Arc<TypeDescriptor>>,
}

impl TypeContext {
    pub fn new() -> TypeContext {
        TypeContext::default()
    }

    pub fn set(&mut self, type_id: u32, descriptor: Arc<TypeDescriptor>) {
        self.types.insert(type_id, descriptor);
    }

    pub fn get(&self, type_id: u32) -> Option<Arc<TypeDescriptor>> {
        self.types.get(&type_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Decodes server frames into a reference-tracked state graph.
pub struct Decoder {
    tracker: RefTracker,
    context: TypeContext,
    root_descriptor: Arc<TypeDescriptor>,
    changes: Vec<DataChange>,
}

impl Decoder {
    /// Creates the decoder and its root state node at refId 0.
    pub fn new(root_descriptor: Arc<TypeDescriptor>) -> Decoder {
        let mut decoder = Decoder {
            tracker: RefTracker::new(),
            context: TypeContext::new(),
            root_descriptor,
            changes: Vec::new(),
        };
        decoder.seed_root();
        decoder
    }

    fn seed_root(&mut self) {
        let root = self.create_schema_node(0, self.root_descriptor.clone());
        self.tracker.insert(0, root, true);
    }

    /// The root state node. Present from construction until drop; `teardown`
    /// reseeds it.
    pub fn state(&self) -> &SchemaInstance {
        self.tracker
            .get(0)
            .and_then(RefNode::as_schema)
            .expect("root state is tracked at refId 0")
    }

    pub fn root_descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.root_descriptor
    }

    pub fn tracker(&self) -> &RefTracker {
        &self.tracker
    }

    pub fn context(&self) -> &TypeContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TypeContext {
        &mut self.context
    }

    pub fn instance(&self, ref_id: RefId) -> Option<&SchemaInstance> {
        self.tracker.get(ref_id).and_then(RefNode::as_schema)
    }

    pub fn array(&self, ref_id: RefId) -> Option<&ArraySchema> {
        self.tracker.get(ref_id).and_then(RefNode::as_array)
    }

    pub fn map(&self, ref_id: RefId) -> Option<&MapSchema> {
        self.tracker.get(ref_id).and_then(RefNode::as_map)
    }

    /// Runs the deferred reclamation pass (see [`RefTracker::gc`]). Call
    /// after callback dispatch for the frame.
    pub fn gc(&mut self) {
        self.tracker.gc();
    }

    /// Drops the whole state graph and reseeds an empty root.
    pub fn teardown(&mut self) {
        self.tracker.clear();
        self.seed_root();
    }

    /// Decodes one frame, returning its change records in decode order.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<DataChange>, DecodeError> {
        self.decode_with_offset(bytes, 0)
    }

    pub fn decode_with_offset(
        &mut self,
        bytes: &[u8],
        offset: usize,
    ) -> Result<Vec<DataChange>, DecodeError> {
        let mut cur = Cursor::with_offset(bytes, offset);
        self.changes.clear();
        let mut current: RefId = 0;

        while cur.has_remaining() {
            if cur.peek()? == SWITCH_TO_STRUCTURE {
                cur.skip();
                let next = cur.read_index()?;
                self.finalize_list(current);
                if !self.tracker.has(next) {
                    return Err(DecodeError::RefNotFound(next));
                }
                current = next;
                continue;
            }

            match self.tracker.kind_of(current) {
                Some(RefKind::Schema) => match self.decode_schema_op(&mut cur, current) {
                    Err(DecodeError::UnknownField { type_name, index }) => {
                        log::warn!(
                            "unknown field index {index} on `{type_name}` (refId {current}); resynchronising"
                        );
                        self.resync(&mut cur);
                    }
                    other => other?,
                },
                Some(RefKind::Array) => self.decode_array_op(&mut cur, current)?,
                Some(RefKind::Map) => self.decode_map_op(&mut cur, current)?,
                None => return Err(DecodeError::RefNotFound(current)),
            }
        }

        self.finalize_list(current);
        Ok(std::mem::take(&mut self.changes))
    }

    /// Scans forward to the next `SWITCH_TO_STRUCTURE` whose refId resolves,
    /// leaving the cursor on the sentinel. No changes are recorded for the
    /// skipped bytes.
    fn resync(&mut self, cur: &mut Cursor<'_>) {
        while cur.has_remaining() {
            if cur.peek().ok() == Some(SWITCH_TO_STRUCTURE) {
                let mut probe = cur.clone();
                probe.skip();
                if let Ok(ref_id) = probe.read_index() {
                    if self.tracker.has(ref_id) {
                        return;
                    }
                }
            }
            cur.skip();
        }
    }

    fn finalize_list(&mut self, ref_id: RefId) {
        if let Some(RefNode::Array(arr)) = self.tracker.get_mut(ref_id) {
            arr.on_decode_end();
        }
    }

    fn create_schema_node(&self, ref_id: RefId, descriptor: Arc<TypeDescriptor>) -> RefNode {
        if let Some(hooks) = descriptor.hooks() {
            hooks.create_instance(ref_id, &descriptor);
        }
        RefNode::Schema(SchemaInstance::new(ref_id, descriptor))
    }

    fn decode_schema_op(&mut self, cur: &mut Cursor<'_>, ref_id: RefId) -> Result<(), DecodeError> {
        let first = cur.read_u8()?;
        let op = Operation(first & 0xC0);
        let field_index = (first & 0x3F) as u32;

        let instance = self
            .tracker
            .get(ref_id)
            .and_then(RefNode::as_schema)
            .ok_or(DecodeError::RefNotFound(ref_id))?;
        let descriptor = instance.descriptor().clone();
        let prev = instance.get(field_index).clone();
        let field = descriptor
            .field_by_index(field_index)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownField {
                type_name: descriptor.name().to_string(),
                index: field_index,
            })?;

        if op.has_delete() {
            if let Value::Ref(prev_id) = &prev {
                self.tracker.remove(*prev_id);
            }
            if op != Operation::DELETE_AND_ADD {
                if let Some(RefNode::Schema(s)) = self.tracker.get_mut(ref_id) {
                    s.set(field_index, Value::None);
                }
            }
        }

        let value = if op == Operation::DELETE {
            Value::None
        } else {
            let value = self.decode_field_value(cur, &field.kind, op, &prev)?;
            if let Some(RefNode::Schema(s)) = self.tracker.get_mut(ref_id) {
                s.set(field_index, value.clone());
            }
            value
        };

        if let Some(hooks) = descriptor.hooks() {
            hooks.set_field(ref_id, &field.name, &value);
        }

        if value != prev {
            self.changes.push(DataChange {
                ref_id,
                op: op.0,
                field: Some(field.name.clone()),
                dynamic_index: None,
                value,
                previous_value: prev,
            });
        }
        Ok(())
    }

    fn decode_array_op(&mut self, cur: &mut Cursor<'_>, ref_id: RefId) -> Result<(), DecodeError> {
        let op = Operation(cur.read_u8()?);

        if op == Operation::CLEAR {
            let drained = match self.tracker.get_mut(ref_id) {
                Some(RefNode::Array(arr)) => arr.clear_items(),
                _ => Vec::new(),
            };
            for (index, prev) in drained {
                if prev.is_none() {
                    continue;
                }
                if let Value::Ref(child) = &prev {
                    self.tracker.remove(*child);
                }
                self.changes.push(DataChange {
                    ref_id,
                    op: Operation::DELETE.0,
                    field: None,
                    dynamic_index: Some(DynamicIndex::Index(index)),
                    value: Value::None,
                    previous_value: prev,
                });
            }
            return Ok(());
        }

        if op == Operation::REVERSE {
            if let Some(RefNode::Array(arr)) = self.tracker.get_mut(ref_id) {
                arr.reverse();
            }
            return Ok(());
        }

        if op == Operation::DELETE_BY_REFID {
            let target = cur.read_index()?;
            let found = self
                .tracker
                .get(ref_id)
                .and_then(RefNode::as_array)
                .and_then(|arr| arr.index_of_ref(target));
            let Some(index) = found else {
                // Wire may name a refId this list no longer holds.
                log::debug!("delete-by-refid: {target} not present in list {ref_id}");
                return Ok(());
            };
            let prev = self
                .tracker
                .get(ref_id)
                .and_then(RefNode::as_array)
                .and_then(|arr| arr.get(index))
                .cloned()
                .unwrap_or_default();
            if let Some(RefNode::Array(arr)) = self.tracker.get_mut(ref_id) {
                arr.delete(index);
            }
            self.tracker.remove(target);
            self.changes.push(DataChange {
                ref_id,
                op: Operation::DELETE.0,
                field: None,
                dynamic_index: Some(DynamicIndex::Index(index)),
                value: Value::None,
                previous_value: prev,
            });
            return Ok(());
        }

        let index = if op == Operation::ADD_BY_REFID {
            let target = cur.read_index()?;
            let arr = self
                .tracker
                .get(ref_id)
                .and_then(RefNode::as_array)
                .ok_or(DecodeError::RefNotFound(ref_id))?;
            arr.index_of_ref(target).unwrap_or_else(|| arr.next_index())
        } else {
            cur.read_index()?
        };

        let (child, prev) = {
            let arr = self
                .tracker
                .get(ref_id)
                .and_then(RefNode::as_array)
                .ok_or(DecodeError::RefNotFound(ref_id))?;
            (
                arr.child().clone(),
                arr.get(index).cloned().unwrap_or_default(),
            )
        };

        if op.has_delete() {
            if let Value::Ref(prev_id) = &prev {
                self.tracker.remove(*prev_id);
            }
            if op != Operation::DELETE_AND_ADD {
                if let Some(RefNode::Array(arr)) = self.tracker.get_mut(ref_id) {
                    arr.delete(index);
                }
            }
        }

        let value = if op == Operation::DELETE {
            Value::None
        } else {
            let value = self.decode_item_value(cur, &child, op, &prev)?;
            if !value.is_none() {
                if let Some(RefNode::Array(arr)) = self.tracker.get_mut(ref_id) {
                    arr.set(index, value.clone(), op);
                }
            }
            value
        };

        if value != prev {
            self.changes.push(DataChange {
                ref_id,
                op: op.0,
                field: None,
                dynamic_index: Some(DynamicIndex::Index(index)),
                value,
                previous_value: prev,
            });
        }
        Ok(())
    }

    fn decode_map_op(&mut self, cur: &mut Cursor<'_>, ref_id: RefId) -> Result<(), DecodeError> {
        let op = Operation(cur.read_u8()?);

        if op == Operation::CLEAR {
            let drained = match self.tracker.get_mut(ref_id) {
                Some(RefNode::Map(map)) => map.clear_items(),
                _ => Vec::new(),
            };
            for (key, prev) in drained {
                if prev.is_none() {
                    continue;
                }
                if let Value::Ref(child) = &prev {
                    self.tracker.remove(*child);
                }
                self.changes.push(DataChange {
                    ref_id,
                    op: Operation::DELETE.0,
                    field: None,
                    dynamic_index: Some(DynamicIndex::Key(key)),
                    value: Value::None,
                    previous_value: prev,
                });
            }
            return Ok(());
        }

        let slot = cur.read_index()?;

        // The key rides the wire on the first ADD and is remembered against
        // the slot for later operations.
        let key = if op.has_add() {
            let key: Arc<str> = cur.read_string()?.into();
            if let Some(RefNode::Map(map)) = self.tracker.get_mut(ref_id) {
                map.set_index(slot, key.clone());
            }
            Some(key)
        } else {
            self.tracker
                .get(ref_id)
                .and_then(RefNode::as_map)
                .and_then(|map| map.key_for_index(slot))
        };

        let (child, prev) = {
            let map = self
                .tracker
                .get(ref_id)
                .and_then(RefNode::as_map)
                .ok_or(DecodeError::RefNotFound(ref_id))?;
            (
                map.child().clone(),
                map.get_by_index(slot).cloned().unwrap_or_default(),
            )
        };

        if op.has_delete() {
            if let Value::Ref(prev_id) = &prev {
                self.tracker.remove(*prev_id);
            }
            if op != Operation::DELETE_AND_ADD {
                if let Some(RefNode::Map(map)) = self.tracker.get_mut(ref_id) {
                    map.delete_by_index(slot);
                }
            }
        }

        let value = if op == Operation::DELETE {
            Value::None
        } else {
            let value = self.decode_item_value(cur, &child, op, &prev)?;
            if !value.is_none() {
                if let Some(key) = &key {
                    if let Some(RefNode::Map(map)) = self.tracker.get_mut(ref_id) {
                        map.set_by_index(slot, key.clone(), value.clone());
                    }
                }
            }
            value
        };

        if value != prev {
            self.changes.push(DataChange {
                ref_id,
                op: op.0,
                field: None,
                dynamic_index: key.map(DynamicIndex::Key),
                value,
                previous_value: prev,
            });
        }
        Ok(())
    }

    fn decode_field_value(
        &mut self,
        cur: &mut Cursor<'_>,
        kind: &FieldKind,
        op: Operation,
        prev: &Value,
    ) -> Result<Value, DecodeError> {
        match kind {
            FieldKind::Primitive(p) => cur.read_primitive(*p),
            FieldKind::Ref(default_descriptor) => {
                self.decode_ref_value(cur, default_descriptor, op, prev)
            }
            FieldKind::Array(child) => {
                self.decode_collection_value(cur, RefKind::Array, child, op, prev)
            }
            FieldKind::Map(child) => {
                self.decode_collection_value(cur, RefKind::Map, child, op, prev)
            }
        }
    }

    fn decode_item_value(
        &mut self,
        cur: &mut Cursor<'_>,
        child: &ChildType,
        op: Operation,
        prev: &Value,
    ) -> Result<Value, DecodeError> {
        match child {
            ChildType::Primitive(p) => cur.read_primitive(*p),
            ChildType::Schema(descriptor) => self.decode_ref_value(cur, descriptor, op, prev),
        }
    }

    fn decode_ref_value(
        &mut self,
        cur: &mut Cursor<'_>,
        default_descriptor: &Arc<TypeDescriptor>,
        op: Operation,
        prev: &Value,
    ) -> Result<Value, DecodeError> {
        let ref_id = cur.read_index()?;
        let value = Value::Ref(ref_id);
        if op.has_add() {
            let concrete = self.read_concrete_type(cur, default_descriptor)?;
            let increment = value != *prev || op == Operation::DELETE_AND_ADD;
            if self.tracker.has(ref_id) {
                self.tracker.touch(ref_id, increment);
            } else {
                let node = self.create_schema_node(ref_id, concrete);
                self.tracker.insert(ref_id, node, increment);
            }
        }
        Ok(value)
    }

    fn decode_collection_value(
        &mut self,
        cur: &mut Cursor<'_>,
        kind: RefKind,
        child: &ChildType,
        op: Operation,
        prev: &Value,
    ) -> Result<Value, DecodeError> {
        let ref_id = cur.read_index()?;
        // A re-ADDed refId clones the prior instance structurally so the
        // previous value stays observable; the field's declared child type
        // is stamped onto the new instance.
        let node = match (kind, self.tracker.get(ref_id)) {
            (RefKind::Array, Some(RefNode::Array(existing))) => {
                let mut arr = existing.clone_with_ref_id(ref_id);
                arr.set_child(child.clone());
                RefNode::Array(arr)
            }
            (RefKind::Map, Some(RefNode::Map(existing))) => {
                let mut map = existing.clone_with_ref_id(ref_id);
                map.set_child(child.clone());
                RefNode::Map(map)
            }
            (RefKind::Array, _) => RefNode::Array(ArraySchema::new(ref_id, child.clone())),
            (RefKind::Map, _) => RefNode::Map(MapSchema::new(ref_id, child.clone())),
            (RefKind::Schema, _) => unreachable!("collection fields are arrays or maps"),
        };
        let value = Value::Ref(ref_id);
        let increment = value != *prev || op == Operation::DELETE_AND_ADD;
        self.tracker.insert(ref_id, node, increment);
        Ok(value)
    }

    fn read_concrete_type(
        &mut self,
        cur: &mut Cursor<'_>,
        default_descriptor: &Arc<TypeDescriptor>,
    ) -> Result<Arc<TypeDescriptor>, DecodeError> {
        if cur.has_remaining() && cur.peek()? == TYPE_ID {
            cur.skip();
            let type_id = cur.read_index()?;
            // Unknown concrete type falls back to the declared descriptor.
            Ok(self
                .context
                .get(type_id)
                .unwrap_or_else(|| default_descriptor.clone()))
        } else {
            Ok(default_descriptor.clone())
        }
    }
}
