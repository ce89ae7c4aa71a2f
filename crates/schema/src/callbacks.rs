//! The callback engine: user-registered listeners over decoded changes.
//!
//! A [`Callbacks`] registry is bound to one decoder's output. After a frame
//! is decoded (and before GC), [`Callbacks::dispatch`] walks the frame's
//! change records and invokes matching listeners in change order. Handlers
//! may register and remove listeners re-entrantly: dispatch iterates local
//! snapshots of the handler lists, never the live tables.
//!
//! The registry is part of the single-threaded client-tick unit, hence the
//! `Rc<RefCell<_>>` interior; it is not `Send` by design.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use nohash_hasher::{IntMap, IntSet};

use crate::decoder::Decoder;
use crate::spec::Operation;
use crate::tracker::{RefKind, RefNode};
use crate::value::{DataChange, DynamicIndex, RefId, Value};

/// Property listener: `(decoder, value, previous)`.
pub type PropertyFn = dyn FnMut(&Decoder, &Value, &Value);
/// Whole-instance listener: `(decoder)`.
pub type InstanceFn = dyn FnMut(&Decoder);
/// Collection item listener: `(decoder, value, dynamic_index)`.
pub type ItemFn = dyn FnMut(&Decoder, &Value, &DynamicIndex);
/// Collection change listener: `(decoder, dynamic_index, value)`.
pub type KeyValueFn = dyn FnMut(&Decoder, &DynamicIndex, &Value);

enum Handler {
    Property {
        field: Arc<str>,
        f: Rc<RefCell<PropertyFn>>,
    },
    Instance {
        op: Operation,
        f: Rc<RefCell<InstanceFn>>,
    },
    Item {
        op: Operation,
        f: Rc<RefCell<ItemFn>>,
    },
    KeyValue {
        f: Rc<RefCell<KeyValueFn>>,
    },
}

struct HandlerEntry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    buckets: IntMap<RefId, Vec<HandlerEntry>>,
    next_id: u64,
    is_triggering: bool,
}

/// Opaque registration handle; removal is by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    ref_id: RefId,
    id: u64,
}

/// Listener registry and dispatcher for one decoder's change stream.
#[derive(Clone, Default)]
pub struct Callbacks {
    inner: Rc<RefCell<Registry>>,
}

impl Callbacks {
    pub fn new() -> Callbacks {
        Callbacks::default()
    }

    /// Whether a callback dispatch is currently in progress. Immediate
    /// replay is suppressed while this holds.
    pub fn is_triggering(&self) -> bool {
        self.inner.borrow().is_triggering
    }

    fn set_triggering(&self, value: bool) {
        self.inner.borrow_mut().is_triggering = value;
    }

    fn register(&self, ref_id: RefId, handler: Handler) -> CallbackHandle {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .buckets
            .entry(ref_id)
            .or_default()
            .push(HandlerEntry { id, handler });
        CallbackHandle { ref_id, id }
    }

    /// Removes a registration. Dropping the last handler for a refId purges
    /// its empty container.
    pub fn remove(&self, handle: CallbackHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(bucket) = inner.buckets.get_mut(&handle.ref_id) {
            bucket.retain(|entry| entry.id != handle.id);
            if bucket.is_empty() {
                inner.buckets.remove(&handle.ref_id);
            }
        }
    }

    /// Listens to one field of a schema node. With `immediate`, the handler
    /// fires synchronously once with the current value before returning —
    /// unless a dispatch is already in progress, which prevents duplicate
    /// delivery when listeners are added from inside a callback.
    pub fn listen<F>(
        &self,
        decoder: &Decoder,
        instance_ref: RefId,
        property: &str,
        immediate: bool,
        handler: F,
    ) -> CallbackHandle
    where
        F: FnMut(&Decoder, &Value, &Value) + 'static,
    {
        let f: Rc<RefCell<PropertyFn>> = Rc::new(RefCell::new(handler));
        if immediate && !self.is_triggering() {
            let current = decoder
                .instance(instance_ref)
                .and_then(|i| i.get_by_name(property))
                .cloned()
                .unwrap_or_default();
            (&mut *f.borrow_mut())(decoder, &current, &Value::None);
        }
        self.register(
            instance_ref,
            Handler::Property {
                field: property.into(),
                f,
            },
        )
    }

    /// Fires when any field of the instance changed this frame (at most once
    /// per frame).
    pub fn on_change<F>(&self, instance_ref: RefId, handler: F) -> CallbackHandle
    where
        F: FnMut(&Decoder) + 'static,
    {
        self.register(
            instance_ref,
            Handler::Instance {
                op: Operation::REPLACE,
                f: Rc::new(RefCell::new(handler)),
            },
        )
    }

    /// Fires when the instance itself is removed from its parent.
    pub fn on_instance_remove<F>(&self, instance_ref: RefId, handler: F) -> CallbackHandle
    where
        F: FnMut(&Decoder) + 'static,
    {
        self.register(
            instance_ref,
            Handler::Instance {
                op: Operation::DELETE,
                f: Rc::new(RefCell::new(handler)),
            },
        )
    }

    /// Listens for item insertion on a collection addressed by refId. With
    /// `immediate`, replays every existing item synchronously (subject to
    /// the dispatch-in-progress guard).
    pub fn on_add<F>(
        &self,
        decoder: &Decoder,
        collection_ref: RefId,
        immediate: bool,
        handler: F,
    ) -> CallbackHandle
    where
        F: FnMut(&Decoder, &Value, &DynamicIndex) + 'static,
    {
        let f: Rc<RefCell<ItemFn>> = Rc::new(RefCell::new(handler));
        if immediate && !self.is_triggering() {
            Self::replay_items(decoder, collection_ref, &f);
        }
        self.register(
            collection_ref,
            Handler::Item {
                op: Operation::ADD,
                f,
            },
        )
    }

    /// Listens for item removal on a collection addressed by refId. The
    /// removed node is still resolvable during the callback (GC runs after
    /// dispatch).
    pub fn on_remove<F>(&self, collection_ref: RefId, handler: F) -> CallbackHandle
    where
        F: FnMut(&Decoder, &Value, &DynamicIndex) + 'static,
    {
        self.register(
            collection_ref,
            Handler::Item {
                op: Operation::DELETE,
                f: Rc::new(RefCell::new(handler)),
            },
        )
    }

    /// Listens for item replacement on a collection addressed by refId.
    pub fn on_collection_change<F>(&self, collection_ref: RefId, handler: F) -> CallbackHandle
    where
        F: FnMut(&Decoder, &DynamicIndex, &Value) + 'static,
    {
        self.register(
            collection_ref,
            Handler::KeyValue {
                f: Rc::new(RefCell::new(handler)),
            },
        )
    }

    /// Like [`on_add`](Callbacks::on_add), but addressed by owner instance +
    /// property. If the collection has not been received yet the
    /// subscription is held pending behind a property listener and promoted
    /// when the value arrives.
    pub fn on_add_at<F>(
        &self,
        decoder: &Decoder,
        instance_ref: RefId,
        property: &str,
        immediate: bool,
        handler: F,
    ) -> CallbackHandle
    where
        F: FnMut(&Decoder, &Value, &DynamicIndex) + 'static,
    {
        self.collection_subscription(
            decoder,
            instance_ref,
            property,
            Operation::ADD,
            immediate,
            Rc::new(RefCell::new(handler)),
        )
    }

    /// Like [`on_remove`](Callbacks::on_remove), addressed by owner
    /// instance + property, with the same pending-promotion behaviour.
    pub fn on_remove_at<F>(
        &self,
        decoder: &Decoder,
        instance_ref: RefId,
        property: &str,
        handler: F,
    ) -> CallbackHandle
    where
        F: FnMut(&Decoder, &Value, &DynamicIndex) + 'static,
    {
        self.collection_subscription(
            decoder,
            instance_ref,
            property,
            Operation::DELETE,
            false,
            Rc::new(RefCell::new(handler)),
        )
    }

    fn collection_subscription(
        &self,
        decoder: &Decoder,
        instance_ref: RefId,
        property: &str,
        op: Operation,
        immediate: bool,
        f: Rc<RefCell<ItemFn>>,
    ) -> CallbackHandle {
        let current = decoder
            .instance(instance_ref)
            .and_then(|i| i.get_by_name(property))
            .cloned()
            .unwrap_or_default();

        if let Value::Ref(collection_ref) = current {
            if op == Operation::ADD && immediate && !self.is_triggering() {
                Self::replay_items(decoder, collection_ref, &f);
            }
            return self.register(collection_ref, Handler::Item { op, f });
        }

        // Pending: promote when the property fires with a collection value.
        // A later re-ADD with a fresh refId re-promotes; the stale inner
        // registration is dropped first.
        let registry = Rc::downgrade(&self.inner);
        let inner_handle: Rc<Cell<Option<CallbackHandle>>> = Rc::new(Cell::new(None));
        let promote = move |decoder: &Decoder, value: &Value, _previous: &Value| {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let callbacks = Callbacks { inner };
            let Some(collection_ref) = value.ref_id() else {
                return;
            };
            if let Some(stale) = inner_handle.get() {
                callbacks.remove(stale);
            }
            if op == Operation::ADD && immediate && !callbacks.is_triggering() {
                Self::replay_items(decoder, collection_ref, &f);
            }
            let handle = callbacks.register(collection_ref, Handler::Item { op, f: f.clone() });
            inner_handle.set(Some(handle));
        };
        self.register(
            instance_ref,
            Handler::Property {
                field: property.into(),
                f: Rc::new(RefCell::new(promote)),
            },
        )
    }

    fn replay_items(decoder: &Decoder, collection_ref: RefId, f: &Rc<RefCell<ItemFn>>) {
        match decoder.tracker().get(collection_ref) {
            Some(RefNode::Array(arr)) => {
                let items: Vec<(u32, Value)> = arr.iter().map(|(i, v)| (i, v.clone())).collect();
                for (index, value) in items {
                    (&mut *f.borrow_mut())(decoder, &value, &DynamicIndex::Index(index));
                }
            }
            Some(RefNode::Map(map)) => {
                let items: Vec<(Arc<str>, Value)> =
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                for (key, value) in items {
                    (&mut *f.borrow_mut())(decoder, &value, &DynamicIndex::Key(key));
                }
            }
            _ => {}
        }
    }

    /// Walks a frame's change records and invokes matching listeners, in
    /// change order. Instance-level `on_change` fires at most once per refId
    /// per frame.
    pub fn dispatch(&self, decoder: &Decoder, changes: &[DataChange]) {
        let mut seen: IntSet<RefId> = IntSet::default();

        for change in changes {
            let op = Operation(change.op);

            // "You were removed": DELETE with a schema previous value fires
            // the removed node's own instance handlers.
            if op.has_delete() {
                if let Some(prev_id) = change.previous_value.ref_id() {
                    if decoder.tracker().kind_of(prev_id) == Some(RefKind::Schema) {
                        for f in self.instance_handlers(prev_id, Operation::DELETE) {
                            (&mut *f.borrow_mut())(decoder);
                        }
                    }
                }
            }

            match decoder.tracker().kind_of(change.ref_id) {
                Some(RefKind::Schema) => {
                    if !seen.contains(&change.ref_id) {
                        for f in self.instance_handlers(change.ref_id, Operation::REPLACE) {
                            (&mut *f.borrow_mut())(decoder);
                        }
                    }
                    if let Some(field) = &change.field {
                        for f in self.property_handlers(change.ref_id, field) {
                            self.set_triggering(true);
                            (&mut *f.borrow_mut())(decoder, &change.value, &change.previous_value);
                            self.set_triggering(false);
                        }
                    }
                }
                Some(_) => {
                    if let Some(index) = &change.dynamic_index {
                        if op.has_delete() && !change.previous_value.is_none() {
                            for f in self.item_handlers(change.ref_id, Operation::DELETE) {
                                (&mut *f.borrow_mut())(decoder, &change.previous_value, index);
                            }
                        }
                        if op.has_add() && change.value != change.previous_value {
                            for f in self.item_handlers(change.ref_id, Operation::ADD) {
                                self.set_triggering(true);
                                (&mut *f.borrow_mut())(decoder, &change.value, index);
                                self.set_triggering(false);
                            }
                        }
                        if change.value != change.previous_value {
                            for f in self.key_value_handlers(change.ref_id) {
                                (&mut *f.borrow_mut())(decoder, index, &change.value);
                            }
                        }
                    }
                }
                None => {}
            }

            seen.insert(change.ref_id);
        }
    }

    fn instance_handlers(&self, ref_id: RefId, op: Operation) -> Vec<Rc<RefCell<InstanceFn>>> {
        let inner = self.inner.borrow();
        inner
            .buckets
            .get(&ref_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|entry| match &entry.handler {
                        Handler::Instance { op: o, f } if *o == op => Some(f.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn property_handlers(&self, ref_id: RefId, field: &str) -> Vec<Rc<RefCell<PropertyFn>>> {
        let inner = self.inner.borrow();
        inner
            .buckets
            .get(&ref_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|entry| match &entry.handler {
                        Handler::Property { field: name, f } if &**name == field => {
                            Some(f.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn item_handlers(&self, ref_id: RefId, op: Operation) -> Vec<Rc<RefCell<ItemFn>>> {
        let inner = self.inner.borrow();
        inner
            .buckets
            .get(&ref_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|entry| match &entry.handler {
                        Handler::Item { op: o, f } if *o == op => Some(f.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn key_value_handlers(&self, ref_id: RefId) -> Vec<Rc<RefCell<KeyValueFn>>> {
        let inner = self.inner.borrow();
        inner
            .buckets
            .get(&ref_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|entry| match &entry.handler {
                        Handler::KeyValue { f } => Some(f.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn bucket_len(&self, ref_id: RefId) -> usize {
        self.inner
            .borrow()
            .buckets
            .get(&ref_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldKind, PrimitiveKind, TypeDescriptor};

    fn decoder() -> Decoder {
        Decoder::new(TypeDescriptor::new_static(
            "State",
            vec![Field::new(
                0,
                "name",
                FieldKind::Primitive(PrimitiveKind::String),
            )],
        ))
    }

    #[test]
    fn immediate_listen_fires_once_synchronously() {
        let decoder = decoder();
        let callbacks = Callbacks::new();
        let fired = Rc::new(Cell::new(0));
        let fired_in = fired.clone();
        callbacks.listen(&decoder, 0, "name", true, move |_, value, previous| {
            fired_in.set(fired_in.get() + 1);
            assert_eq!(*value, Value::None);
            assert_eq!(*previous, Value::None);
        });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn non_immediate_listen_does_not_fire() {
        let decoder = decoder();
        let callbacks = Callbacks::new();
        let fired = Rc::new(Cell::new(0));
        let fired_in = fired.clone();
        callbacks.listen(&decoder, 0, "name", false, move |_, _, _| {
            fired_in.set(fired_in.get() + 1);
        });
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn remove_purges_empty_bucket() {
        let callbacks = Callbacks::new();
        let h1 = callbacks.on_change(3, |_| {});
        let h2 = callbacks.on_change(3, |_| {});
        assert_eq!(callbacks.bucket_len(3), 2);
        callbacks.remove(h1);
        assert_eq!(callbacks.bucket_len(3), 1);
        callbacks.remove(h2);
        assert_eq!(callbacks.bucket_len(3), 0);
    }

    #[test]
    fn dispatch_fires_property_listener_in_change_order() {
        let decoder = decoder();
        let callbacks = Callbacks::new();
        let values = Rc::new(RefCell::new(Vec::new()));
        let sink = values.clone();
        callbacks.listen(&decoder, 0, "name", false, move |_, value, _| {
            sink.borrow_mut().push(value.clone());
        });
        let changes = vec![
            DataChange {
                ref_id: 0,
                op: Operation::ADD.0,
                field: Some("name".into()),
                dynamic_index: None,
                value: Value::from("ada"),
                previous_value: Value::None,
            },
            DataChange {
                ref_id: 0,
                op: Operation::REPLACE.0,
                field: Some("name".into()),
                dynamic_index: None,
                value: Value::from("grace"),
                previous_value: Value::from("ada"),
            },
        ];
        callbacks.dispatch(&decoder, &changes);
        assert_eq!(
            *values.borrow(),
            vec![Value::from("ada"), Value::from("grace")]
        );
    }

    #[test]
    fn instance_on_change_fires_once_per_frame() {
        let decoder = decoder();
        let callbacks = Callbacks::new();
        let fired = Rc::new(Cell::new(0));
        let fired_in = fired.clone();
        callbacks.on_change(0, move |_| fired_in.set(fired_in.get() + 1));
        let change = |value: &str, prev: Value| DataChange {
            ref_id: 0,
            op: Operation::REPLACE.0,
            field: Some("name".into()),
            dynamic_index: None,
            value: Value::from(value),
            previous_value: prev,
        };
        callbacks.dispatch(
            &decoder,
            &[
                change("a", Value::None),
                change("b", Value::from("a")),
                change("c", Value::from("b")),
            ],
        );
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn listener_registered_inside_dispatch_suppresses_immediate_replay() {
        let decoder = decoder();
        let callbacks = Callbacks::new();
        let inner_fired = Rc::new(Cell::new(0));
        let callbacks_in = callbacks.clone();
        let inner_in = inner_fired.clone();
        callbacks.listen(&decoder, 0, "name", false, move |decoder, _, _| {
            let inner_fired = inner_in.clone();
            // Registering with immediate=true mid-dispatch must not fire
            // synchronously.
            callbacks_in.listen(decoder, 0, "name", true, move |_, _, _| {
                inner_fired.set(inner_fired.get() + 1);
            });
        });
        callbacks.dispatch(
            &decoder,
            &[DataChange {
                ref_id: 0,
                op: Operation::ADD.0,
                field: Some("name".into()),
                dynamic_index: None,
                value: Value::from("ada"),
                previous_value: Value::None,
            }],
        );
        assert_eq!(inner_fired.get(), 0);
    }
}
