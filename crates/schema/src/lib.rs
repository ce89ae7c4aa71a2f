//! State synchronisation engine for the Berth client.
//!
//! The server owns authoritative room state and streams it to clients as
//! binary deltas. This crate maintains the client-side mirror: a typed,
//! reference-tracked state graph reconstructed by the [`Decoder`], with
//! granular change callbacks dispatched by [`Callbacks`].
//!
//! Per incoming frame:
//!
//! ```text
//! wire bytes ──► Decoder ──┬─► RefTracker   (owns nodes by refId)
//!                          ├─► state graph  (schema nodes / lists / maps)
//!                          └─► DataChange buffer ──► Callbacks ──► handlers
//! ```
//!
//! The decoder applies every mutation first, then the caller dispatches the
//! frame's changes into listeners, then [`Decoder::gc`] reclaims nodes whose
//! reference count reached zero:
//!
//! ```no_run
//! # use berth_schema::{Callbacks, Decoder};
//! # fn run(decoder: &mut Decoder, callbacks: &Callbacks, frame: &[u8]) ->
//! #     Result<(), berth_schema::DecodeError> {
//! let changes = decoder.decode(frame)?;
//! callbacks.dispatch(decoder, &changes);
//! decoder.gc();
//! # Ok(())
//! # }
//! ```
//!
//! Everything here is a single-threaded cooperative unit: decode and
//! dispatch run synchronously on the thread draining the transport queue,
//! and handlers may re-register listeners but must not re-enter `decode`.

mod buffer;
mod callbacks;
mod collections;
mod decoder;
mod reflection;
pub mod spec;
mod tracker;
mod types;
mod value;

pub use buffer::{Cursor, DecodeError};
pub use callbacks::{CallbackHandle, Callbacks};
pub use collections::{ArraySchema, MapSchema};
pub use decoder::{Decoder, TypeContext};
pub use reflection::{
    build_dynamic_registry, decode_reflection, handshake, reflection_descriptor, DynamicRegistry,
    Reflection, ReflectionField, ReflectionType,
};
pub use spec::Operation;
pub use tracker::{RefKind, RefNode, RefTracker};
pub use types::{
    ChildType, Field, FieldKind, Form, HostHooks, PrimitiveKind, SchemaInstance, TypeDescriptor,
};
pub use value::{DataChange, DynamicIndex, RefId, Value};
