//! Binds one decoder + callback registry pair to a room's lifetime.

use std::rc::Rc;
use std::sync::Arc;

use berth_schema::{
    build_dynamic_registry, handshake, Callbacks, DecodeError, Decoder, HostHooks,
    SchemaInstance, TypeDescriptor,
};

enum Mode {
    /// User-supplied descriptors; the handshake matches server types against
    /// them for `TYPE_ID` dispatch.
    Static,
    /// No compile-time schemas: the handshake fabricates dynamic descriptors
    /// for the whole catalogue and replaces the decoder.
    Dynamic { hooks: Option<Rc<dyn HostHooks>> },
}

/// The room-facing serializer: feeds snapshots and patches through the
/// decoder, dispatches callbacks, runs GC.
pub struct SchemaSerializer {
    decoder: Decoder,
    callbacks: Callbacks,
    mode: Mode,
}

impl SchemaSerializer {
    /// A *dynamic* root descriptor with no fields selects schema-less mode:
    /// everything is discovered from the handshake.
    pub fn new(root: Arc<TypeDescriptor>) -> SchemaSerializer {
        let mode = if root.is_dynamic() && root.field_count() == 0 {
            Mode::Dynamic {
                hooks: root.hooks().cloned(),
            }
        } else {
            Mode::Static
        };
        SchemaSerializer {
            decoder: Decoder::new(root),
            callbacks: Callbacks::new(),
            mode,
        }
    }

    pub fn handshake(&mut self, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
        match &self.mode {
            Mode::Static => handshake(&mut self.decoder, bytes, offset),
            Mode::Dynamic { hooks } => {
                let registry = build_dynamic_registry(bytes, offset, hooks.clone())?;
                let mut decoder = Decoder::new(registry.root.clone());
                registry.install(&mut decoder);
                self.decoder = decoder;
                Ok(())
            }
        }
    }

    /// Applies a full-state snapshot.
    pub fn set_state(&mut self, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
        self.apply(bytes, offset)
    }

    /// Applies an incremental patch.
    pub fn patch(&mut self, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
        self.apply(bytes, offset)
    }

    fn apply(&mut self, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
        let changes = self.decoder.decode_with_offset(bytes, offset)?;
        self.callbacks.dispatch(&self.decoder, &changes);
        self.decoder.gc();
        Ok(())
    }

    pub fn state(&self) -> &SchemaInstance {
        self.decoder.state()
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Drops the state graph (listener registrations survive).
    pub fn teardown(&mut self) {
        self.decoder.teardown();
    }
}
