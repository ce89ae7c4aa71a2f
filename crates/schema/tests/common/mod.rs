//! Shared helpers for decoder integration tests: hand-rolled frame building
//! (the library only decodes; tests play the server's role) and the fixture
//! schema used across scenarios.
#![allow(dead_code)]

use std::sync::Arc;

use berth_schema::spec::{SWITCH_TO_STRUCTURE, TYPE_ID};
use berth_schema::{ChildType, Field, FieldKind, PrimitiveKind, TypeDescriptor};

/// Builds one wire frame byte by byte.
#[derive(Default)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    pub fn switch(mut self, ref_id: u32) -> Frame {
        self.bytes.push(SWITCH_TO_STRUCTURE);
        self.push_num(ref_id);
        self
    }

    /// Schema mutation byte: operation in the high two bits, field index in
    /// the low six.
    pub fn field_op(mut self, op: u8, field_index: u8) -> Frame {
        self.bytes.push(op | field_index);
        self
    }

    /// Full-byte collection operation.
    pub fn op(mut self, op: u8) -> Frame {
        self.bytes.push(op);
        self
    }

    pub fn num(mut self, n: u32) -> Frame {
        self.push_num(n);
        self
    }

    /// msgpack fixstr (tests keep strings short).
    pub fn string(mut self, s: &str) -> Frame {
        assert!(s.len() <= 31, "test strings use fixstr");
        self.bytes.push(0xa0 | s.len() as u8);
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    /// Fixed-width little-endian int32 (the `int32` primitive encoding).
    pub fn i32(mut self, v: i32) -> Frame {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn type_id(mut self, id: u32) -> Frame {
        self.bytes.push(TYPE_ID);
        self.push_num(id);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Frame {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    fn push_num(&mut self, n: u32) {
        if n < 0x80 {
            self.bytes.push(n as u8);
        } else if n <= u8::MAX as u32 {
            self.bytes.push(0xcc);
            self.bytes.push(n as u8);
        } else if n <= u16::MAX as u32 {
            self.bytes.push(0xcd);
            self.bytes.extend_from_slice(&(n as u16).to_le_bytes());
        } else {
            self.bytes.push(0xce);
            self.bytes.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// `Player { #0 x: int32, #1 y: int32 }`
pub fn player_descriptor() -> Arc<TypeDescriptor> {
    TypeDescriptor::new_static(
        "Player",
        vec![
            Field::new(0, "x", FieldKind::Primitive(PrimitiveKind::I32)),
            Field::new(1, "y", FieldKind::Primitive(PrimitiveKind::I32)),
        ],
    )
}

/// `State { #0 name: string, #1 players: map<Player> }`
pub fn state_descriptor() -> Arc<TypeDescriptor> {
    TypeDescriptor::new_static(
        "State",
        vec![
            Field::new(0, "name", FieldKind::Primitive(PrimitiveKind::String)),
            Field::new(
                1,
                "players",
                FieldKind::Map(ChildType::Schema(player_descriptor())),
            ),
        ],
    )
}

/// The frame of the "nested schema creation" scenario: creates the players
/// map at refId 1 and a player "p1" at refId 2 with x=10, y=20.
pub fn nested_creation_frame() -> Vec<u8> {
    Frame::new()
        .switch(0)
        .field_op(0x80, 1) // ADD players
        .num(1)
        .switch(1)
        .op(0x80) // map ADD
        .num(0) // slot
        .string("p1")
        .num(2) // player refId
        .switch(2)
        .field_op(0x80, 0)
        .i32(10)
        .field_op(0x80, 1)
        .i32(20)
        .build()
}
