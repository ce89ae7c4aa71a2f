//! Decoded values and change records.

use std::fmt;
use std::sync::Arc;

/// Server-assigned integer naming one live state node across a session.
pub type RefId = u32;

/// A decoded field or collection-item value.
///
/// Reference-typed values (`ref` fields, collections, collection items with
/// schema children) carry only the [`RefId`]; the node itself is owned by
/// the reference tracker and resolved through it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Unset / cleared.
    #[default]
    None,
    String(Arc<str>),
    /// The variable-width `number` wire type, 64-bit float semantics.
    Number(f64),
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// A tracked node; resolve through the decoder's reference tracker.
    Ref(RefId),
}

impl Value {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The refId when this value is reference-typed.
    #[inline]
    pub fn ref_id(&self) -> Option<RefId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of any numeric variant, widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Number(n) => n,
            Value::I8(n) => n as f64,
            Value::U8(n) => n as f64,
            Value::I16(n) => n as f64,
            Value::U16(n) => n as f64,
            Value::I32(n) => n as f64,
            Value::U32(n) => n as f64,
            Value::I64(n) => n as f64,
            Value::U64(n) => n as f64,
            Value::F32(n) => n as f64,
            Value::F64(n) => n,
            _ => return None,
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

/// The key identifying a slot within a collection: an integer index for
/// ordered lists, a string key for keyed maps.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum DynamicIndex {
    Index(u32),
    Key(Arc<str>),
}

impl DynamicIndex {
    pub fn as_index(&self) -> Option<u32> {
        match self {
            DynamicIndex::Index(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            DynamicIndex::Key(k) => Some(k),
            _ => None,
        }
    }
}

impl fmt::Debug for DynamicIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicIndex::Index(i) => write!(f, "{i}"),
            DynamicIndex::Key(k) => write!(f, "{k:?}"),
        }
    }
}

/// One decoded mutation, accumulated per frame and replayed into the
/// callback registry after the frame's mutations have all been applied.
///
/// `field` is set for schema-node mutations, `dynamic_index` for collection
/// mutations. `previous_value` is the value the slot held before the
/// operation applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    pub ref_id: RefId,
    /// Raw operation byte; test with [`Operation`](crate::spec::Operation).
    pub op: u8,
    pub field: Option<Arc<str>>,
    pub dynamic_index: Option<DynamicIndex>,
    pub value: Value,
    pub previous_value: Value,
}
