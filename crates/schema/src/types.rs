//! Schema type model: field metadata, type descriptors and node instances.
//!
//! A [`TypeDescriptor`] is read-only metadata for one schema type. Two forms
//! coexist behind the same interface: a *static* form supplied by user code
//! at build time, and a *dynamic* form whose fields were discovered from the
//! server's reflection blob. Dynamic descriptors additionally carry host
//! hooks so a host binding can mirror nodes into its own object model.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use nohash_hasher::IntMap;

use crate::value::{RefId, Value};

/// Semantic tag of a primitive wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Number,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimitiveKind {
    /// Parses the textual type tags used on the wire and in reflection data.
    pub fn from_type_str(s: &str) -> Option<PrimitiveKind> {
        Some(match s {
            "string" => PrimitiveKind::String,
            "number" => PrimitiveKind::Number,
            "boolean" => PrimitiveKind::Bool,
            "int8" => PrimitiveKind::I8,
            "uint8" => PrimitiveKind::U8,
            "int16" => PrimitiveKind::I16,
            "uint16" => PrimitiveKind::U16,
            "int32" => PrimitiveKind::I32,
            "uint32" => PrimitiveKind::U32,
            "int64" => PrimitiveKind::I64,
            "uint64" => PrimitiveKind::U64,
            "float32" => PrimitiveKind::F32,
            "float64" => PrimitiveKind::F64,
            _ => return None,
        })
    }

    pub fn type_str(self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Bool => "boolean",
            PrimitiveKind::I8 => "int8",
            PrimitiveKind::U8 => "uint8",
            PrimitiveKind::I16 => "int16",
            PrimitiveKind::U16 => "uint16",
            PrimitiveKind::I32 => "int32",
            PrimitiveKind::U32 => "uint32",
            PrimitiveKind::I64 => "int64",
            PrimitiveKind::U64 => "uint64",
            PrimitiveKind::F32 => "float32",
            PrimitiveKind::F64 => "float64",
        }
    }
}

/// Element type of a collection field.
#[derive(Clone)]
pub enum ChildType {
    Schema(Arc<TypeDescriptor>),
    Primitive(PrimitiveKind),
}

impl ChildType {
    pub fn is_schema(&self) -> bool {
        matches!(self, ChildType::Schema(_))
    }
}

impl fmt::Debug for ChildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildType::Schema(d) => write!(f, "Schema({})", d.name()),
            ChildType::Primitive(p) => write!(f, "Primitive({})", p.type_str()),
        }
    }
}

/// What a field holds: a primitive, a nested schema node, or a collection.
#[derive(Clone, Debug)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    Ref(Arc<TypeDescriptor>),
    Array(ChildType),
    Map(ChildType),
}

impl FieldKind {
    /// The textual tag this kind matches against reflection type strings.
    pub fn type_str(&self) -> &'static str {
        match self {
            FieldKind::Primitive(p) => p.type_str(),
            FieldKind::Ref(_) => "ref",
            FieldKind::Array(_) => "array",
            FieldKind::Map(_) => "map",
        }
    }
}

/// One field of a schema type, ordered by its wire `index`.
#[derive(Clone, Debug)]
pub struct Field {
    pub index: u32,
    pub name: Arc<str>,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(index: u32, name: &str, kind: FieldKind) -> Field {
        Field {
            index,
            name: name.into(),
            kind,
        }
    }
}

/// Host-side lifecycle hooks carried by dynamic descriptors, letting a host
/// binding maintain a parallel object for every node the decoder creates.
pub trait HostHooks {
    fn create_instance(&self, ref_id: RefId, descriptor: &TypeDescriptor);
    fn set_field(&self, ref_id: RefId, field: &str, value: &Value);
    fn free_instance(&self, ref_id: RefId);
}

/// Which of the two descriptor forms this is.
pub enum Form {
    /// Known at build time; node storage is a dense slot per field.
    Static,
    /// Fields discovered from a server reflection blob; node storage is a
    /// sparse index→value table, and host hooks (if any) mirror lifecycle.
    Dynamic { hooks: Option<Rc<dyn HostHooks>> },
}

/// Read-only metadata for one schema type.
///
/// Fields may be supplied at construction or deferred and initialised once
/// afterwards — the latter is what lets mutually recursive type graphs be
/// wired up (allocate every descriptor first, then fill in field tables
/// that reference the allocated descriptors).
pub struct TypeDescriptor {
    name: Arc<str>,
    fields: OnceCell<Vec<Field>>,
    form: Form,
}

impl TypeDescriptor {
    pub fn new_static(name: &str, fields: Vec<Field>) -> Arc<TypeDescriptor> {
        let desc = TypeDescriptor {
            name: name.into(),
            fields: OnceCell::new(),
            form: Form::Static,
        };
        let _ = desc.fields.set(fields);
        Arc::new(desc)
    }

    /// Allocates a descriptor whose field table is filled later via
    /// [`init_fields`](TypeDescriptor::init_fields).
    pub fn new_deferred(name: &str, form: Form) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor {
            name: name.into(),
            fields: OnceCell::new(),
            form,
        })
    }

    pub fn new_dynamic(name: &str, hooks: Option<Rc<dyn HostHooks>>) -> Arc<TypeDescriptor> {
        Self::new_deferred(name, Form::Dynamic { hooks })
    }

    /// Fills a deferred field table. Returns `false` if already initialised.
    pub fn init_fields(&self, fields: Vec<Field>) -> bool {
        self.fields.set(fields).is_ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        self.fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field_count(&self) -> usize {
        self.fields().len()
    }

    /// Looks a field up by its wire index.
    pub fn field_by_index(&self, index: u32) -> Option<&Field> {
        self.fields().iter().find(|f| f.index == index)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| &*f.name == name)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.form, Form::Dynamic { .. })
    }

    pub fn hooks(&self) -> Option<&Rc<dyn HostHooks>> {
        match &self.form {
            Form::Dynamic { hooks } => hooks.as_ref(),
            Form::Static => None,
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("fields", &self.field_count())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// Per-node storage: dense slots for static types, sparse table for dynamic.
enum Storage {
    Slots(Vec<Value>),
    Sparse(IntMap<u32, Value>),
}

/// A structured record in the state graph, created by the decoder when its
/// refId first appears on the wire and owned by the reference tracker.
pub struct SchemaInstance {
    ref_id: RefId,
    descriptor: Arc<TypeDescriptor>,
    storage: Storage,
}

impl SchemaInstance {
    pub fn new(ref_id: RefId, descriptor: Arc<TypeDescriptor>) -> SchemaInstance {
        let storage = if descriptor.is_dynamic() {
            Storage::Sparse(IntMap::default())
        } else {
            Storage::Slots(vec![Value::None; descriptor.field_count()])
        };
        SchemaInstance {
            ref_id,
            descriptor,
            storage,
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    fn slot_of(&self, index: u32) -> Option<usize> {
        self.descriptor.fields().iter().position(|f| f.index == index)
    }

    /// The value at a wire field index; fields never observed on the wire
    /// read as [`Value::None`].
    pub fn get(&self, index: u32) -> &Value {
        match &self.storage {
            Storage::Slots(slots) => self
                .slot_of(index)
                .and_then(|slot| slots.get(slot))
                .unwrap_or(&Value::None),
            Storage::Sparse(table) => table.get(&index).unwrap_or(&Value::None),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let field = self.descriptor.field_by_name(name)?;
        Some(self.get(field.index))
    }

    pub fn set(&mut self, index: u32, value: Value) {
        match &mut self.storage {
            Storage::Slots(slots) => {
                if let Some(slot) = self
                    .descriptor
                    .fields()
                    .iter()
                    .position(|f| f.index == index)
                {
                    slots[slot] = value;
                }
            }
            Storage::Sparse(table) => {
                if value.is_none() {
                    table.remove(&index);
                } else {
                    table.insert(index, value);
                }
            }
        }
    }

    /// Every stored value, for GC traversal.
    pub(crate) fn values(&self) -> Vec<Value> {
        match &self.storage {
            Storage::Slots(slots) => slots.clone(),
            Storage::Sparse(table) => table.values().cloned().collect(),
        }
    }
}

impl fmt::Debug for SchemaInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaInstance")
            .field("ref_id", &self.ref_id)
            .field("type", &self.descriptor.name())
            .finish()
    }
}
