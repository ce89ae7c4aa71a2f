//! Reflection handshake: decoding the server's type catalogue and matching
//! it against local descriptors.
//!
//! Once per connection the server sends a reflection blob whose payload is
//! itself a state encoded in the normal protocol, described by a fixed
//! built-in schema (`Reflection` → `ReflectionType[]` → `ReflectionField[]`
//! plus a root type id). [`handshake`] decodes that blob and registers every
//! server type that structurally matches a locally declared descriptor into
//! the decoder's type context, enabling `TYPE_ID` polymorphism.
//!
//! [`build_dynamic_registry`] is the schema-less alternative: it fabricates
//! a *dynamic* descriptor for every server type, so a host with no
//! compile-time schemas can mirror any room state.

use std::rc::Rc;
use std::sync::Arc;

use nohash_hasher::IntMap;

use crate::buffer::DecodeError;
use crate::decoder::Decoder;
use crate::types::{
    ChildType, Field, FieldKind, HostHooks, PrimitiveKind, TypeDescriptor,
};
use crate::value::Value;

/// One field of a server-described type.
#[derive(Debug, Clone)]
pub struct ReflectionField {
    pub name: String,
    pub type_str: String,
    pub referenced_type: Option<u32>,
}

/// One server-described type.
#[derive(Debug, Clone)]
pub struct ReflectionType {
    pub id: u32,
    pub extends_id: Option<u32>,
    pub fields: Vec<ReflectionField>,
}

/// The decoded reflection blob.
#[derive(Debug, Clone)]
pub struct Reflection {
    pub types: Vec<ReflectionType>,
    pub root_type: u32,
}

impl Reflection {
    /// The type's full field list with inherited fields resolved: ancestors
    /// first, wire indexes assigned by position in the flattened list.
    pub fn effective_fields<'a>(
        &'a self,
        ty: &'a ReflectionType,
    ) -> Vec<(u32, &'a ReflectionField)> {
        let mut chain = vec![ty];
        let mut visited = vec![ty.id];
        let mut cursor = ty;
        while let Some(parent_id) = cursor.extends_id {
            if visited.contains(&parent_id) {
                break;
            }
            let Some(parent) = self.types.iter().find(|t| t.id == parent_id) else {
                break;
            };
            visited.push(parent_id);
            chain.push(parent);
            cursor = parent;
        }
        chain.reverse();

        let mut fields = Vec::new();
        let mut index = 0u32;
        for ty in chain {
            for field in &ty.fields {
                fields.push((index, field));
                index += 1;
            }
        }
        fields
    }
}

/// The built-in descriptor used to decode reflection blobs.
pub fn reflection_descriptor() -> Arc<TypeDescriptor> {
    let field_desc = TypeDescriptor::new_static(
        "ReflectionField",
        vec![
            Field::new(0, "name", FieldKind::Primitive(PrimitiveKind::String)),
            Field::new(1, "type", FieldKind::Primitive(PrimitiveKind::String)),
            Field::new(
                2,
                "referencedType",
                FieldKind::Primitive(PrimitiveKind::Number),
            ),
        ],
    );
    let type_desc = TypeDescriptor::new_static(
        "ReflectionType",
        vec![
            Field::new(0, "id", FieldKind::Primitive(PrimitiveKind::Number)),
            Field::new(1, "extendsId", FieldKind::Primitive(PrimitiveKind::Number)),
            Field::new(2, "fields", FieldKind::Array(ChildType::Schema(field_desc))),
        ],
    );
    TypeDescriptor::new_static(
        "Reflection",
        vec![
            Field::new(0, "types", FieldKind::Array(ChildType::Schema(type_desc))),
            Field::new(1, "rootType", FieldKind::Primitive(PrimitiveKind::Number)),
        ],
    )
}

fn number_field(decoder: &Decoder, ref_id: u32, name: &str) -> Option<f64> {
    decoder
        .instance(ref_id)?
        .get_by_name(name)
        .and_then(Value::as_f64)
}

/// Decodes a reflection blob into its own throwaway state graph.
pub fn decode_reflection(bytes: &[u8], offset: usize) -> Result<Reflection, DecodeError> {
    let mut decoder = Decoder::new(reflection_descriptor());
    decoder.decode_with_offset(bytes, offset)?;

    let mut types = Vec::new();
    let types_ref = decoder
        .state()
        .get_by_name("types")
        .and_then(Value::ref_id);
    if let Some(types_id) = types_ref {
        let type_ids: Vec<u32> = decoder
            .array(types_id)
            .map(|arr| arr.iter().filter_map(|(_, v)| v.ref_id()).collect())
            .unwrap_or_default();
        for type_id in type_ids {
            let id = number_field(&decoder, type_id, "id").unwrap_or(0.0) as u32;
            let extends_id = number_field(&decoder, type_id, "extendsId")
                .filter(|n| *n >= 0.0)
                .map(|n| n as u32);

            let mut fields = Vec::new();
            let fields_ref = decoder
                .instance(type_id)
                .and_then(|i| i.get_by_name("fields"))
                .and_then(Value::ref_id);
            if let Some(fields_id) = fields_ref {
                let field_ids: Vec<u32> = decoder
                    .array(fields_id)
                    .map(|arr| arr.iter().filter_map(|(_, v)| v.ref_id()).collect())
                    .unwrap_or_default();
                for field_id in field_ids {
                    let instance = decoder.instance(field_id);
                    let name = instance
                        .and_then(|i| i.get_by_name("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let type_str = instance
                        .and_then(|i| i.get_by_name("type"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let referenced_type = number_field(&decoder, field_id, "referencedType")
                        .filter(|n| *n >= 0.0)
                        .map(|n| n as u32);
                    fields.push(ReflectionField {
                        name,
                        type_str,
                        referenced_type,
                    });
                }
            }
            types.push(ReflectionType {
                id,
                extends_id,
                fields,
            });
        }
    }

    let root_type = decoder
        .state()
        .get_by_name("rootType")
        .and_then(Value::as_f64)
        .unwrap_or(0.0) as u32;

    Ok(Reflection { types, root_type })
}

/// Every descriptor transitively reachable from `root` through field child
/// types, deduplicated by identity.
fn reachable_descriptors(root: Arc<TypeDescriptor>) -> Vec<Arc<TypeDescriptor>> {
    let mut out: Vec<Arc<TypeDescriptor>> = Vec::new();
    let mut pending = vec![root];
    while let Some(desc) = pending.pop() {
        if out.iter().any(|d| Arc::ptr_eq(d, &desc)) {
            continue;
        }
        for field in desc.fields() {
            match &field.kind {
                FieldKind::Ref(child) => pending.push(child.clone()),
                FieldKind::Array(ChildType::Schema(child))
                | FieldKind::Map(ChildType::Schema(child)) => pending.push(child.clone()),
                _ => {}
            }
        }
        out.push(desc);
    }
    out
}

/// Structural match between a local descriptor and a server type: same total
/// field count, and every local field has a reflection field with equal
/// index and name whose type string starts with the local type tag (the
/// wire says e.g. `"ref:3"` where the local side says `"ref"`).
fn descriptor_matches(local: &TypeDescriptor, fields: &[(u32, &ReflectionField)]) -> bool {
    if local.field_count() != fields.len() {
        return false;
    }
    local.fields().iter().all(|lf| {
        fields.iter().any(|(index, rf)| {
            *index == lf.index && rf.name == *lf.name && rf.type_str.starts_with(lf.kind.type_str())
        })
    })
}

/// Decodes the handshake blob and registers every matched server type into
/// the decoder's type context. Unmatched server types stay unregistered;
/// frames referencing one fall back to the field's declared descriptor.
pub fn handshake(decoder: &mut Decoder, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
    let reflection = decode_reflection(bytes, offset)?;
    let locals = reachable_descriptors(decoder.root_descriptor().clone());

    for ty in &reflection.types {
        let fields = reflection.effective_fields(ty);
        if let Some(local) = locals
            .iter()
            .find(|local| descriptor_matches(local, &fields))
        {
            decoder.context_mut().set(ty.id, local.clone());
        }
    }
    Ok(())
}

/// Dynamic descriptors for every server type, fabricated from a handshake
/// blob. The host hooks (if any) are shared by every descriptor.
pub struct DynamicRegistry {
    pub root: Arc<TypeDescriptor>,
    pub types: IntMap<u32, Arc<TypeDescriptor>>,
}

impl DynamicRegistry {
    /// Installs every type into a decoder's context, enabling `TYPE_ID`
    /// dispatch across the whole catalogue.
    pub fn install(&self, decoder: &mut Decoder) {
        for (id, desc) in &self.types {
            decoder.context_mut().set(*id, desc.clone());
        }
    }
}

/// Builds a [`DynamicRegistry`] from a handshake blob: one dynamic
/// descriptor per server type, field tables wired up across references.
pub fn build_dynamic_registry(
    bytes: &[u8],
    offset: usize,
    hooks: Option<Rc<dyn HostHooks>>,
) -> Result<DynamicRegistry, DecodeError> {
    let reflection = decode_reflection(bytes, offset)?;

    let mut by_id: IntMap<u32, Arc<TypeDescriptor>> = IntMap::default();
    for ty in &reflection.types {
        let name = format!("ServerType{}", ty.id);
        by_id.insert(ty.id, TypeDescriptor::new_dynamic(&name, hooks.clone()));
    }

    for ty in &reflection.types {
        let fields = reflection
            .effective_fields(ty)
            .into_iter()
            .map(|(index, rf)| Field {
                index,
                name: rf.name.as_str().into(),
                kind: parse_field_kind(rf, &by_id),
            })
            .collect();
        if let Some(desc) = by_id.get(&ty.id) {
            desc.init_fields(fields);
        }
    }

    let root = by_id
        .get(&reflection.root_type)
        .cloned()
        .ok_or(DecodeError::RefNotFound(reflection.root_type))?;
    Ok(DynamicRegistry { root, types: by_id })
}

fn parse_field_kind(rf: &ReflectionField, by_id: &IntMap<u32, Arc<TypeDescriptor>>) -> FieldKind {
    let (base, suffix) = match rf.type_str.split_once(':') {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (rf.type_str.as_str(), None),
    };

    let schema_child = |fallback_name: &str| -> Arc<TypeDescriptor> {
        rf.referenced_type
            .and_then(|id| by_id.get(&id).cloned())
            .unwrap_or_else(|| TypeDescriptor::new_dynamic(fallback_name, None))
    };
    let collection_child = || -> ChildType {
        if let Some(kind) = suffix.and_then(PrimitiveKind::from_type_str) {
            ChildType::Primitive(kind)
        } else if rf.referenced_type.is_some() {
            ChildType::Schema(schema_child("Unreferenced"))
        } else {
            ChildType::Primitive(PrimitiveKind::String)
        }
    };

    match base {
        "ref" => FieldKind::Ref(schema_child("Unreferenced")),
        "array" => FieldKind::Array(collection_child()),
        "map" => FieldKind::Map(collection_child()),
        other => match PrimitiveKind::from_type_str(other) {
            Some(kind) => FieldKind::Primitive(kind),
            None => {
                log::warn!("unknown reflection field type `{}`; treating as string", other);
                FieldKind::Primitive(PrimitiveKind::String)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rf(name: &str, type_str: &str, referenced: Option<u32>) -> ReflectionField {
        ReflectionField {
            name: name.into(),
            type_str: type_str.into(),
            referenced_type: referenced,
        }
    }

    fn player_reflection() -> Reflection {
        Reflection {
            types: vec![
                ReflectionType {
                    id: 0,
                    extends_id: None,
                    fields: vec![rf("name", "string", None), rf("players", "map:ref", Some(1))],
                },
                ReflectionType {
                    id: 1,
                    extends_id: None,
                    fields: vec![rf("x", "int32", None), rf("y", "int32", None)],
                },
            ],
            root_type: 0,
        }
    }

    fn player_descriptor() -> Arc<TypeDescriptor> {
        TypeDescriptor::new_static(
            "Player",
            vec![
                Field::new(0, "x", FieldKind::Primitive(PrimitiveKind::I32)),
                Field::new(1, "y", FieldKind::Primitive(PrimitiveKind::I32)),
            ],
        )
    }

    fn state_descriptor() -> Arc<TypeDescriptor> {
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

    #[test]
    fn matching_registers_both_types() {
        let reflection = player_reflection();
        let mut decoder = Decoder::new(state_descriptor());
        let locals = reachable_descriptors(decoder.root_descriptor().clone());
        assert_eq!(locals.len(), 2);

        for ty in &reflection.types {
            let fields = reflection.effective_fields(ty);
            let matched = locals
                .iter()
                .find(|local| descriptor_matches(local, &fields))
                .cloned();
            if let Some(local) = matched {
                decoder.context_mut().set(ty.id, local);
            }
        }
        assert_eq!(decoder.context().get(0).unwrap().name(), "State");
        assert_eq!(decoder.context().get(1).unwrap().name(), "Player");
    }

    #[test]
    fn type_string_prefix_tolerates_wire_suffix() {
        let fields = vec![rf("players", "map:ref", Some(1))];
        let pairs: Vec<(u32, &ReflectionField)> =
            fields.iter().enumerate().map(|(i, f)| (i as u32, f)).collect();
        let local = TypeDescriptor::new_static(
            "Lobby",
            vec![Field::new(
                0,
                "players",
                FieldKind::Map(ChildType::Schema(player_descriptor())),
            )],
        );
        assert!(descriptor_matches(&local, &pairs));
    }

    #[test]
    fn field_count_mismatch_rejects() {
        let reflection = player_reflection();
        let fields = reflection.effective_fields(&reflection.types[1]);
        let local = TypeDescriptor::new_static(
            "Player",
            vec![Field::new(0, "x", FieldKind::Primitive(PrimitiveKind::I32))],
        );
        assert!(!descriptor_matches(&local, &fields));
    }

    #[test]
    fn effective_fields_flatten_extends_chain() {
        let reflection = Reflection {
            types: vec![
                ReflectionType {
                    id: 0,
                    extends_id: None,
                    fields: vec![rf("x", "int32", None)],
                },
                ReflectionType {
                    id: 1,
                    extends_id: Some(0),
                    fields: vec![rf("skill", "number", None)],
                },
            ],
            root_type: 1,
        };
        let flat = reflection.effective_fields(&reflection.types[1]);
        let names: Vec<(u32, &str)> = flat.iter().map(|(i, f)| (*i, f.name.as_str())).collect();
        assert_eq!(names, vec![(0, "x"), (1, "skill")]);
    }

    #[test]
    fn dynamic_registry_builds_linked_descriptors() {
        // Fabricate descriptors straight from an in-memory reflection by
        // reusing the internal builder pieces.
        let reflection = player_reflection();
        let mut by_id: IntMap<u32, Arc<TypeDescriptor>> = IntMap::default();
        for ty in &reflection.types {
            by_id.insert(
                ty.id,
                TypeDescriptor::new_dynamic(&format!("ServerType{}", ty.id), None),
            );
        }
        for ty in &reflection.types {
            let fields = reflection
                .effective_fields(ty)
                .into_iter()
                .map(|(index, rf)| Field {
                    index,
                    name: rf.name.as_str().into(),
                    kind: parse_field_kind(rf, &by_id),
                })
                .collect();
            by_id.get(&ty.id).unwrap().init_fields(fields);
        }
        let root = by_id.get(&0).unwrap();
        let players = root.field_by_name("players").unwrap();
        match &players.kind {
            FieldKind::Map(ChildType::Schema(child)) => {
                assert_eq!(child.name(), "ServerType1");
                assert_eq!(child.field_count(), 2);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
