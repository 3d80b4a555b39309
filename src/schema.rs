use crate::error::{DocGraphError, DocGraphResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
}

/// What a field holds. Exactly one category applies to each field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldCategory {
    Scalar,
    Numeric,
    /// Single reference to a node, stored as its identifier
    Node,
    /// Embedded object
    Object,
    ScalarList,
    NodeList,
    ObjectList,
    /// Connection-typed field; not filterable, orderable or updatable here
    Connection,
}

impl FieldCategory {
    pub fn is_list(&self) -> bool {
        matches!(self, Self::ScalarList | Self::NodeList | Self::ObjectList)
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawFieldDescriptor {
    name: String,
    target_type_name: String,
    is_scalar: bool,
    is_numeric: bool,
    is_node: bool,
    is_object: bool,
    is_scalar_list: bool,
    is_node_list: bool,
    is_object_list: bool,
}

#[derive(Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(try_from = "RawFieldDescriptor")]
pub struct FieldDescriptor {
    pub name: String,
    pub type_name: String,
    pub category: FieldCategory,
}

impl TryFrom<RawFieldDescriptor> for FieldDescriptor {
    type Error = String;

    fn try_from(raw: RawFieldDescriptor) -> Result<Self, Self::Error> {
        let flags = [
            (raw.is_scalar, FieldCategory::Scalar),
            (raw.is_numeric, FieldCategory::Numeric),
            (raw.is_node, FieldCategory::Node),
            (raw.is_object, FieldCategory::Object),
            (raw.is_scalar_list, FieldCategory::ScalarList),
            (raw.is_node_list, FieldCategory::NodeList),
            (raw.is_object_list, FieldCategory::ObjectList),
        ];
        let mut set = flags.iter().filter(|(on, _)| *on).map(|(_, c)| *c);
        let category = set.next().unwrap_or(FieldCategory::Connection);
        if set.next().is_some() {
            return Err(format!(
                "Field {} declares more than one capability flag",
                raw.name
            ));
        }
        Ok(Self {
            name: raw.name,
            type_name: raw.target_type_name,
            category,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypeDescriptor {
    kind: TypeKind,
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
    #[serde(default)]
    member_type_names: Vec<String>,
    #[serde(default)]
    implementer_type_names: Vec<String>,
    #[serde(default)]
    implements_node: bool,
    every_member_implements_node: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<Arc<FieldDescriptor>>,
    /// Union members or interface implementers
    pub possible_types: Vec<String>,
    /// For objects: the type implements Node. For unions/interfaces: every
    /// possible type does.
    pub is_node: bool,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.iter().find(|x| x.name == name)
    }

    pub fn require_field(&self, name: &str) -> DocGraphResult<&Arc<FieldDescriptor>> {
        self.field(name)
            .ok_or_else(|| DocGraphError::field_not_found(name, &self.name))
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }
}

/// Read-only map of type name to descriptor, built once per process.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl Schema {
    /// Loads the descriptor map produced by the schema collaborator:
    /// `{ "<TypeName>": { "kind": "object", "fields": [...] , ...}, ...}`
    pub fn from_json(value: serde_json::Value) -> DocGraphResult<Self> {
        let raw: HashMap<String, RawTypeDescriptor> = serde_json::from_value(value)?;

        let node_objects: HashMap<&str, bool> = raw
            .iter()
            .filter(|(_, t)| t.kind == TypeKind::Object)
            .map(|(name, t)| (name.as_str(), t.implements_node))
            .collect();

        let mut types = HashMap::new();
        for (name, raw_type) in &raw {
            let possible_types = match raw_type.kind {
                TypeKind::Union => raw_type.member_type_names.clone(),
                TypeKind::Interface => raw_type.implementer_type_names.clone(),
                _ => vec![],
            };

            for member in &possible_types {
                if !node_objects.contains_key(member.as_str()) {
                    return Err(DocGraphError::schema(format!(
                        "{name} lists {member} as a possible type but it is not an object type"
                    )));
                }
            }

            let is_node = match raw_type.kind {
                TypeKind::Object => raw_type.implements_node,
                TypeKind::Enum => false,
                TypeKind::Union | TypeKind::Interface => {
                    raw_type.every_member_implements_node.unwrap_or_else(|| {
                        !possible_types.is_empty()
                            && possible_types
                                .iter()
                                .all(|x| node_objects.get(x.as_str()).copied().unwrap_or(false))
                    })
                }
            };

            let fields = match raw_type.kind {
                TypeKind::Union | TypeKind::Enum => vec![],
                _ => raw_type.fields.iter().cloned().map(Arc::new).collect(),
            };

            types.insert(
                name.clone(),
                Arc::new(TypeDescriptor {
                    name: name.clone(),
                    kind: raw_type.kind,
                    fields,
                    possible_types,
                    is_node,
                }),
            );
        }

        Ok(Self { types })
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(type_name)
    }

    pub fn require(&self, type_name: &str) -> DocGraphResult<&Arc<TypeDescriptor>> {
        self.get(type_name)
            .ok_or_else(|| DocGraphError::TypeNotFound(type_name.to_string()))
    }
}

/// Identifier utility collaborator: the suffix that every global identifier
/// of a node type ends with.
pub trait TypeNameEncoder: Send + Sync {
    fn encode_type_name(&self, type_name: &str) -> String;
}

/// `"." + base64url(type name)`. The delimiter is outside the base64url
/// alphabet, so no encoded name is a suffix of another.
#[derive(Clone, Copy, Debug, Default)]
pub struct DotBase64Encoder;

impl TypeNameEncoder for DotBase64Encoder {
    fn encode_type_name(&self, type_name: &str) -> String {
        format!(".{}", URL_SAFE_NO_PAD.encode(type_name))
    }
}

impl<F> TypeNameEncoder for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn encode_type_name(&self, type_name: &str) -> String {
        self(type_name)
    }
}
