//! Typed view of a LinkML schema definition.
//!
//! Only the metaslots the service reasons about are modelled as fields; every
//! other key is kept verbatim in `extra` so the canonical re-serialization
//! handed to the external tools loses nothing.
//!
//! Parsing follows LinkML's own leniency: multivalued metaslots take a lone
//! scalar, string metaslots take any scalar, and element collections may be
//! written as a list of definitions carrying their own name.

use crate::error::ServiceError;
use crate::models::ParsedDocument;
use indexmap::IndexMap;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

/// Types shipped with `linkml:types`, always resolvable as a range.
pub const BUILTIN_TYPES: &[&str] = &[
    "string",
    "integer",
    "boolean",
    "float",
    "double",
    "decimal",
    "time",
    "date",
    "datetime",
    "date_or_datetime",
    "uriorcurie",
    "curie",
    "uri",
    "ncname",
    "objectidentifier",
    "nodeidentifier",
    "jsonpointer",
    "jsonpath",
    "sparqlpath",
];

const LINKML_TYPES_IMPORT: &str = "linkml:types";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(deserialize_with = "text")]
    pub id: String,
    #[serde(deserialize_with = "text")]
    pub name: String,

    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub prefixes: IndexMap<String, Prefix>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub default_prefix: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub default_range: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,

    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub classes: IndexMap<String, ClassDefinition>,
    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub slots: IndexMap<String, SlotDefinition>,
    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub enums: IndexMap<String, EnumDefinition>,
    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub types: IndexMap<String, TypeDefinition>,

    #[serde(flatten)]
    pub extra: Mapping,
}

/// A prefix is either written as a bare expansion or in expanded form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prefix {
    Reference(String),
    Expanded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_prefix: Option<String>,
        prefix_reference: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub is_a: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub mixins: Vec<String>,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_root: Option<bool>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub class_uri: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<String>,
    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, SlotDefinition>,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotDefinition {
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub is_a: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multivalued: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<bool>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub slot_uri: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDefinition {
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "elements", skip_serializing_if = "IndexMap::is_empty")]
    pub permissible_values: IndexMap<String, PermissibleValue>,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissibleValue {
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "typeof",
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_of: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

/// A definition that can appear in an element collection.
trait Element: DeserializeOwned + Default {
    /// Key holding the element's name when the collection is written as a list.
    const NAME_KEY: &'static str = "name";
}

impl Element for ClassDefinition {}
impl Element for SlotDefinition {}
impl Element for EnumDefinition {}
impl Element for TypeDefinition {}

impl Element for PermissibleValue {
    const NAME_KEY: &'static str = "text";
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_text(Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_text(value).map(Some).map_err(D::Error::custom),
    }
}

/// A lone scalar stands for a one-element list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                scalar_text(item).map_err(|e| D::Error::custom(format!("[{}]: {}", index, e)))
            })
            .collect(),
        value => scalar_text(value).map(|v| vec![v]).map_err(D::Error::custom),
    }
}

/// Element collections are a map from name to definition, where a bare key
/// (`Person:`) is an empty definition, or a list of definitions that carry
/// their name under `T::NAME_KEY`.
fn elements<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Element,
{
    let entries: Vec<(Value, Value)> = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Mapping(mapping) => mapping.into_iter().collect(),
        Value::Sequence(items) => items
            .into_iter()
            .map(list_entry::<T>)
            .collect::<Result<_, _>>()
            .map_err(D::Error::custom)?,
        other => {
            return Err(D::Error::custom(format!(
                "expected a map or list of definitions, found {}",
                kind(&other)
            )))
        }
    };

    let mut definitions = IndexMap::with_capacity(entries.len());
    for (key, body) in entries {
        let name = scalar_text(key).map_err(D::Error::custom)?;
        let definition = if body.is_null() {
            T::default()
        } else {
            serde_path_to_error::deserialize(body)
                .map_err(|e| D::Error::custom(located(Some(name.as_str()), e)))?
        };
        definitions.insert(name, definition);
    }
    Ok(definitions)
}

fn list_entry<T: Element>(item: Value) -> Result<(Value, Value), String> {
    match item {
        Value::Mapping(mut body) => {
            let name = body
                .remove(T::NAME_KEY)
                .ok_or_else(|| format!("list entry has no `{}`", T::NAME_KEY))?;
            Ok((name, Value::Mapping(body)))
        }
        scalar => Ok((scalar, Value::Null)),
    }
}

fn scalar_text(value: Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected a scalar, found {}", kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Prefixes a deserialization error with the key path it occurred at.
fn located(owner: Option<&str>, error: serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = error.path().to_string();
    let location = match (owner, path.as_str()) {
        (None, ".") => return error.inner().to_string(),
        (Some(owner), ".") => owner.to_string(),
        (None, _) => path,
        (Some(owner), _) => format!("{}.{}", owner, path),
    };
    format!("{}: {}", location, error.inner())
}

impl SchemaDefinition {
    /// Builds and validates a schema from a parsed request document.
    pub fn from_document(document: ParsedDocument) -> Result<Self, ServiceError> {
        let schema: SchemaDefinition =
            serde_path_to_error::deserialize(Value::Mapping(document.into_mapping()))
                .map_err(|e| ServiceError::InvalidSchema(located(None, e)))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Deterministic YAML rendering handed to the external tools.
    pub fn to_canonical_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.id.trim().is_empty() {
            return Err(ServiceError::InvalidSchema(
                "field `id` must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ServiceError::InvalidSchema(
                "field `name` must not be empty".to_string(),
            ));
        }

        if self.resolves_locally() {
            self.check_references()?;
        }
        Ok(())
    }

    /// Imports other than the built-in types may define referenced elements,
    /// which cannot be checked without fetching them.
    fn resolves_locally(&self) -> bool {
        self.imports.iter().all(|import| import == LINKML_TYPES_IMPORT)
    }

    fn check_references(&self) -> Result<(), ServiceError> {
        let ranges: HashSet<&str> = self
            .classes
            .keys()
            .chain(self.enums.keys())
            .chain(self.types.keys())
            .map(String::as_str)
            .chain(BUILTIN_TYPES.iter().copied())
            .collect();

        if let Some(range) = &self.default_range {
            if !ranges.contains(range.as_str()) {
                return Err(unresolved("schema", "default_range", range));
            }
        }

        for (name, class) in &self.classes {
            let owner = format!("class `{}`", name);
            if let Some(parent) = &class.is_a {
                if !self.classes.contains_key(parent) {
                    return Err(unresolved(&owner, "is_a", parent));
                }
            }
            for mixin in &class.mixins {
                if !self.classes.contains_key(mixin) {
                    return Err(unresolved(&owner, "mixins", mixin));
                }
            }
            for slot in &class.slots {
                if !self.slots.contains_key(slot) {
                    return Err(unresolved(&owner, "slots", slot));
                }
            }
            for (attribute, definition) in &class.attributes {
                let owner = format!("attribute `{}` of class `{}`", attribute, name);
                self.check_slot(&owner, definition, &ranges)?;
            }
        }

        for (name, slot) in &self.slots {
            self.check_slot(&format!("slot `{}`", name), slot, &ranges)?;
        }

        for (name, definition) in &self.types {
            if let Some(parent) = &definition.type_of {
                if !self.types.contains_key(parent) && !BUILTIN_TYPES.contains(&parent.as_str()) {
                    return Err(unresolved(&format!("type `{}`", name), "typeof", parent));
                }
            }
        }

        Ok(())
    }

    fn check_slot(
        &self,
        owner: &str,
        slot: &SlotDefinition,
        ranges: &HashSet<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(range) = &slot.range {
            if !ranges.contains(range.as_str()) {
                return Err(unresolved(owner, "range", range));
            }
        }
        if let Some(parent) = &slot.is_a {
            if !self.slots.contains_key(parent) {
                return Err(unresolved(owner, "is_a", parent));
            }
        }
        Ok(())
    }
}

fn unresolved(owner: &str, field: &str, target: &str) -> ServiceError {
    ServiceError::InvalidSchema(format!(
        "{} field `{}` references undefined element `{}`",
        owner, field, target
    ))
}
