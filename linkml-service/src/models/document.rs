//! Decoding of raw request bodies into YAML mappings.

use crate::error::ServiceError;
use serde_yaml::{Mapping, Value};

/// A decoded request body: the root mapping of a single YAML document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument(Mapping);

impl ParsedDocument {
    pub fn into_mapping(self) -> Mapping {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Parses `bytes` as one YAML document whose root is a mapping.
///
/// Anything else (syntax errors, several documents, an empty body, a scalar or
/// sequence root) is rejected as `InvalidDocument`.
pub fn parse_document(bytes: &[u8]) -> Result<ParsedDocument, ServiceError> {
    let value: Value =
        serde_yaml::from_slice(bytes).map_err(|e| ServiceError::InvalidDocument(e.to_string()))?;

    match value {
        Value::Mapping(mapping) => Ok(ParsedDocument(mapping)),
        Value::Tagged(tagged) => match tagged.value {
            Value::Mapping(mapping) => Ok(ParsedDocument(mapping)),
            other => Err(not_a_mapping(&other)),
        },
        other => Err(not_a_mapping(&other)),
    }
}

fn not_a_mapping(value: &Value) -> ServiceError {
    let found = match value {
        Value::Null => "an empty document",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    };
    ServiceError::InvalidDocument(format!(
        "expected a mapping at the document root, found {}",
        found
    ))
}
