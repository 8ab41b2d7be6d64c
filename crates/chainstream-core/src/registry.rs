//! Type registry: maps a payload type name to its decode function.
//!
//! Built once per session from the package's message schemas and read-only
//! afterwards. Each decode function validates an opaque payload body against
//! its schema and normalises it: 64-bit integers are accepted as JSON numbers
//! or decimal strings, absent scalars take their zero value, absent repeated
//! fields become empty lists, and nested messages are decoded recursively.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DecodeError, PackageError};
use crate::package::{MessageSchema, Package};
use crate::types::AnyPayload;

/// A decode function: opaque body in, normalised message out.
pub type DecodeFn = Arc<dyn Fn(&Value) -> Result<Value, DecodeError> + Send + Sync>;

const SCALAR_KINDS: &[&str] = &["string", "uint64", "int64", "double", "bool", "bytes"];

/// A payload decoded by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Fully-qualified message name.
    pub type_name: String,
    /// Normalised field values.
    pub fields: Value,
}

impl DecodedMessage {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Immutable mapping from type name to decode function.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding a decoder for every message type in `package`.
    ///
    /// Fails if any field references a message type the package does not define.
    pub fn from_package(package: &Package) -> Result<Self, PackageError> {
        let schemas: HashMap<String, MessageSchema> = package
            .types
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();

        for schema in schemas.values() {
            for field in &schema.fields {
                if !SCALAR_KINDS.contains(&field.kind.as_str())
                    && !schemas.contains_key(&field.kind)
                {
                    return Err(PackageError::UnknownFieldType {
                        owner: schema.name.clone(),
                        field: field.name.clone(),
                        target: field.kind.clone(),
                    });
                }
            }
        }

        let schemas = Arc::new(schemas);
        let mut registry = Self::new();
        for name in schemas.keys() {
            let schemas = Arc::clone(&schemas);
            let type_name = name.clone();
            registry.register(
                name.clone(),
                Arc::new(move |value: &Value| decode_message(&schemas, &type_name, value, "")),
            );
        }

        tracing::debug!(types = registry.len(), "type registry built");
        Ok(registry)
    }

    /// Register (or replace) the decoder for `type_name`.
    pub fn register(&mut self, type_name: impl Into<String>, decoder: DecodeFn) {
        self.decoders.insert(type_name.into(), decoder);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Decode an opaque payload using the decoder registered for its type.
    pub fn decode(&self, payload: &AnyPayload) -> Result<DecodedMessage, DecodeError> {
        let type_name = payload.type_name();
        let decoder = self
            .decoders
            .get(type_name)
            .ok_or_else(|| DecodeError::UnknownType {
                type_url: payload.type_url.clone(),
            })?;
        Ok(DecodedMessage {
            type_name: type_name.to_string(),
            fields: decoder(&payload.value)?,
        })
    }
}

fn decode_message(
    schemas: &HashMap<String, MessageSchema>,
    type_name: &str,
    value: &Value,
    path: &str,
) -> Result<Value, DecodeError> {
    let schema = schemas
        .get(type_name)
        .ok_or_else(|| DecodeError::UnknownType {
            type_url: type_name.to_string(),
        })?;
    let obj = match value {
        Value::Object(obj) => obj,
        other => return Err(mismatch(path_or(path, type_name), type_name, other)),
    };

    let mut out = Map::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let field_path = join(path, &field.name);
        let raw = obj.get(&field.name).filter(|v| !v.is_null());
        let decoded = match (raw, field.repeated) {
            (None, true) => Value::Array(vec![]),
            (None, false) => zero_value(&field.kind),
            (Some(Value::Array(items)), true) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        decode_field(schemas, &field.kind, item, &format!("{field_path}[{i}]"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            (Some(other), true) => return Err(mismatch(field_path, "list", other)),
            (Some(v), false) => decode_field(schemas, &field.kind, v, &field_path)?,
        };
        out.insert(field.name.clone(), decoded);
    }
    Ok(Value::Object(out))
}

fn decode_field(
    schemas: &HashMap<String, MessageSchema>,
    kind: &str,
    value: &Value,
    path: &str,
) -> Result<Value, DecodeError> {
    match kind {
        "string" | "bytes" => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(mismatch(path.to_string(), kind, other)),
        },
        "bool" => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(mismatch(path.to_string(), kind, other)),
        },
        "uint64" => match value {
            Value::Number(n) if n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| mismatch(path.to_string(), kind, value)),
            other => Err(mismatch(path.to_string(), kind, other)),
        },
        "int64" => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch(path.to_string(), kind, value)),
            other => Err(mismatch(path.to_string(), kind, other)),
        },
        "double" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(|| mismatch(path.to_string(), kind, value)),
            other => Err(mismatch(path.to_string(), kind, other)),
        },
        message => decode_message(schemas, message, value, path),
    }
}

fn zero_value(kind: &str) -> Value {
    match kind {
        "string" | "bytes" => Value::String(String::new()),
        "bool" => Value::Bool(false),
        "uint64" | "int64" => Value::from(0u64),
        "double" => Value::from(0.0),
        _ => Value::Null,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn mismatch(field: String, expected: &str, got: &Value) -> DecodeError {
    DecodeError::TypeMismatch {
        field,
        expected: expected.to_string(),
        got: json_kind(got).to_string(),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn path_or(path: &str, fallback: &str) -> String {
    if path.is_empty() {
        fallback.to_string()
    } else {
        path.to_string()
    }
}
