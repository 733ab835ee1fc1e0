//! Parameter schema normalization and argument binding helpers.
//!
//! Remote servers describe their parameters with loosely-typed JSON schema
//! fragments. [`normalize_schema`] reduces one such fragment to a map of
//! [`ParameterDescriptor`]s and never fails: anything it cannot recognize
//! degrades to a default.

use std::collections::{BTreeMap, HashSet};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Type tag used when a property declares no usable `type`.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Parameters of one tool keyed by name.
pub type ParameterMap = BTreeMap<String, ParameterDescriptor>;

/// Declared default of a parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// Default of a string-typed parameter, unquoted.
    Text(String),
    /// Default of any other parameter, kept as its serialized JSON literal.
    Literal(String),
}

impl DefaultValue {
    fn from_schema(type_tag: &str, raw: &Value) -> Option<Self> {
        match raw {
            Value::String(text) if type_tag == "string" => Some(Self::Text(text.clone())),
            Value::Null if type_tag == "string" => None,
            other => Some(Self::Literal(other.to_string())),
        }
    }

    /// The value to place into an arguments object.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Literal(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
        }
    }
}

impl Serialize for DefaultValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Normalized description of one tool parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDescriptor {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub description: String,
    #[serde(rename = "default")]
    pub default_value: Option<DefaultValue>,
    #[serde(rename = "isRequired")]
    pub required: bool,
}

impl ParameterDescriptor {
    /// Whether an absent value can be filled from the declared default.
    pub fn has_usable_default(&self) -> bool {
        !self.required && self.default_value.is_some()
    }
}

/// Reduces a raw parameter schema to descriptors keyed by parameter name.
///
/// A schema that is not an object, or has no `properties` object, yields an
/// empty map. `required` entries that are not strings, or that name no
/// property, have no effect.
pub fn normalize_schema(schema: &Value) -> ParameterMap {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return ParameterMap::new();
    };

    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| {
            let descriptor = describe_property(name, property, required.contains(name.as_str()));
            (name.clone(), descriptor)
        })
        .collect()
}

fn describe_property(name: &str, property: &Value, required: bool) -> ParameterDescriptor {
    let type_tag = type_tag(property.get("type"));
    let description = property
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let default_value = property
        .get("default")
        .and_then(|raw| DefaultValue::from_schema(&type_tag, raw));

    ParameterDescriptor {
        name: name.to_string(),
        type_tag,
        description,
        default_value,
        required,
    }
}

// `["integer", "null"]` style unions collapse to their first concrete member.
fn type_tag(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::String(tag)) => tag.clone(),
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(Value::as_str)
            .find(|tag| *tag != "null")
            .unwrap_or(UNKNOWN_TYPE)
            .to_string(),
        _ => UNKNOWN_TYPE.to_string(),
    }
}

/// Required parameters that are absent (or null) in `arguments`, in name order.
pub fn missing_required<'a>(
    parameters: &'a ParameterMap,
    arguments: &Map<String, Value>,
) -> Vec<&'a str> {
    parameters
        .values()
        .filter(|p| p.required)
        .filter(|p| arguments.get(&p.name).is_none_or(Value::is_null))
        .map(|p| p.name.as_str())
        .collect()
}

/// Fills absent optional parameters from their defaults.
///
/// Returns the names that were filled.
pub fn apply_defaults(parameters: &ParameterMap, arguments: &mut Map<String, Value>) -> Vec<String> {
    let mut filled = Vec::new();
    for parameter in parameters.values().filter(|p| p.has_usable_default()) {
        if arguments.contains_key(&parameter.name) {
            continue;
        }
        if let Some(default) = &parameter.default_value {
            arguments.insert(parameter.name.clone(), default.to_json());
            filled.push(parameter.name.clone());
        }
    }
    filled
}
