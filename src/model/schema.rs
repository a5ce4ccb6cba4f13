use crate::error::FieldError;
use crate::model::DataType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Loaded API description. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    root: Value,
}

impl Schema {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, FieldError> {
        let root = serde_json::from_str(raw)
            .map_err(|e| FieldError::InvalidSchema(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolve a `#/segment/segment` pointer against the root.
    pub fn resolve_pointer(&self, pointer: &str) -> Result<&Value, FieldError> {
        let path = pointer
            .strip_prefix('#')
            .ok_or_else(|| FieldError::InvalidReference(pointer.to_string()))?;
        self.root
            .pointer(path)
            .ok_or_else(|| FieldError::InvalidReference(pointer.to_string()))
    }

    /// Named schema objects, from `definitions` (Swagger 2) or
    /// `components/schemas` (OpenAPI 3).
    pub fn definitions(&self) -> Vec<(String, &Value)> {
        let section = self
            .root
            .get("definitions")
            .or_else(|| self.root.pointer("/components/schemas"));
        match section.and_then(Value::as_object) {
            Some(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            None => Vec::new(),
        }
    }
}

/// Description of one field as found in the API description.
///
/// Known keys are typed; everything else survives in `extra` so that
/// structural equality covers the whole fragment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaFragment {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "x-format", default, skip_serializing_if = "Option::is_none")]
    pub x_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaFragment>>,
    #[serde(
        default,
        deserialize_with = "bool_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub required: Option<bool>,
    #[serde(rename = "readOnly", default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(rename = "x-nullable", default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "x-options", default, skip_serializing_if = "Option::is_none")]
    pub x_options: Option<Map<String, Value>>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Object schemas carry `required` as a list of property names; only the
// per-field boolean form is meaningful on a fragment.
fn bool_or_none<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool())
}

impl SchemaFragment {
    pub fn of_type(data_type: DataType) -> Self {
        Self {
            data_type: Some(data_type),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_x_options(mut self, options: Value) -> Self {
        if let Value::Object(map) = options {
            self.x_options = Some(map);
        }
        self
    }

    pub fn from_value(value: Value) -> Result<Self, FieldError> {
        serde_json::from_value(value).map_err(|e| FieldError::InvalidSchema(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Copy every key of `target` over this fragment, the way a `$ref`
    /// target is merged into the referencing fragment.
    pub fn merge_from(&mut self, target: &Value) -> Result<(), FieldError> {
        let mut merged = match self.to_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(target) = target {
            for (key, value) in target {
                merged.insert(key.clone(), value.clone());
            }
        }
        *self = Self::from_value(Value::Object(merged))?;
        Ok(())
    }

    /// Extension options deserialized into a typed struct.
    pub fn options<T>(&self) -> Result<T, FieldError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match &self.x_options {
            Some(map) => serde_json::from_value(Value::Object(map.clone())).map_err(|e| {
                FieldError::InvalidOptions {
                    field: self.name.clone().unwrap_or_default(),
                    message: e.to_string(),
                }
            }),
            None => Ok(T::default()),
        }
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn extra_usize(&self, key: &str) -> Option<usize> {
        self.extra.get(key).and_then(Value::as_u64).map(|v| v as usize)
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }
}

/// Anything the registry can turn into a field.
#[derive(Clone)]
pub enum FieldDefinition {
    Field(Arc<dyn crate::fields::Field>),
    Shorthand(String),
    Fragment(SchemaFragment),
}

impl FieldDefinition {
    /// Interpret a raw JSON value: strings are shorthands, objects fragments.
    pub fn from_value(value: &Value) -> Result<Self, FieldError> {
        match value {
            Value::String(s) => Ok(FieldDefinition::Shorthand(s.clone())),
            Value::Object(_) => Ok(FieldDefinition::Fragment(SchemaFragment::from_value(
                value.clone(),
            )?)),
            Value::Null => Err(FieldError::MissingDefinition),
            other => Err(FieldError::InvalidSchema(format!(
                "unsupported field definition: {}",
                other
            ))),
        }
    }
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefinition::Field(field) => write!(f, "Field({})", field.name()),
            FieldDefinition::Shorthand(s) => write!(f, "Shorthand({})", s),
            FieldDefinition::Fragment(fragment) => write!(f, "Fragment({:?})", fragment),
        }
    }
}

impl From<SchemaFragment> for FieldDefinition {
    fn from(value: SchemaFragment) -> Self {
        FieldDefinition::Fragment(value)
    }
}

impl From<&str> for FieldDefinition {
    fn from(value: &str) -> Self {
        FieldDefinition::Shorthand(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_pointer() {
        let schema = Schema::new(json!({
            "definitions": {"Category": {"type": "object", "properties": {}}}
        }));
        let target = schema.resolve_pointer("#/definitions/Category").unwrap();
        assert_eq!(target["type"], json!("object"));
        assert!(matches!(
            schema.resolve_pointer("#/definitions/Missing"),
            Err(FieldError::InvalidReference(_))
        ));
        assert!(schema.resolve_pointer("definitions/Category").is_err());
    }

    #[test]
    fn test_fragment_keeps_unknown_keys() {
        let fragment = SchemaFragment::from_value(json!({
            "type": "array",
            "items": {"type": "integer"},
            "collectionFormat": "csv",
            "x-nullable": true
        }))
        .unwrap();
        assert_eq!(fragment.data_type, Some(DataType::Array));
        assert_eq!(fragment.nullable, Some(true));
        assert_eq!(fragment.extra_str("collectionFormat"), Some("csv"));
        assert_eq!(
            fragment.items.as_ref().and_then(|i| i.data_type.clone()),
            Some(DataType::Integer)
        );
    }

    #[test]
    fn test_merge_from_overrides_fragment_keys() {
        let mut fragment = SchemaFragment::from_value(json!({
            "$ref": "#/definitions/Status",
            "title": "Local title"
        }))
        .unwrap();
        fragment
            .merge_from(&json!({"type": "string", "enum": ["a", "b"], "title": "Status"}))
            .unwrap();
        assert_eq!(fragment.data_type, Some(DataType::String));
        assert_eq!(fragment.title.as_deref(), Some("Status"));
        assert_eq!(fragment.enumeration.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_definitions_from_openapi3_components() {
        let schema = Schema::new(json!({
            "components": {"schemas": {"User": {"type": "object"}}}
        }));
        let defs = schema.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].0, "User");
    }
}
