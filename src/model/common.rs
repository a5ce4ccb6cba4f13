use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Data types understood by the field registry.
///
/// Anything the schema declares that is not one of the known types is kept
/// verbatim in `Other` so the registry can warn about it and fall back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    File,
    Other(String),
}

impl DataType {
    /// All known data types, in the order the registry scans them.
    pub const KNOWN: [DataType; 7] = [
        DataType::String,
        DataType::Number,
        DataType::Integer,
        DataType::Boolean,
        DataType::Array,
        DataType::Object,
        DataType::File,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::File => "file",
            DataType::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Other(_))
    }

    /// Types for which an un-formatted enumeration means "choices".
    pub fn supports_enum(&self) -> bool {
        matches!(self, DataType::String | DataType::Integer | DataType::Number)
    }

    /// Parse a bare type name, returning `None` for unknown names.
    pub fn parse_known(name: &str) -> Option<DataType> {
        match DataType::from(name.to_string()) {
            DataType::Other(_) => None,
            known => Some(known),
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "string" => DataType::String,
            "number" => DataType::Number,
            "integer" => DataType::Integer,
            "boolean" => DataType::Boolean,
            "array" => DataType::Array,
            "object" => DataType::Object,
            "file" => DataType::File,
            _ => DataType::Other(value),
        }
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar used to group relation lookups into one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchKey {
    Int(i64),
    Str(String),
}

impl BatchKey {
    /// Extract a key from a raw value. Only strings and numbers qualify.
    pub fn from_value(value: &Value) -> Option<BatchKey> {
        match value {
            Value::String(s) => Some(BatchKey::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(BatchKey::Int(i)),
                None => Some(BatchKey::Str(n.to_string())),
            },
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            BatchKey::Int(i) => Value::from(*i),
            BatchKey::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::Int(i) => write!(f, "{}", i),
            BatchKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for BatchKey {
    fn from(value: i64) -> Self {
        BatchKey::Int(value)
    }
}

impl From<&str> for BatchKey {
    fn from(value: &str) -> Self {
        BatchKey::Str(value.to_string())
    }
}

/// Turn a dependence value into the scalar form used in filters.
/// Arrays are joined with commas, empty values yield `None`.
pub fn dependence_value_as_filter(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            if joined.is_empty() {
                None
            } else {
                Some(Value::String(joined))
            }
        }
        Value::String(s) if s.is_empty() => None,
        Value::String(_) => Some(value.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Number(_) => Some(value.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_type_round_trip_through_strings() {
        let known: DataType = serde_json::from_value(json!("integer")).unwrap();
        assert_eq!(known, DataType::Integer);

        let unknown: DataType = serde_json::from_value(json!("unregistered-type")).unwrap();
        assert_eq!(unknown, DataType::Other("unregistered-type".to_string()));
        assert!(!unknown.is_known());
        assert_eq!(serde_json::to_value(&unknown).unwrap(), json!("unregistered-type"));
    }

    #[test]
    fn test_batch_key_extraction() {
        assert_eq!(BatchKey::from_value(&json!(3)), Some(BatchKey::Int(3)));
        assert_eq!(BatchKey::from_value(&json!("a")), Some(BatchKey::Str("a".into())));
        assert_eq!(BatchKey::from_value(&json!(null)), None);
        assert_eq!(BatchKey::from_value(&json!({"id": 1})), None);
        // "1" and 1 are distinct keys
        assert_ne!(BatchKey::from_value(&json!("1")), BatchKey::from_value(&json!(1)));
    }

    #[test]
    fn test_dependence_value_as_filter() {
        assert_eq!(dependence_value_as_filter(&json!([1, 2])), Some(json!("1,2")));
        assert_eq!(dependence_value_as_filter(&json!("")), None);
        assert_eq!(dependence_value_as_filter(&json!(0)), None);
        assert_eq!(dependence_value_as_filter(&json!(5)), Some(json!(5)));
        assert_eq!(dependence_value_as_filter(&json!(null)), None);
    }
}
