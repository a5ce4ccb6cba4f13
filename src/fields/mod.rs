pub mod array;
pub mod base;
pub mod dynamic;
pub mod init;
pub mod registry;
pub mod related_list;
pub mod relation;

pub use array::*;
pub use base::*;
pub use dynamic::*;
pub use init::*;
pub use registry::*;
pub use related_list::*;
pub use relation::*;

use crate::error::{FetchError, FieldError, ValidationError, ValidationKind};
use crate::model::{DataType, FieldData, Instance, RepresentValue, SchemaFragment};
use crate::store::QuerySource;
use futures::future::BoxFuture;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Capability contract shared by every field behaviour.
///
/// A field is built from exactly one schema fragment; its type and format
/// never change afterwards. Conversions read from any [`FieldData`] bag so the
/// same field works on inner data, represented data and per-item overlays.
pub trait Field: Send + Sync {
    fn common(&self) -> &FieldCommon;

    /// Name of the concrete behaviour, e.g. `"FKField"`.
    fn class_name(&self) -> &'static str;

    fn name(&self) -> &str {
        &self.common().name
    }

    fn title(&self) -> &str {
        &self.common().title
    }

    fn data_type(&self) -> Option<&DataType> {
        self.common().data_type.as_ref()
    }

    fn format(&self) -> Option<&str> {
        self.common().format.as_deref()
    }

    fn fragment(&self) -> &SchemaFragment {
        &self.common().fragment
    }

    /// Represented value to wire form.
    fn to_inner(&self, data: &dyn FieldData) -> Option<Value> {
        data.lookup(self.name()).map(|value| value.to_json())
    }

    /// Wire value to represented form.
    fn to_represent(&self, data: &dyn FieldData) -> Option<RepresentValue> {
        data.lookup(self.name())
    }

    fn validate_value(&self, data: &dyn FieldData) -> Result<Option<RepresentValue>, ValidationError> {
        self.common().validate_constraints(data.lookup(self.name()))
    }

    fn validate_inner(&self, data: &dyn FieldData) -> Result<Option<Value>, ValidationError> {
        Ok(data.lookup(self.name()).map(|value| value.to_json()))
    }

    /// Late binding against the view path the field is used from.
    fn prepare_field_for_view(&self, _path: &str) {}

    fn capability(&self) -> FetchCapability<'_> {
        FetchCapability::None
    }

    /// Called by a query source once `instances` were loaded from it.
    fn after_instances_fetched<'a>(
        &'a self,
        _instances: &'a [Arc<Instance>],
        _source: &'a dyn QuerySource,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async { Ok(()) })
    }

    /// Structural equality: same behaviour built from an equal fragment.
    fn is_equal(&self, other: &dyn Field) -> bool {
        self.class_name() == other.class_name() && self.fragment() == other.fragment()
    }

    /// Hash consistent with [`Field::is_equal`].
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.class_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.fragment().to_value().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn is_same_values(&self, a: &dyn FieldData, b: &dyn FieldData) -> bool {
        self.to_inner(a) == self.to_inner(b)
    }
}

impl fmt::Debug for dyn Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.class_name())
            .field("name", &self.name())
            .field("type", &self.data_type())
            .field("format", &self.format())
            .finish()
    }
}

/// What the relation fetch orchestrator can do with a field.
pub enum FetchCapability<'a> {
    Relation(&'a dyn FetchableField),
    Array(&'a ArrayField),
    Dynamic(&'a DynamicField),
    RelatedList(&'a RelatedListField),
    None,
}

/// A field whose wire value is the key of a record in another collection.
pub trait FetchableField: Field {
    fn as_field(&self) -> &dyn Field;
    fn use_prefetch(&self) -> bool;
    fn fetch_data(&self) -> bool;
    /// Query parameter used to filter the related collection.
    fn filter_name(&self) -> &str;
    /// Field of the related record matched against the requested key.
    fn filter_field_name(&self) -> &str;
    fn value_field(&self) -> &str;
    fn view_field(&self) -> &str;
    fn value_fetch_source(&self, path: Option<&str>) -> Option<Arc<dyn QuerySource>>;
}

/// Attributes every field reads from its fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCommon {
    pub name: String,
    pub title: String,
    pub data_type: Option<DataType>,
    pub format: Option<String>,
    pub required: bool,
    pub nullable: bool,
    pub read_only: bool,
    pub default: Option<Value>,
    pub fragment: SchemaFragment,
}

impl FieldCommon {
    pub fn new(fragment: SchemaFragment) -> Result<Self, FieldError> {
        let name = fragment
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FieldError::MissingName(fragment.title.clone().unwrap_or_default()))?;
        let title = fragment.title.clone().unwrap_or_else(|| name_to_title(&name));
        Ok(Self {
            title,
            data_type: fragment.data_type.clone(),
            format: fragment.format.clone(),
            required: fragment.required.unwrap_or(false),
            nullable: fragment.nullable.unwrap_or(false),
            read_only: fragment.read_only.unwrap_or(false),
            default: fragment.default.clone(),
            name,
            fragment,
        })
    }

    /// Apply the constraints declared on the fragment to a represented value.
    pub fn validate_constraints(
        &self,
        value: Option<RepresentValue>,
    ) -> Result<Option<RepresentValue>, ValidationError> {
        let mut value = value;
        if self.data_type == Some(DataType::String) && self.required && value.is_none() {
            value = Some(RepresentValue::Value(Value::String(String::new())));
        }

        match value.as_ref().and_then(RepresentValue::as_value) {
            Some(Value::String(text)) => {
                let length = text.chars().count();
                if let Some(max) = self.fragment.max_length.filter(|max| *max > 0) {
                    if length > max {
                        return Err(ValidationError::new(
                            ValidationKind::MaxLength,
                            format!("Length of '{}' must be at most {}", self.title, max),
                        ));
                    }
                }
                if let Some(min) = self.fragment.min_length.filter(|min| *min > 0) {
                    if length == 0 {
                        if !self.required {
                            return Ok(None);
                        }
                        return Err(self.empty_error());
                    }
                    if length < min {
                        return Err(ValidationError::new(
                            ValidationKind::MinLength,
                            format!("Length of '{}' must be at least {}", self.title, min),
                        ));
                    }
                }
            }
            Some(Value::Number(number)) => {
                let number = number.as_f64().unwrap_or_default();
                if let Some(max) = self.fragment.maximum.filter(|max| *max != 0.0) {
                    if number > max {
                        return Err(ValidationError::new(
                            ValidationKind::Maximum,
                            format!("'{}' must be at most {}", self.title, max),
                        ));
                    }
                }
                if let Some(min) = self.fragment.minimum.filter(|min| *min != 0.0) {
                    if number < min {
                        return Err(ValidationError::new(
                            ValidationKind::Minimum,
                            format!("'{}' must be at least {}", self.title, min),
                        ));
                    }
                }
            }
            _ => {}
        }

        let missing = value.is_none() && self.required && self.default.is_none();
        let null = matches!(&value, Some(RepresentValue::Value(Value::Null))) && !self.nullable;
        if missing || null {
            return Err(self.empty_error());
        }
        Ok(value)
    }

    pub fn empty_error(&self) -> ValidationError {
        ValidationError::new(ValidationKind::Empty, format!("Field '{}' is empty", self.title))
    }
}

/// `"created_at"` becomes `"Created at"`.
pub fn name_to_title(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn common(fragment: serde_json::Value) -> FieldCommon {
        FieldCommon::new(SchemaFragment::from_value(fragment).unwrap()).unwrap()
    }

    fn value(v: serde_json::Value) -> Option<RepresentValue> {
        Some(RepresentValue::Value(v))
    }

    #[test]
    fn test_common_requires_name() {
        let err = FieldCommon::new(SchemaFragment::of_type(DataType::String)).unwrap_err();
        assert!(matches!(err, FieldError::MissingName(_)));
    }

    #[test]
    fn test_title_from_name() {
        assert_eq!(common(json!({"name": "created_at"})).title, "Created at");
        assert_eq!(common(json!({"name": "x", "title": "Custom"})).title, "Custom");
    }

    #[test]
    fn test_string_length_constraints() {
        let field = common(json!({"name": "code", "type": "string", "maxLength": 3, "minLength": 2}));
        assert_eq!(
            field.validate_constraints(value(json!("abcd"))).unwrap_err().kind,
            ValidationKind::MaxLength
        );
        assert_eq!(
            field.validate_constraints(value(json!("a"))).unwrap_err().kind,
            ValidationKind::MinLength
        );
        // empty and optional is accepted as "no value"
        assert_eq!(field.validate_constraints(value(json!(""))).unwrap(), None);
        assert!(field.validate_constraints(value(json!("ab"))).is_ok());
    }

    #[test]
    fn test_required_string_empty() {
        let field = common(json!({"name": "code", "type": "string", "minLength": 1, "required": true}));
        assert_eq!(
            field.validate_constraints(None).unwrap_err().kind,
            ValidationKind::Empty
        );
    }

    #[test]
    fn test_number_bounds_and_null() {
        let field = common(json!({"name": "qty", "type": "integer", "maximum": 10, "minimum": 2}));
        assert_eq!(
            field.validate_constraints(value(json!(11))).unwrap_err().kind,
            ValidationKind::Maximum
        );
        assert_eq!(
            field.validate_constraints(value(json!(1))).unwrap_err().kind,
            ValidationKind::Minimum
        );
        assert_eq!(
            field.validate_constraints(value(json!(null))).unwrap_err().kind,
            ValidationKind::Empty
        );

        let nullable = common(json!({"name": "qty", "type": "integer", "x-nullable": true}));
        assert!(nullable.validate_constraints(value(json!(null))).is_ok());
        assert_eq!(nullable.validate_constraints(None).unwrap(), None);
    }
}
