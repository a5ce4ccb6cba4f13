use crate::error::{FieldError, ValidationError, ValidationKind};
use crate::fields::{Field, FieldCommon};
use crate::model::{DataType, FieldData, RepresentValue, SchemaFragment};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleKind {
    Base,
    String,
    Number,
    Integer,
    Boolean,
    Object,
    File,
    Choices,
}

impl SimpleKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            SimpleKind::Base => "BaseField",
            SimpleKind::String => "StringField",
            SimpleKind::Number => "NumberField",
            SimpleKind::Integer => "IntegerField",
            SimpleKind::Boolean => "BooleanField",
            SimpleKind::Object => "NestedObjectField",
            SimpleKind::File => "FileField",
            SimpleKind::Choices => "ChoicesField",
        }
    }
}

/// Field without relation behaviour: conversion is identity apart from
/// light coercion of scalar wire values.
#[derive(Debug, Clone)]
pub struct SimpleField {
    common: FieldCommon,
    kind: SimpleKind,
}

impl SimpleField {
    pub fn new(fragment: SchemaFragment, kind: SimpleKind) -> Result<Self, FieldError> {
        Ok(Self {
            common: FieldCommon::new(fragment)?,
            kind,
        })
    }

    pub fn base(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Base)?))
    }

    pub fn string(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::String)?))
    }

    pub fn number(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Number)?))
    }

    pub fn integer(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Integer)?))
    }

    pub fn boolean(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Boolean)?))
    }

    pub fn object(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Object)?))
    }

    pub fn file(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::File)?))
    }

    pub fn choices(fragment: SchemaFragment) -> Result<Arc<dyn Field>, FieldError> {
        Ok(Arc::new(Self::new(fragment, SimpleKind::Choices)?))
    }

    /// Plain string field that cannot fail to build.
    pub fn fallback(name: &str) -> Arc<dyn Field> {
        let fragment = SchemaFragment::of_type(DataType::String).with_name(name);
        Arc::new(Self {
            common: FieldCommon {
                name: name.to_string(),
                title: super::name_to_title(name),
                data_type: Some(DataType::String),
                format: None,
                required: false,
                nullable: false,
                read_only: false,
                default: None,
                fragment,
            },
            kind: SimpleKind::String,
        })
    }

    pub fn kind(&self) -> SimpleKind {
        self.kind
    }

    fn coerce(&self, value: Value) -> Value {
        match (self.kind, value) {
            (SimpleKind::Boolean, Value::String(text)) => match text.as_str() {
                "true" | "True" => Value::Bool(true),
                "false" | "False" => Value::Bool(false),
                _ => Value::String(text),
            },
            (SimpleKind::Integer, Value::String(text)) => match text.trim().parse::<i64>() {
                Ok(number) => Value::from(number),
                Err(_) => Value::String(text),
            },
            (_, value) => value,
        }
    }
}

impl Field for SimpleField {
    fn common(&self) -> &FieldCommon {
        &self.common
    }

    fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    fn to_represent(&self, data: &dyn FieldData) -> Option<RepresentValue> {
        match data.lookup(self.name())? {
            RepresentValue::Value(value) => Some(RepresentValue::Value(self.coerce(value))),
            other => Some(other),
        }
    }

    fn validate_value(&self, data: &dyn FieldData) -> Result<Option<RepresentValue>, ValidationError> {
        let value = self.common.validate_constraints(data.lookup(self.name()))?;
        if self.kind != SimpleKind::Choices {
            return Ok(value);
        }
        let allowed = self.common.fragment.enumeration.as_deref().unwrap_or_default();
        match value.as_ref().and_then(RepresentValue::as_value) {
            Some(Value::Null) | None => Ok(value),
            Some(choice) if allowed.contains(choice) => Ok(value),
            Some(choice) => Err(ValidationError::new(
                ValidationKind::NotAllowed,
                format!("{} is not an allowed value of '{}'", choice, self.common.title),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InnerData;
    use serde_json::json;

    fn fragment(value: Value) -> SchemaFragment {
        SchemaFragment::from_value(value).unwrap()
    }

    fn data(value: Value) -> InnerData {
        match value {
            Value::Object(map) => map,
            _ => InnerData::new(),
        }
    }

    #[test]
    fn test_boolean_coercion() {
        let field = SimpleField::boolean(fragment(json!({"name": "active", "type": "boolean"}))).unwrap();
        let represented = field.to_represent(&data(json!({"active": "true"})));
        assert_eq!(represented, Some(RepresentValue::Value(json!(true))));
        assert_eq!(field.class_name(), "BooleanField");
    }

    #[test]
    fn test_choices_membership() {
        let field = SimpleField::choices(fragment(json!({
            "name": "status", "type": "string", "format": "choices", "enum": ["new", "done"]
        })))
        .unwrap();
        assert!(field.validate_value(&data(json!({"status": "new"}))).is_ok());
        let err = field.validate_value(&data(json!({"status": "lost"}))).unwrap_err();
        assert_eq!(err.kind, ValidationKind::NotAllowed);
    }

    #[test]
    fn test_fallback_is_plain_string() {
        let field = SimpleField::fallback("anything");
        assert_eq!(field.class_name(), "StringField");
        assert_eq!(field.data_type(), Some(&DataType::String));
        assert_eq!(field.title(), "Anything");
    }
}
