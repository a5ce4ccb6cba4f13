use crate::error::FieldError;
use crate::fields::{Field, FieldsResolver};
use crate::model::{FieldDefinition, Schema};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Ordered field name to field mapping of one model.
#[derive(Clone, Default)]
pub struct FieldSet {
    fields: Vec<Arc<dyn Field>>,
}

impl FieldSet {
    pub fn new(fields: Vec<Arc<dyn Field>>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Field>> {
        self.fields.iter().find(|field| field.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Field>> {
        self.fields.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this set with the field of the same name replaced, or
    /// appended when absent.
    pub fn with_field(&self, field: Arc<dyn Field>) -> FieldSet {
        let mut fields = self.fields.clone();
        match fields.iter().position(|f| f.name() == field.name()) {
            Some(index) => fields[index] = field,
            None => fields.push(field),
        }
        FieldSet { fields }
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// A named model: the field layout shared by all of its records.
#[derive(Debug, Clone)]
pub struct ModelClass {
    name: String,
    fields: FieldSet,
}

impl ModelClass {
    pub fn new(name: &str, fields: FieldSet) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    pub fn empty(name: &str) -> Self {
        Self::new(name, FieldSet::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Derived class with one field swapped, used for per-item records.
    pub fn with_field(&self, field: Arc<dyn Field>) -> ModelClass {
        Self {
            name: self.name.clone(),
            fields: self.fields.with_field(field),
        }
    }
}

/// All models built from the API description, by name.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelClass>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one model per named schema object that declares properties.
    pub fn from_schema(schema: &Schema, resolver: &Arc<FieldsResolver>) -> Result<Self, FieldError> {
        let mut registry = Self::new();
        for (name, definition) in schema.definitions() {
            if definition.get("properties").is_none() {
                continue;
            }
            let class = Self::build_model(&name, definition, resolver)?;
            registry.insert(class);
        }
        Ok(registry)
    }

    pub fn build_model(
        name: &str,
        definition: &Value,
        resolver: &Arc<FieldsResolver>,
    ) -> Result<ModelClass, FieldError> {
        let required: HashSet<&str> = definition
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = Vec::new();
        if let Some(properties) = definition.get("properties").and_then(Value::as_object) {
            for (field_name, raw) in properties {
                let mut field_definition = FieldDefinition::from_value(raw)?;
                if let FieldDefinition::Fragment(fragment) = &mut field_definition {
                    if required.contains(field_name.as_str()) {
                        fragment.required = Some(true);
                    }
                }
                fields.push(resolver.resolve_field(field_definition, Some(field_name))?);
            }
        }
        Ok(ModelClass::new(name, FieldSet::new(fields)))
    }

    pub fn insert(&mut self, class: ModelClass) -> Arc<ModelClass> {
        let class = Arc::new(class);
        self.models.insert(class.name().to_string(), Arc::clone(&class));
        class
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelClass>> {
        self.models.get(name)
    }

    /// Find a model by a schema reference: a model name, a `#/...` pointer,
    /// or an object carrying `$ref`.
    pub fn by_reference(&self, reference: &Value) -> Option<&Arc<ModelClass>> {
        let pointer = match reference {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("$ref").and_then(Value::as_str)?,
            _ => return None,
        };
        let name = pointer.rsplit('/').next().unwrap_or(pointer);
        self.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
