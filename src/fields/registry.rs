use crate::error::FieldError;
use crate::fields::{
    ArrayField, DeferredBind, DynamicField, Field, InitQueue, RelatedListField, RelationField,
    SimpleField,
};
use crate::model::{DataType, FieldDefinition, Schema, SchemaFragment};
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

/// Second-level key of the registry: a named format or the per-type default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatKey {
    Default,
    Named(String),
}

impl FormatKey {
    pub fn named(format: &str) -> Self {
        FormatKey::Named(format.to_string())
    }
}

/// Builds a field from a normalized fragment.
pub type FieldConstructor = fn(SchemaFragment, &FieldBuilder<'_>) -> Result<Arc<dyn Field>, FieldError>;

/// What a constructor may reach while building: the resolver itself (for
/// nested fields) and the deferred bind queue.
pub struct FieldBuilder<'a> {
    resolver: &'a Arc<FieldsResolver>,
}

impl<'a> FieldBuilder<'a> {
    pub fn resolver(&self) -> &Arc<FieldsResolver> {
        self.resolver
    }

    pub fn defer(&self, job: DeferredBind) -> Result<(), FieldError> {
        self.resolver.init_queue().defer(job)
    }
}

/// Two-level lookup table from (data type, format) to field constructor.
pub struct FieldsResolver {
    schema: Arc<Schema>,
    types: HashMap<DataType, HashMap<FormatKey, FieldConstructor>>,
    init: Arc<InitQueue>,
}

impl FieldsResolver {
    /// Empty tables for every known data type.
    pub fn new(schema: Arc<Schema>) -> Self {
        let types = DataType::KNOWN
            .iter()
            .map(|data_type| (data_type.clone(), HashMap::new()))
            .collect();
        Self {
            schema,
            types,
            init: Arc::new(InitQueue::new()),
        }
    }

    /// Resolver with the built-in field classes registered.
    pub fn with_default_fields(schema: Arc<Schema>) -> Self {
        let mut resolver = Self::new(schema);
        resolver.register_default_fields();
        resolver
    }

    fn register_default_fields(&mut self) {
        let defaults: [(DataType, FieldConstructor); 7] = [
            (DataType::String, |f, _| SimpleField::string(f)),
            (DataType::Number, |f, _| SimpleField::number(f)),
            (DataType::Integer, |f, _| SimpleField::integer(f)),
            (DataType::Boolean, |f, _| SimpleField::boolean(f)),
            (DataType::Array, ArrayField::construct),
            (DataType::Object, |f, _| SimpleField::object(f)),
            (DataType::File, |f, _| SimpleField::file(f)),
        ];
        for (data_type, constructor) in defaults {
            self.types
                .entry(data_type)
                .or_default()
                .insert(FormatKey::Default, constructor);
        }

        let named: [(DataType, &str, FieldConstructor); 7] = [
            (DataType::String, "choices", |f, _| SimpleField::choices(f)),
            (DataType::Integer, "choices", |f, _| SimpleField::choices(f)),
            (DataType::Number, "choices", |f, _| SimpleField::choices(f)),
            (DataType::String, "fk", RelationField::construct),
            (DataType::Integer, "fk", RelationField::construct),
            (DataType::Array, "list", RelatedListField::construct),
            (DataType::Array, "table", RelatedListField::construct),
        ];
        for (data_type, format, constructor) in named {
            self.types
                .entry(data_type)
                .or_default()
                .insert(FormatKey::named(format), constructor);
        }

        for data_type in DataType::KNOWN {
            self.types
                .entry(data_type)
                .or_default()
                .insert(FormatKey::named("dynamic"), DynamicField::construct);
        }
    }

    pub fn register_field(
        &mut self,
        data_type: DataType,
        format: FormatKey,
        constructor: FieldConstructor,
    ) -> Result<(), FieldError> {
        let formats = self
            .types
            .get_mut(&data_type)
            .ok_or_else(|| FieldError::UnknownDataType(data_type.to_string()))?;
        formats.insert(format, constructor);
        Ok(())
    }

    pub fn register_default_for_type(
        &mut self,
        data_type: DataType,
        constructor: FieldConstructor,
    ) -> Result<(), FieldError> {
        self.register_field(data_type, FormatKey::Default, constructor)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn init_queue(&self) -> &Arc<InitQueue> {
        &self.init
    }

    /// Named formats registered for `data_type`, sorted.
    pub fn registered_formats(&self, data_type: &DataType) -> Vec<String> {
        let mut formats: Vec<String> = self
            .types
            .get(data_type)
            .map(|formats| {
                formats
                    .keys()
                    .filter_map(|key| match key {
                        FormatKey::Named(name) => Some(name.clone()),
                        FormatKey::Default => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        formats.sort();
        formats
    }

    fn has_format(&self, data_type: &DataType, format: &str) -> bool {
        self.types
            .get(data_type)
            .map(|formats| formats.contains_key(&FormatKey::named(format)))
            .unwrap_or(false)
    }

    /// Interpret a bare string: a type name, or a format registered under
    /// some type. Anything else becomes a string field.
    pub fn fragment_from_shorthand(&self, shorthand: &str) -> SchemaFragment {
        if let Some(data_type) = DataType::parse_known(shorthand) {
            return SchemaFragment::of_type(data_type);
        }
        for data_type in DataType::KNOWN {
            if self.has_format(&data_type, shorthand) {
                return SchemaFragment::of_type(data_type).with_format(shorthand);
            }
        }
        warn!(
            "Can not detect field from string {}, string field will be used",
            shorthand
        );
        SchemaFragment::of_type(DataType::String)
    }

    fn guess_type_by_format(&self, fragment: &mut SchemaFragment) {
        let Some(format) = fragment.format.clone() else {
            return;
        };
        if let Some(data_type) = DataType::parse_known(&format) {
            fragment.data_type = Some(data_type);
            fragment.format = None;
            return;
        }
        fragment.data_type = DataType::KNOWN
            .into_iter()
            .find(|data_type| self.has_format(data_type, &format));
    }

    /// Turn a definition into a field.
    ///
    /// Unknown types and formats fall back with a warning; only a missing
    /// definition or an underivable name is an error.
    pub fn resolve_field(
        self: &Arc<Self>,
        definition: impl Into<FieldDefinition>,
        name: Option<&str>,
    ) -> Result<Arc<dyn Field>, FieldError> {
        let mut fragment = match definition.into() {
            FieldDefinition::Field(field) => return Ok(field),
            FieldDefinition::Shorthand(shorthand) if shorthand.is_empty() => {
                return Err(FieldError::MissingDefinition)
            }
            FieldDefinition::Shorthand(shorthand) => self.fragment_from_shorthand(&shorthand),
            FieldDefinition::Fragment(fragment) => fragment,
        };

        if let Some(reference) = fragment.reference.clone() {
            let target = self.schema.resolve_pointer(&reference)?.clone();
            fragment.merge_from(&target)?;
        }

        match name {
            Some(name) => fragment.name = Some(name.to_string()),
            None if fragment.name.is_none() => {
                return Err(FieldError::MissingName(fragment.to_value().to_string()))
            }
            None => {}
        }

        if fragment.format.is_none() {
            fragment.format = fragment
                .x_format
                .clone()
                .or_else(|| fragment.items.as_ref().and_then(|items| items.x_format.clone()));
        }

        if fragment.format.is_some() && fragment.data_type.is_none() {
            self.guess_type_by_format(&mut fragment);
        }

        if fragment.format.is_none() && fragment.enumeration.is_some() {
            if let Some(data_type) = &fragment.data_type {
                if data_type.supports_enum() {
                    fragment.format = Some("choices".to_string());
                }
            }
        }

        let builder = FieldBuilder { resolver: self };
        let formats = match fragment.data_type.as_ref().and_then(|t| self.types.get(t)) {
            Some(formats) => formats,
            None => {
                warn!(
                    "Unknown type: {}",
                    fragment
                        .data_type
                        .as_ref()
                        .map(DataType::as_str)
                        .unwrap_or("undefined")
                );
                return SimpleField::base(fragment);
            }
        };
        let data_type = fragment
            .data_type
            .as_ref()
            .map(DataType::to_string)
            .unwrap_or_default();

        if let Some(format) = fragment.format.clone() {
            if let Some(constructor) = formats.get(&FormatKey::Named(format.clone())) {
                return constructor(fragment, &builder);
            }
            warn!("Unknown format \"{}\" for type \"{}\"", format, data_type);
        }

        if let Some(constructor) = formats.get(&FormatKey::Default) {
            return constructor(fragment, &builder);
        }
        warn!("Type \"{}\" has no default field class", data_type);
        SimpleField::base(fragment)
    }
}
