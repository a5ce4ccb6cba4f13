use crate::error::{FetchError, FieldError, ValidationError};
use crate::fields::{
    BindContext, FetchCapability, Field, FieldBuilder, FieldCommon, FieldsResolver, SimpleField,
};
use crate::model::{FieldData, FieldDefinition, InnerData, Instance, RepresentValue, SchemaFragment};
use crate::store::{QuerySource, SavedViewState};
use futures::future::{join_all, BoxFuture};
use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Name(s) of the sibling fields the concrete type depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Discriminators {
    One(String),
    Many(Vec<String>),
}

impl Discriminators {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Discriminators::One(name) => vec![name.as_str()],
            Discriminators::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicOptions {
    pub source_view: Option<String>,
    pub field: Option<Discriminators>,
    /// Discriminator value to field definition.
    pub types: Option<Map<String, Value>>,
    /// Discriminator value to allowed values.
    pub choices: Option<Map<String, Value>>,
}

/// Computes a field definition from the discriminator values.
pub type DynamicCallback = Arc<dyn Fn(&InnerData) -> Option<FieldDefinition> + Send + Sync>;

/// Field whose concrete type is chosen per record from sibling values.
///
/// The concrete field is recomputed on every call; nothing is cached across
/// records because the discriminator may change.
pub struct DynamicField {
    common: FieldCommon,
    options: DynamicOptions,
    resolver: Arc<FieldsResolver>,
    types: OnceLock<HashMap<String, Arc<dyn Field>>>,
    used_on_views: RwLock<Vec<String>>,
    view_state: OnceLock<Arc<dyn SavedViewState>>,
    callback: RwLock<Option<DynamicCallback>>,
}

impl DynamicField {
    pub fn new(fragment: SchemaFragment, resolver: Arc<FieldsResolver>) -> Result<Self, FieldError> {
        let options: DynamicOptions = fragment.options()?;
        Ok(Self {
            common: FieldCommon::new(fragment)?,
            options,
            resolver,
            types: OnceLock::new(),
            used_on_views: RwLock::new(Vec::new()),
            view_state: OnceLock::new(),
            callback: RwLock::new(None),
        })
    }

    pub fn construct(
        fragment: SchemaFragment,
        builder: &FieldBuilder<'_>,
    ) -> Result<Arc<dyn Field>, FieldError> {
        let field = Arc::new(Self::new(fragment, Arc::clone(builder.resolver()))?);
        let bound = Arc::clone(&field);
        builder.defer(Box::new(move |context| bound.bind(context)))?;
        Ok(field)
    }

    fn bind(&self, context: &BindContext) -> Result<(), FieldError> {
        if let Some(view_state) = &context.view_state {
            let _ = self.view_state.set(Arc::clone(view_state));
        }
        if let Some(source_view) = &self.options.source_view {
            if self.view_state.get().is_none() {
                warn!(
                    "Field {} reads from view {} but no saved view state is available",
                    self.name(),
                    source_view
                );
            }
        }
        self.resolve_types()
    }

    fn resolve_types(&self) -> Result<(), FieldError> {
        let Some(definitions) = &self.options.types else {
            return Ok(());
        };
        let mut types = HashMap::new();
        for (value, definition) in definitions {
            let definition = match FieldDefinition::from_value(definition)? {
                FieldDefinition::Shorthand(shorthand) => {
                    self.inherit(self.resolver.fragment_from_shorthand(&shorthand))
                }
                FieldDefinition::Fragment(fragment) => self.inherit(fragment),
                field => field,
            };
            let field = self.resolver.resolve_field(definition, Some(self.name()))?;
            for path in self.used_on_views.read().iter() {
                field.prepare_field_for_view(path);
            }
            types.insert(value.clone(), field);
        }
        let _ = self.types.set(types);
        Ok(())
    }

    fn inherit(&self, mut fragment: SchemaFragment) -> FieldDefinition {
        if self.common.required {
            fragment.required = Some(true);
        }
        if fragment.title.is_none() {
            fragment.title = Some(self.common.title.clone());
        }
        FieldDefinition::Fragment(fragment)
    }

    pub fn set_callback(&self, callback: DynamicCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn used_on_views(&self) -> Vec<String> {
        self.used_on_views.read().clone()
    }

    pub fn types(&self) -> Option<&HashMap<String, Arc<dyn Field>>> {
        self.types.get()
    }

    fn discriminator_names(&self) -> Vec<&str> {
        self.options
            .field
            .as_ref()
            .map(Discriminators::names)
            .unwrap_or_default()
    }

    /// Discriminator values, read from the saved source view when one is
    /// configured and has data, otherwise from `data`.
    pub fn parent_values(&self, data: &dyn FieldData) -> InnerData {
        let saved = match (&self.options.source_view, self.view_state.get()) {
            (Some(view), Some(state)) => state.saved_data(view),
            _ => None,
        };
        let mut values = InnerData::new();
        for name in self.discriminator_names() {
            let value = match &saved {
                Some(saved) => saved.get(name).cloned(),
                None => data.lookup(name).map(|value| value.to_json()),
            };
            values.insert(name.to_string(), value.unwrap_or(Value::Null));
        }
        values
    }

    fn resolve(&self, definition: impl Into<FieldDefinition>) -> Option<Arc<dyn Field>> {
        match self.resolver.resolve_field(definition, Some(self.name())) {
            Ok(field) => Some(field),
            Err(e) => {
                warn!("Field {} could not resolve its real field: {}", self.name(), e);
                None
            }
        }
    }

    fn from_types(&self, parent_values: &InnerData) -> Option<Arc<dyn Field>> {
        let types = self.types.get()?;
        parent_values
            .values()
            .find_map(|value| types.get(&value_key(value)).cloned())
    }

    fn from_callback(&self, parent_values: &InnerData) -> Option<Arc<dyn Field>> {
        let callback = self.callback.read().clone()?;
        let definition = callback(parent_values)?;
        self.resolve(definition)
    }

    fn from_choices(&self, parent_values: &InnerData) -> Option<Arc<dyn Field>> {
        let choices = self.options.choices.as_ref()?;
        for value in parent_values.values() {
            let Some(Value::Array(items)) = choices.get(&value_key(value)) else {
                continue;
            };
            let definition = if items.iter().any(Value::is_boolean) {
                json!({"type": "boolean"})
            } else {
                json!({"format": "choices", "enum": items})
            };
            return SchemaFragment::from_value(definition)
                .ok()
                .and_then(|fragment| self.resolve(fragment));
        }
        None
    }

    fn from_value(&self, parent_values: &InnerData) -> Option<Arc<dyn Field>> {
        let Some(Discriminators::One(name)) = &self.options.field else {
            return None;
        };
        let value = parent_values.get(name).filter(|value| is_truthy(value))?;
        let definition = FieldDefinition::from_value(value).ok()?;
        self.resolver.resolve_field(definition, Some(self.name())).ok()
    }

    fn default_field(&self) -> Arc<dyn Field> {
        self.resolve("string")
            .unwrap_or_else(|| SimpleField::fallback(self.name()))
    }

    /// Concrete field for one record.
    pub fn resolve_real_field(&self, data: &dyn FieldData) -> Arc<dyn Field> {
        let parent_values = self.parent_values(data);
        self.from_types(&parent_values)
            .or_else(|| self.from_callback(&parent_values))
            .or_else(|| self.from_choices(&parent_values))
            .or_else(|| self.from_value(&parent_values))
            .unwrap_or_else(|| self.default_field())
    }

    /// Concrete field for one record, prepared for `path`.
    pub fn get_real_field(&self, data: &dyn FieldData, path: Option<&str>) -> Arc<dyn Field> {
        let field = self.resolve_real_field(data);
        if let Some(path) = path {
            field.prepare_field_for_view(path);
        }
        field
    }

    /// Group records by structurally equal real fields, in first-seen order.
    pub fn group_instances(
        &self,
        instances: &[Arc<Instance>],
        path: Option<&str>,
    ) -> Vec<(Arc<dyn Field>, Vec<Arc<Instance>>)> {
        let mut groups: Vec<(Arc<dyn Field>, Vec<Arc<Instance>>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for instance in instances {
            let field = self.get_real_field(instance.as_ref(), path);
            let fingerprint = field.fingerprint();
            match index.get(&fingerprint) {
                Some(&position) => groups[position].1.push(Arc::clone(instance)),
                None => {
                    index.insert(fingerprint, groups.len());
                    groups.push((field, vec![Arc::clone(instance)]));
                }
            }
        }
        groups
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64() != Some(0.0),
        _ => true,
    }
}

impl Field for DynamicField {
    fn common(&self) -> &FieldCommon {
        &self.common
    }

    fn class_name(&self) -> &'static str {
        "DynamicField"
    }

    fn to_inner(&self, data: &dyn FieldData) -> Option<Value> {
        self.resolve_real_field(data).to_inner(data)
    }

    fn to_represent(&self, data: &dyn FieldData) -> Option<RepresentValue> {
        self.resolve_real_field(data).to_represent(data)
    }

    fn validate_value(&self, data: &dyn FieldData) -> Result<Option<RepresentValue>, ValidationError> {
        self.resolve_real_field(data).validate_value(data)
    }

    fn prepare_field_for_view(&self, path: &str) {
        {
            let mut used = self.used_on_views.write();
            if used.iter().any(|used| used == path) {
                return;
            }
            used.push(path.to_string());
        }
        if let Some(types) = self.types.get() {
            for field in types.values() {
                field.prepare_field_for_view(path);
            }
        }
    }

    fn capability(&self) -> FetchCapability<'_> {
        FetchCapability::Dynamic(self)
    }

    fn after_instances_fetched<'a>(
        &'a self,
        instances: &'a [Arc<Instance>],
        source: &'a dyn QuerySource,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let groups = self.group_instances(instances, None);
            let results = join_all(
                groups
                    .iter()
                    .map(|(field, group)| field.after_instances_fetched(group, source)),
            )
            .await;
            results.into_iter().collect::<Result<Vec<()>, FetchError>>()?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for DynamicField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicField")
            .field("name", &self.common.name)
            .field("options", &self.options)
            .finish()
    }
}
