use crate::error::{FetchError, FieldError};
use crate::fields::{
    BindContext, FetchCapability, FetchableField, Field, FieldBuilder, FieldCommon,
};
use crate::logic::fetch::{fetch_field_values, FetchOptions};
use crate::model::{
    dependence_value_as_filter, FieldData, FieldSet, Instance, ModelClass, QueryFilter,
    RepresentValue, SchemaFragment,
};
use crate::store::{QuerySource, QuerySourceResolver};
use futures::future::BoxFuture;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// `x-options` understood by relation fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationOptions {
    pub value_field: Option<String>,
    pub view_field: Option<String>,
    #[serde(rename = "usePrefetch")]
    pub use_prefetch: bool,
    #[serde(rename = "fetchData")]
    pub fetch_data: Option<bool>,
    /// Sibling field name (or `<<template>>`) to filter name.
    pub dependence: BTreeMap<String, String>,
    pub filters: BTreeMap<String, Value>,
    pub filter_name: Option<String>,
    pub filter_field_name: Option<String>,
    pub model: Option<Value>,
    pub list_paths: Option<Vec<String>>,
}

/// Result of evaluating a relation field's dependencies against a record.
#[derive(Debug, Clone, PartialEq)]
pub enum DependenceFilters {
    Filters(QueryFilter),
    /// A required, non-nullable dependency has no value; the field must be
    /// disabled until it gets one.
    Disabled,
}

/// Foreign-key style field: the wire value is the key of a record in a
/// related collection, the represented value is that record.
pub struct RelationField {
    common: FieldCommon,
    value_field: String,
    view_field: String,
    use_prefetch: bool,
    fetch_data: bool,
    dependence: BTreeMap<String, String>,
    filters: QueryFilter,
    filter_name: String,
    filter_field_name: String,
    model_ref: Option<Value>,
    list_paths: Option<Vec<String>>,
    related_model: RwLock<Option<Arc<ModelClass>>>,
    sources: RwLock<HashMap<Option<String>, Vec<Arc<dyn QuerySource>>>>,
    source_resolver: OnceLock<Arc<dyn QuerySourceResolver>>,
    fetch_options: OnceLock<FetchOptions>,
}

impl RelationField {
    pub fn new(fragment: SchemaFragment) -> Result<Self, FieldError> {
        let options: RelationOptions = fragment.options()?;
        let common = FieldCommon::new(fragment)?;

        let value_field = options.value_field.unwrap_or_else(|| "id".to_string());
        let view_field = options.view_field.unwrap_or_else(|| value_field.clone());
        let fetch_data = options.fetch_data.unwrap_or(view_field != value_field);

        Ok(Self {
            common,
            filter_name: options.filter_name.unwrap_or_else(|| value_field.clone()),
            filter_field_name: options
                .filter_field_name
                .unwrap_or_else(|| value_field.clone()),
            value_field,
            view_field,
            use_prefetch: options.use_prefetch,
            fetch_data,
            dependence: options.dependence,
            filters: QueryFilter::from(options.filters),
            model_ref: options.model,
            list_paths: options.list_paths,
            related_model: RwLock::new(None),
            sources: RwLock::new(HashMap::new()),
            source_resolver: OnceLock::new(),
            fetch_options: OnceLock::new(),
        })
    }

    pub fn construct(
        fragment: SchemaFragment,
        builder: &FieldBuilder<'_>,
    ) -> Result<Arc<dyn Field>, FieldError> {
        let field = Arc::new(Self::new(fragment)?);
        let bound = Arc::clone(&field);
        builder.defer(Box::new(move |context| bound.bind(context)))?;
        Ok(field)
    }

    fn bind(&self, context: &BindContext) -> Result<(), FieldError> {
        let _ = self.source_resolver.set(Arc::clone(&context.sources));
        let _ = self.fetch_options.set(context.fetch_options.clone());
        if let Some(reference) = &self.model_ref {
            let model = context.models.by_reference(reference).ok_or_else(|| {
                FieldError::construction(
                    self.name(),
                    format!("could not resolve model {}", reference),
                )
            })?;
            *self.related_model.write() = Some(Arc::clone(model));
        }
        Ok(())
    }

    pub fn related_model(&self) -> Option<Arc<ModelClass>> {
        self.related_model.read().clone()
    }

    pub fn dependence(&self) -> &BTreeMap<String, String> {
        &self.dependence
    }

    /// Register candidate sources for a view path (`None` for every path).
    pub fn set_query_sources(&self, path: Option<&str>, sources: Vec<Arc<dyn QuerySource>>) {
        self.sources
            .write()
            .insert(path.map(str::to_string), sources);
    }

    pub fn query_sources(&self, path: Option<&str>) -> Option<Vec<Arc<dyn QuerySource>>> {
        self.sources.read().get(&path.map(str::to_string)).cloned()
    }

    /// First candidate for `path` with the static filters applied.
    pub fn appropriate_query_source(&self, path: Option<&str>) -> Option<Arc<dyn QuerySource>> {
        let first = self
            .sources
            .read()
            .get(&path.map(str::to_string))
            .and_then(|sources| sources.first().cloned())?;
        Some(first.filter(&self.filters))
    }

    /// Candidates for `path`, else the unscoped candidates, else the
    /// related model's default source.
    pub fn all_query_sources(&self, path: Option<&str>) -> Vec<Arc<dyn QuerySource>> {
        {
            let sources = self.sources.read();
            if let Some(found) = sources
                .get(&path.map(str::to_string))
                .or_else(|| sources.get(&None))
            {
                return found.clone();
            }
        }
        self.fallback_query_source().into_iter().collect()
    }

    pub fn fallback_query_source(&self) -> Option<Arc<dyn QuerySource>> {
        let resolver = self.source_resolver.get()?;
        let model = self.related_model()?;
        resolver.find_query_source(model.name(), None)
    }

    /// Filters imposed by sibling values, or `Disabled` when a required
    /// dependency is empty. `templates` provides `<<name>>` substitutions.
    pub fn dependence_filters(
        &self,
        data: &dyn FieldData,
        fields: &FieldSet,
        templates: &HashMap<String, Value>,
    ) -> DependenceFilters {
        let mut filter = QueryFilter::new();
        for (key, filter_name) in &self.dependence {
            if let Some(value) = substitute_templates(key, templates) {
                filter = filter.param(filter_name, value);
                continue;
            }
            let Some(field) = fields.get(key) else {
                warn!("Dependence field {} of {} does not exist", key, self.name());
                continue;
            };
            match field.to_inner(data).as_ref().and_then(dependence_value_as_filter) {
                Some(value) => filter = filter.param(filter_name, value),
                None => {
                    let common = field.common();
                    if common.required && !common.nullable {
                        return DependenceFilters::Disabled;
                    }
                }
            }
        }
        DependenceFilters::Filters(filter)
    }

    /// Display value of a represented value: the view field of a record.
    pub fn view_value(&self, value: &RepresentValue) -> Option<Value> {
        match value {
            RepresentValue::Instance(instance) => instance.inner_value(&self.view_field),
            RepresentValue::Value(Value::Object(map)) => map.get(&self.view_field).cloned(),
            RepresentValue::Value(value) => Some(value.clone()),
            RepresentValue::List(_) => None,
        }
    }

    fn key_of(&self, value: RepresentValue) -> Value {
        match value {
            RepresentValue::Instance(instance) => {
                instance.inner_value(&self.value_field).unwrap_or(Value::Null)
            }
            RepresentValue::Value(Value::Object(map)) => {
                map.get(&self.value_field).cloned().unwrap_or(Value::Null)
            }
            other => other.to_json(),
        }
    }
}

fn substitute_templates(key: &str, templates: &HashMap<String, Value>) -> Option<Value> {
    let mut rest = key;
    let mut output = String::new();
    let mut substituted = false;
    while let Some(start) = rest.find("<<") {
        let Some(len) = rest[start + 2..].find(">>") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        output.push_str(&rest[..start]);
        match templates.get(name) {
            Some(Value::String(text)) => {
                output.push_str(text);
                substituted = true;
            }
            Some(other) => {
                output.push_str(&other.to_string());
                substituted = true;
            }
            None => output.push_str(&rest[start..start + 4 + len]),
        }
        rest = &rest[start + 4 + len..];
    }
    if !substituted {
        return None;
    }
    output.push_str(rest);
    Some(Value::String(output))
}

impl Field for RelationField {
    fn common(&self) -> &FieldCommon {
        &self.common
    }

    fn class_name(&self) -> &'static str {
        "FKField"
    }

    fn to_inner(&self, data: &dyn FieldData) -> Option<Value> {
        data.lookup(self.name()).map(|value| self.key_of(value))
    }

    fn prepare_field_for_view(&self, path: &str) {
        if self.sources.read().contains_key(&Some(path.to_string())) {
            return;
        }
        let Some(resolver) = self.source_resolver.get() else {
            warn!("Field {} is prepared for {} before binding", self.name(), path);
            return;
        };

        let candidates: Vec<Arc<dyn QuerySource>> = match &self.list_paths {
            Some(list_paths) => {
                let candidates: Vec<Arc<dyn QuerySource>> = list_paths
                    .iter()
                    .filter_map(|list_path| resolver.view_query_source(list_path))
                    .collect();
                let mut related = self.related_model.write();
                if related.is_none() {
                    *related = candidates.first().and_then(|source| source.response_model());
                }
                candidates
            }
            None => match self.related_model() {
                Some(model) => resolver
                    .find_query_source(model.name(), Some(path))
                    .into_iter()
                    .collect(),
                None => {
                    warn!("Related model of field {} is not initialized", self.name());
                    Vec::new()
                }
            },
        };
        if candidates.is_empty() {
            warn!("No query source for field {} on {}", self.name(), path);
        }
        self.sources
            .write()
            .insert(Some(path.to_string()), candidates);
    }

    fn capability(&self) -> FetchCapability<'_> {
        FetchCapability::Relation(self)
    }

    fn after_instances_fetched<'a>(
        &'a self,
        instances: &'a [Arc<Instance>],
        _source: &'a dyn QuerySource,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            if !(self.use_prefetch && self.fetch_data) {
                return Ok(());
            }
            let Some(source) = self.value_fetch_source(None) else {
                debug!("No source to prefetch {}", self.name());
                return Ok(());
            };
            let options = self.fetch_options.get().cloned().unwrap_or_default();
            fetch_field_values(self, instances, Some(source), &options).await
        })
    }
}

impl FetchableField for RelationField {
    fn as_field(&self) -> &dyn Field {
        self
    }

    fn use_prefetch(&self) -> bool {
        self.use_prefetch
    }

    fn fetch_data(&self) -> bool {
        self.fetch_data
    }

    fn filter_name(&self) -> &str {
        &self.filter_name
    }

    fn filter_field_name(&self) -> &str {
        &self.filter_field_name
    }

    fn value_field(&self) -> &str {
        &self.value_field
    }

    fn view_field(&self) -> &str {
        &self.view_field
    }

    fn value_fetch_source(&self, path: Option<&str>) -> Option<Arc<dyn QuerySource>> {
        if let Some(source) = self.appropriate_query_source(path) {
            return Some(source);
        }
        let resolver = self.source_resolver.get()?;
        let model = self.related_model()?;
        resolver.find_query_source(model.name(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SimpleField;
    use crate::model::InnerData;
    use serde_json::json;

    fn relation(options: Value) -> RelationField {
        let fragment = SchemaFragment::from_value(json!({
            "name": "category", "type": "integer", "format": "fk", "x-options": options
        }))
        .unwrap();
        RelationField::new(fragment).unwrap()
    }

    fn data(value: Value) -> InnerData {
        match value {
            Value::Object(map) => map,
            _ => InnerData::new(),
        }
    }

    #[test]
    fn test_option_defaults() {
        let field = relation(json!({}));
        assert_eq!(field.value_field(), "id");
        assert_eq!(field.view_field(), "id");
        assert!(!field.fetch_data());
        assert!(!field.use_prefetch());

        let named = relation(json!({"value_field": "id", "view_field": "name", "usePrefetch": true}));
        assert!(named.fetch_data());
        assert_eq!(named.filter_name(), "id");
        assert_eq!(named.filter_field_name(), "id");

        let explicit = relation(json!({"view_field": "name", "fetchData": false, "filter_name": "pk"}));
        assert!(!explicit.fetch_data());
        assert_eq!(explicit.filter_name(), "pk");
    }

    #[test]
    fn test_rendering_options_are_ignored() {
        let field = relation(json!({"view_field": "name", "makeLink": true}));
        assert_eq!(field.view_field(), "name");
        assert!(field.fetch_data());
    }

    #[test]
    fn test_to_inner_reduces_records_to_key() {
        let field = relation(json!({"view_field": "name"}));
        let mut represented = crate::model::RepresentData::new();
        represented.insert(
            "category".to_string(),
            RepresentValue::Value(json!({"id": 7, "name": "Bikes"})),
        );
        assert_eq!(field.to_inner(&represented), Some(json!(7)));
        assert_eq!(field.to_inner(&data(json!({"category": 3}))), Some(json!(3)));
        assert!(field.is_same_values(&represented, &data(json!({"category": 7}))));
        assert_eq!(
            field.view_value(&RepresentValue::Value(json!({"id": 7, "name": "Bikes"}))),
            Some(json!("Bikes"))
        );
    }

    #[test]
    fn test_dependence_filters() {
        let field = relation(json!({
            "dependence": {"kind": "kind_id", "<<pk>>": "parent"}
        }));
        let required = SchemaFragment::from_value(json!({
            "name": "kind", "type": "integer", "required": true
        }))
        .unwrap();
        let fields = FieldSet::new(vec![SimpleField::integer(required).unwrap()]);
        let templates = HashMap::from([("pk".to_string(), json!(12))]);

        match field.dependence_filters(&data(json!({"kind": [1, 2]})), &fields, &templates) {
            DependenceFilters::Filters(filter) => {
                assert_eq!(filter.get("kind_id"), Some(&json!("1,2")));
                assert_eq!(filter.get("parent"), Some(&json!("12")));
            }
            DependenceFilters::Disabled => panic!("expected filters"),
        }

        assert_eq!(
            field.dependence_filters(&data(json!({"kind": 0})), &fields, &templates),
            DependenceFilters::Disabled
        );
    }

    #[test]
    fn test_optional_dependence_is_skipped() {
        let field = relation(json!({"dependence": {"kind": "kind_id"}}));
        let optional = SchemaFragment::from_value(json!({"name": "kind", "type": "integer"})).unwrap();
        let fields = FieldSet::new(vec![SimpleField::integer(optional).unwrap()]);
        assert_eq!(
            field.dependence_filters(&data(json!({})), &fields, &HashMap::new()),
            DependenceFilters::Filters(QueryFilter::new())
        );
    }

    #[test]
    fn test_template_substitution() {
        let templates = HashMap::from([("view_name".to_string(), json!("users"))]);
        assert_eq!(
            substitute_templates("<<view_name>>", &templates),
            Some(json!("users"))
        );
        assert_eq!(substitute_templates("<<unknown>>", &templates), None);
        assert_eq!(substitute_templates("plain", &templates), None);
    }
}
