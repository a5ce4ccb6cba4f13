use crate::fields::Field;
use crate::model::{BatchKey, InnerData, Instance, ModelClass, QueryFilter};
use crate::store::traits::{QuerySource, QuerySourceResolver, SavedViewState};
use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::warn;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Query source over records held in memory.
///
/// Clones share the record list, the failure switch and the log of executed
/// filters, so a test can hand out filtered copies and still count every
/// query that reached the "server".
#[derive(Clone)]
pub struct MemoryQuerySource {
    name: String,
    class: Arc<ModelClass>,
    key_field: String,
    records: Arc<RwLock<Vec<InnerData>>>,
    filter: QueryFilter,
    prefetch: bool,
    executed: Arc<Mutex<Vec<QueryFilter>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl MemoryQuerySource {
    pub fn new(name: &str, class: Arc<ModelClass>, records: Vec<InnerData>) -> Self {
        Self {
            name: name.to_string(),
            class,
            key_field: "id".to_string(),
            records: Arc::new(RwLock::new(records)),
            filter: QueryFilter::default(),
            prefetch: true,
            executed: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_key_field(mut self, key_field: &str) -> Self {
        self.key_field = key_field.to_string();
        self
    }

    pub fn current_filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Filters of every `items` call made through this source or its clones.
    pub fn executed(&self) -> Vec<QueryFilter> {
        self.executed.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn clear_log(&self) {
        self.executed.lock().clear();
    }

    /// Make every following `items` call fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.write() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    pub fn push_record(&self, record: InnerData) {
        self.records.write().push(record);
    }

    fn matches(&self, record: &InnerData) -> bool {
        self.filter.params.iter().all(|(param, expected)| {
            let Some(actual) = record.get(param) else {
                return false;
            };
            let actual = scalar_text(actual);
            match expected {
                Value::String(list) => list.split(',').any(|candidate| candidate == actual),
                other => scalar_text(other) == actual,
            }
        })
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl QuerySource for MemoryQuerySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, filter: &QueryFilter) -> Arc<dyn QuerySource> {
        let mut filtered = self.clone();
        filtered.filter = self.filter.merge(filter);
        Arc::new(filtered)
    }

    fn without_prefetch(&self) -> Arc<dyn QuerySource> {
        let mut plain = self.clone();
        plain.prefetch = false;
        Arc::new(plain)
    }

    fn response_model(&self) -> Option<Arc<ModelClass>> {
        Some(Arc::clone(&self.class))
    }

    async fn items(&self) -> Result<Vec<Arc<Instance>>> {
        let failure = self.failure.read().clone();
        if let Some(message) = failure {
            return Err(anyhow!("{}: {}", self.name, message));
        }
        self.executed.lock().push(self.filter.clone());

        let mut matched: Vec<InnerData> = self
            .records
            .read()
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect();
        if let Some(limit) = self.filter.limit {
            matched.truncate(limit);
        }

        let origin: Arc<dyn QuerySource> = Arc::new(self.clone());
        let instances: Vec<Arc<Instance>> = matched
            .into_iter()
            .map(|data| {
                Arc::new(Instance::new(Arc::clone(&self.class), data).with_source(Arc::clone(&origin)))
            })
            .collect();

        if self.prefetch && !instances.is_empty() {
            let fields: Vec<&Arc<dyn Field>> = self.class.fields().iter().collect();
            let hooks = fields
                .iter()
                .map(|field| field.after_instances_fetched(&instances, self));
            // a failed prefetch leaves the raw value in place
            for (field, result) in fields.iter().zip(join_all(hooks).await) {
                if let Err(e) = result {
                    warn!("Prefetch of {} from {} failed: {}", field.name(), self.name, e);
                }
            }
        }
        Ok(instances)
    }

    async fn get(&self, key: &BatchKey) -> Result<Option<Arc<Instance>>> {
        let single = self.filter(&QueryFilter::new().param(&self.key_field, key.to_value()).limit(1));
        Ok(single.items().await?.into_iter().next())
    }
}

/// Query sources registered per model and view path.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    by_model: HashMap<(String, Option<String>), Arc<dyn QuerySource>>,
    by_view: HashMap<String, Arc<dyn QuerySource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: &str, path: Option<&str>, source: Arc<dyn QuerySource>) {
        self.by_model
            .insert((model.to_string(), path.map(str::to_string)), source);
    }

    pub fn register_view(&mut self, path: &str, source: Arc<dyn QuerySource>) {
        self.by_view.insert(path.to_string(), source);
    }
}

impl QuerySourceResolver for SourceRegistry {
    fn find_query_source(&self, model: &str, path: Option<&str>) -> Option<Arc<dyn QuerySource>> {
        path.and_then(|path| {
            self.by_model
                .get(&(model.to_string(), Some(path.to_string())))
        })
        .or_else(|| self.by_model.get(&(model.to_string(), None)))
        .cloned()
    }

    fn view_query_source(&self, path: &str) -> Option<Arc<dyn QuerySource>> {
        self.by_view.get(path).cloned()
    }
}

/// Saved view data held in memory.
#[derive(Default)]
pub struct MemoryViewState {
    views: RwLock<HashMap<String, InnerData>>,
}

impl MemoryViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, view: &str, data: InnerData) {
        self.views.write().insert(view.to_string(), data);
    }

    pub fn forget(&self, view: &str) {
        self.views.write().remove(view);
    }
}

impl SavedViewState for MemoryViewState {
    fn saved_data(&self, view: &str) -> Option<InnerData> {
        self.views.read().get(view).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> InnerData {
        match value {
            Value::Object(map) => map,
            _ => InnerData::new(),
        }
    }

    fn categories() -> MemoryQuerySource {
        MemoryQuerySource::new(
            "categories",
            Arc::new(ModelClass::empty("Category")),
            vec![
                record(json!({"id": 1, "name": "Bikes"})),
                record(json!({"id": 2, "name": "Parts"})),
                record(json!({"id": 3, "name": "Tools"})),
            ],
        )
    }

    #[tokio::test]
    async fn test_filter_by_comma_list_and_limit() {
        let source = categories();
        let filtered = source.filter(&QueryFilter::new().param("id", "1,3").limit(2));
        let items = filtered.items().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key_value("id"), Some(BatchKey::Int(1)));
        assert_eq!(items[1].key_value("id"), Some(BatchKey::Int(3)));
        assert!(items[0].source().is_some());
        assert_eq!(source.query_count(), 1);
    }

    #[tokio::test]
    async fn test_get_by_key() {
        let source = categories();
        let found = source.get(&BatchKey::Int(2)).await.unwrap();
        assert_eq!(found.unwrap().inner_value("name"), Some(json!("Parts")));
        assert!(source.get(&BatchKey::Int(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let source = categories();
        source.fail_with("connection reset");
        assert!(source.items().await.is_err());
        assert_eq!(source.query_count(), 0);

        source.recover();
        assert_eq!(source.items().await.unwrap().len(), 3);
    }

    #[test]
    fn test_registry_prefers_path_specific_source() {
        let general: Arc<dyn QuerySource> = Arc::new(categories());
        let scoped: Arc<dyn QuerySource> =
            Arc::new(MemoryQuerySource::new("scoped", Arc::new(ModelClass::empty("Category")), vec![]));

        let mut registry = SourceRegistry::new();
        registry.register("Category", None, general);
        registry.register("Category", Some("/shop/"), scoped);

        let found = registry.find_query_source("Category", Some("/shop/")).unwrap();
        assert_eq!(found.name(), "scoped");
        let fallback = registry.find_query_source("Category", Some("/other/")).unwrap();
        assert_eq!(fallback.name(), "categories");
        assert!(registry.find_query_source("Product", None).is_none());
    }
}
