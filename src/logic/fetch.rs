use crate::error::FetchError;
use crate::fields::{ArrayField, DynamicField, FetchCapability, FetchableField, Field, RelatedListField};
use crate::logic::coalescer::{PendingRecord, QueryCoalescer};
use crate::model::{BatchKey, InnerData, Instance, ModelClass, RepresentValue};
use crate::store::QuerySource;
use futures::future::{join_all, BoxFuture};
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_NOT_FOUND_TEXT: &str = "[Object not found]";

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Only resolve relation fields that opted into prefetching.
    pub prefetch_only: bool,
    /// View value of placeholder records for keys that were not found.
    pub not_found_text: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            prefetch_only: false,
            not_found_text: DEFAULT_NOT_FOUND_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldFailure {
    pub field: String,
    pub error: FetchError,
}

/// Per-field outcome of an orchestrator pass. A failed field never stops
/// its siblings, so failures are collected rather than returned early.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub failures: Vec<FieldFailure>,
}

impl FetchReport {
    pub fn failed(field: &str, error: FetchError) -> Self {
        Self {
            failures: vec![FieldFailure {
                field: field.to_string(),
                error,
            }],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: FetchReport) {
        self.failures.extend(other.failures);
    }

    /// First failure, if any.
    pub fn into_result(self) -> Result<(), FetchError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }
}

enum Slot {
    Passed(Option<Value>),
    Waiting(PendingRecord),
}

/// Resolve raw keys of `field` into records with one batched query.
///
/// Values that are not scalar keys are passed through unchanged. Keys
/// without a record become placeholder records flagged as not found; a
/// failed query fails the whole call.
pub async fn fetch_keys(
    values: &[Option<Value>],
    field: &dyn FetchableField,
    source: Option<Arc<dyn QuerySource>>,
    options: &FetchOptions,
) -> Result<Vec<Option<RepresentValue>>, FetchError> {
    let Some(source) = source else {
        warn!("No query source to fetch values of {}", field.name());
        return Ok(values
            .iter()
            .map(|value| value.clone().map(RepresentValue::Value))
            .collect());
    };

    let coalescer = QueryCoalescer::new(
        source.without_prefetch(),
        field.filter_name(),
        Some(field.filter_field_name()),
    );
    let slots: Vec<Slot> = values
        .iter()
        .map(|value| match value.as_ref().and_then(BatchKey::from_value) {
            Some(key) => Slot::Waiting(coalescer.enqueue(key)),
            None => Slot::Passed(value.clone()),
        })
        .collect();
    // a failed batch is reported through every waiter below
    let _ = coalescer.flush().await;

    let mut resolved = Vec::with_capacity(slots.len());
    for slot in slots {
        let value = match slot {
            Slot::Passed(value) => value.map(RepresentValue::Value),
            Slot::Waiting(record) => match record.await {
                Ok(instance) => Some(RepresentValue::Instance(instance)),
                Err(FetchError::NotFound { key, .. }) => Some(RepresentValue::Instance(Arc::new(
                    not_found_placeholder(field, &source, &key, options),
                ))),
                Err(e) => return Err(e),
            },
        };
        resolved.push(value);
    }
    Ok(resolved)
}

fn not_found_placeholder(
    field: &dyn FetchableField,
    source: &Arc<dyn QuerySource>,
    key: &BatchKey,
    options: &FetchOptions,
) -> Instance {
    let class = source
        .response_model()
        .unwrap_or_else(|| Arc::new(ModelClass::empty("NotFound")));
    let mut data = InnerData::new();
    data.insert(field.value_field().to_string(), key.to_value());
    data.insert(
        field.view_field().to_string(),
        Value::String(options.not_found_text.clone()),
    );
    Instance::not_found(class, data)
}

/// Resolve `field` on every record and store the results as their
/// represented values.
pub async fn fetch_field_values(
    field: &dyn FetchableField,
    instances: &[Arc<Instance>],
    source: Option<Arc<dyn QuerySource>>,
    options: &FetchOptions,
) -> Result<(), FetchError> {
    let values: Vec<Option<Value>> = instances
        .iter()
        .map(|instance| instance.inner_value(field.name()))
        .collect();
    let resolved = fetch_keys(&values, field, source, options).await?;
    for (instance, value) in instances.iter().zip(resolved) {
        if let Some(value) = value {
            instance.set_prefetched_value(field.name(), value);
        }
    }
    Ok(())
}

/// Walks records and their fields, resolving every relation with one
/// batched query per field.
#[derive(Debug, Clone, Default)]
pub struct RelationFetcher {
    path: Option<String>,
    options: FetchOptions,
}

impl RelationFetcher {
    pub fn new(options: FetchOptions) -> Self {
        Self { path: None, options }
    }

    /// View path used to pick query sources.
    pub fn for_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Resolve every field of `instances`, which share the field layout of
    /// the first record.
    pub async fn fetch_instances(&self, instances: &[Arc<Instance>]) -> FetchReport {
        let Some(first) = instances.first() else {
            return FetchReport::default();
        };
        let fields: Vec<Arc<dyn Field>> = first.class().fields().iter().cloned().collect();
        self.fetch_instances_fields(instances.to_vec(), fields).await
    }

    pub fn fetch_instances_fields<'a>(
        &'a self,
        instances: Vec<Arc<Instance>>,
        fields: Vec<Arc<dyn Field>>,
    ) -> BoxFuture<'a, FetchReport> {
        Box::pin(async move {
            if instances.is_empty() {
                return FetchReport::default();
            }
            let mut tasks: Vec<BoxFuture<'_, FetchReport>> = Vec::new();
            for field in &fields {
                match field.capability() {
                    FetchCapability::Relation(relation) => {
                        if relation.use_prefetch() || !self.options.prefetch_only {
                            tasks.push(Box::pin(self.fetch_relation(relation, &instances)));
                        }
                    }
                    FetchCapability::Array(array) => {
                        tasks.push(Box::pin(self.fetch_array(array, &instances)))
                    }
                    FetchCapability::Dynamic(dynamic) => {
                        tasks.push(Box::pin(self.fetch_dynamic(dynamic, &instances)))
                    }
                    FetchCapability::RelatedList(related) => {
                        tasks.push(Box::pin(self.fetch_related_list(related, &instances)))
                    }
                    FetchCapability::None => {}
                }
            }

            let mut report = FetchReport::default();
            for partial in join_all(tasks).await {
                report.merge(partial);
            }
            report
        })
    }

    async fn fetch_relation(&self, field: &dyn FetchableField, instances: &[Arc<Instance>]) -> FetchReport {
        let source = field.value_fetch_source(self.path.as_deref());
        debug!(
            "Resolving {} on {} records",
            field.name(),
            instances.len()
        );
        match fetch_field_values(field, instances, source, &self.options).await {
            Ok(()) => FetchReport::default(),
            Err(e) => {
                warn!("Failed to fetch values of {}: {}", field.name(), e);
                FetchReport::failed(field.name(), e)
            }
        }
    }

    async fn fetch_array(&self, field: &ArrayField, instances: &[Arc<Instance>]) -> FetchReport {
        let Some(item_field) = field.item_field() else {
            debug!("Array field {} has no item field yet", field.name());
            return FetchReport::default();
        };
        let item_instances = field.item_instances(instances, item_field);
        let all: Vec<Arc<Instance>> = item_instances
            .iter()
            .flat_map(|(_, items)| items.iter().cloned())
            .collect();
        let report = self
            .fetch_instances_fields(all, vec![Arc::clone(item_field)])
            .await;
        field.scatter_item_values(&item_instances);
        report
    }

    async fn fetch_dynamic(&self, field: &DynamicField, instances: &[Arc<Instance>]) -> FetchReport {
        let groups = field.group_instances(instances, self.path.as_deref());
        let mut report = FetchReport::default();
        let partials = join_all(
            groups
                .into_iter()
                .map(|(real, group)| self.fetch_instances_fields(group, vec![real])),
        )
        .await;
        for partial in partials {
            report.merge(partial);
        }
        report
    }

    async fn fetch_related_list(&self, field: &RelatedListField, instances: &[Arc<Instance>]) -> FetchReport {
        let Some(model) = field.items_model() else {
            debug!("Related list {} has no items model yet", field.name());
            return FetchReport::default();
        };
        let nested: Vec<Vec<Arc<Instance>>> = instances
            .iter()
            .map(|instance| {
                field
                    .values(instance.data())
                    .into_iter()
                    .map(|data| Arc::new(Instance::new(Arc::clone(model), data)))
                    .collect()
            })
            .collect();
        let all: Vec<Arc<Instance>> = nested.iter().flatten().cloned().collect();
        let fields: Vec<Arc<dyn Field>> = model.fields().iter().cloned().collect();
        let report = self.fetch_instances_fields(all, fields).await;

        for (instance, values) in instances.iter().zip(nested) {
            instance.set_prefetched_value(
                field.name(),
                RepresentValue::List(values.into_iter().map(RepresentValue::Instance).collect()),
            );
        }
        report
    }
}
