use crate::model::{BatchKey, InnerData, Instance, ModelClass, QueryFilter};
use anyhow::Result;
use std::sync::Arc;

/// A filterable collection exposed by the API.
///
/// `filter` is pure and returns a new source; `items` executes the query and
/// tags every returned record with the source it came from.
#[async_trait::async_trait]
pub trait QuerySource: Send + Sync {
    /// Human readable name, used in errors and logs.
    fn name(&self) -> &str;
    fn filter(&self, filter: &QueryFilter) -> Arc<dyn QuerySource>;
    /// Same source with the after-fetch hooks of its fields disabled.
    fn without_prefetch(&self) -> Arc<dyn QuerySource>;
    /// Model of the records returned by `items`.
    fn response_model(&self) -> Option<Arc<ModelClass>>;
    async fn items(&self) -> Result<Vec<Arc<Instance>>>;
    async fn get(&self, key: &BatchKey) -> Result<Option<Arc<Instance>>>;
}

/// Finds the query source serving a model on a given view path.
pub trait QuerySourceResolver: Send + Sync {
    fn find_query_source(&self, model: &str, path: Option<&str>) -> Option<Arc<dyn QuerySource>>;
    /// Source backing the list view registered at `path`.
    fn view_query_source(&self, path: &str) -> Option<Arc<dyn QuerySource>>;
}

/// Saved record data of detail views, keyed by view path.
pub trait SavedViewState: Send + Sync {
    fn saved_data(&self, view: &str) -> Option<InnerData>;
}
