use crate::error::FieldError;
use crate::fields::{BindContext, FieldsResolver};
use crate::logic::FetchOptions;
use crate::model::{ModelClass, ModelRegistry, Schema};
use crate::store::{QuerySourceResolver, SavedViewState};
use std::sync::Arc;

/// First bootstrap phase: every model and field built, cross references
/// not yet bound.
pub struct SchemaSkeleton {
    resolver: Arc<FieldsResolver>,
    models: Arc<ModelRegistry>,
    fetch_options: FetchOptions,
}

impl SchemaSkeleton {
    pub fn build(resolver: FieldsResolver) -> Result<Self, FieldError> {
        let resolver = Arc::new(resolver);
        let models = ModelRegistry::from_schema(resolver.schema(), &resolver)?;
        Ok(Self {
            resolver,
            models: Arc::new(models),
            fetch_options: FetchOptions::default(),
        })
    }

    /// Skeleton of a JSON API description using the built-in field classes.
    pub fn from_json_str(raw: &str) -> Result<Self, FieldError> {
        let schema = Arc::new(Schema::from_json_str(raw)?);
        Self::build(FieldsResolver::with_default_fields(schema))
    }

    /// Options used by relation lookups that query sources trigger on
    /// their own, e.g. the configured not-found text.
    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    pub fn resolver(&self) -> &Arc<FieldsResolver> {
        &self.resolver
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&Arc<ModelClass>> {
        self.models.get(name)
    }

    /// Second phase: run every deferred bind against the finished graph.
    pub fn bind(
        self,
        sources: Arc<dyn QuerySourceResolver>,
        view_state: Option<Arc<dyn SavedViewState>>,
    ) -> Result<AppSchema, FieldError> {
        let context = self.resolver.init_queue().bind(BindContext {
            resolver: Arc::clone(&self.resolver),
            models: Arc::clone(&self.models),
            sources,
            view_state,
            fetch_options: self.fetch_options,
        })?;
        Ok(AppSchema {
            resolver: self.resolver,
            models: self.models,
            context,
        })
    }
}

/// Fully bound API description. Dropping it releases the whole field graph.
pub struct AppSchema {
    resolver: Arc<FieldsResolver>,
    models: Arc<ModelRegistry>,
    context: Arc<BindContext>,
}

impl AppSchema {
    pub fn resolver(&self) -> &Arc<FieldsResolver> {
        &self.resolver
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&Arc<ModelClass>> {
        self.models.get(name)
    }

    pub fn sources(&self) -> &Arc<dyn QuerySourceResolver> {
        &self.context.sources
    }

    /// Late-bind every field of `model` against the view at `path`.
    pub fn prepare_for_view(&self, model: &str, path: &str) -> Result<(), FieldError> {
        let class = self
            .models
            .get(model)
            .ok_or_else(|| FieldError::InvalidReference(model.to_string()))?;
        for field in class.fields().iter() {
            field.prepare_field_for_view(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SourceRegistry;
    use serde_json::json;

    fn description() -> String {
        json!({
            "definitions": {
                "Category": {"properties": {"id": {"type": "integer"}, "name": {"type": "string"}}},
                "Product": {
                    "properties": {
                        "category": {
                            "type": "integer",
                            "format": "fk",
                            "x-options": {"model": {"$ref": "#/definitions/Category"}, "view_field": "name"}
                        },
                        "ids": {"type": "array", "items": {"type": "integer"}},
                        "kind": {"type": "string"},
                        "value": {"type": "string", "format": "dynamic", "x-options": {"field": "kind"}}
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_bind_runs_deferred_binds() {
        let skeleton = SchemaSkeleton::from_json_str(&description()).unwrap();
        assert!(skeleton.resolver().init_queue().pending() > 0);

        let app = skeleton.bind(Arc::new(SourceRegistry::new()), None).unwrap();
        assert!(app.resolver().init_queue().is_bound());
        assert!(app.prepare_for_view("Product", "/products/").is_ok());
        assert!(app.prepare_for_view("Order", "/orders/").is_err());
    }

    #[test]
    fn test_dropping_app_releases_resolver() {
        let skeleton = SchemaSkeleton::from_json_str(&description()).unwrap();
        let resolver = Arc::downgrade(skeleton.resolver());
        let app = skeleton.bind(Arc::new(SourceRegistry::new()), None).unwrap();
        assert!(resolver.upgrade().is_some());

        drop(app);
        assert!(resolver.upgrade().is_none());
    }
}
