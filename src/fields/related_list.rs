use crate::error::FieldError;
use crate::fields::{BindContext, FetchCapability, Field, FieldBuilder, FieldCommon};
use crate::model::{FieldData, InnerData, ModelClass, ModelRegistry, RepresentValue, SchemaFragment};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Read-only list of nested records of another model.
pub struct RelatedListField {
    common: FieldCommon,
    view_type: String,
    items_model: OnceLock<Arc<ModelClass>>,
}

impl RelatedListField {
    pub fn new(fragment: SchemaFragment) -> Result<Self, FieldError> {
        let mut common = FieldCommon::new(fragment)?;
        let view_type = common.format.clone().unwrap_or_else(|| "list".to_string());
        common.format = Some("related_list".to_string());
        Ok(Self {
            common,
            view_type,
            items_model: OnceLock::new(),
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
        let items = self.common.fragment.items.as_deref().ok_or_else(|| {
            FieldError::construction(self.name(), "\"items\" attribute is required for related list")
        })?;
        let model = match &items.reference {
            Some(reference) => context
                .models
                .by_reference(&Value::String(reference.clone()))
                .cloned()
                .ok_or_else(|| {
                    FieldError::construction(self.name(), format!("unknown items model {}", reference))
                })?,
            None => {
                let name = items.name.clone().unwrap_or_else(|| self.name().to_string());
                Arc::new(ModelRegistry::build_model(&name, &items.to_value(), &context.resolver)?)
            }
        };
        self.set_items_model(model);
        Ok(())
    }

    pub fn set_items_model(&self, model: Arc<ModelClass>) {
        let _ = self.items_model.set(model);
    }

    pub fn items_model(&self) -> Option<&Arc<ModelClass>> {
        self.items_model.get()
    }

    /// `"list"` or `"table"`.
    pub fn view_type(&self) -> &str {
        &self.view_type
    }

    /// Nested records held in the slot; non-object entries are skipped.
    pub fn values(&self, data: &dyn FieldData) -> Vec<InnerData> {
        match data.lookup(self.name()) {
            Some(RepresentValue::Value(Value::Array(items))) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Some(RepresentValue::List(items)) => items
                .iter()
                .filter_map(|item| match item.to_json() {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Field for RelatedListField {
    fn common(&self) -> &FieldCommon {
        &self.common
    }

    fn class_name(&self) -> &'static str {
        "RelatedListField"
    }

    fn prepare_field_for_view(&self, path: &str) {
        if let Some(model) = self.items_model() {
            for field in model.fields().iter() {
                field.prepare_field_for_view(path);
            }
        }
    }

    fn capability(&self) -> FetchCapability<'_> {
        FetchCapability::RelatedList(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_is_normalized() {
        let field = RelatedListField::new(
            SchemaFragment::from_value(json!({
                "name": "lines", "type": "array", "format": "table",
                "items": {"type": "object", "properties": {"qty": {"type": "integer"}}}
            }))
            .unwrap(),
        )
        .unwrap();
        assert_eq!(field.view_type(), "table");
        assert_eq!(field.format(), Some("related_list"));
    }

    #[test]
    fn test_values_skip_non_objects() {
        let field = RelatedListField::new(
            SchemaFragment::from_value(json!({"name": "lines", "type": "array", "format": "list"}))
                .unwrap(),
        )
        .unwrap();
        let mut data = InnerData::new();
        data.insert("lines".to_string(), json!([{"qty": 1}, 5, {"qty": 2}]));
        let values = field.values(&data);
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["qty"], json!(2));
    }
}
