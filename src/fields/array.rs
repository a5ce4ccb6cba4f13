use crate::error::{FetchError, FieldError, ValidationError, ValidationKind};
use crate::fields::{FetchCapability, Field, FieldBuilder, FieldCommon};
use crate::model::{FieldData, Instance, Overlay, RepresentValue, SchemaFragment};
use crate::store::QuerySource;
use futures::future::BoxFuture;
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Records synthesized from one parent record, one per array item.
pub type ItemInstances = Vec<(Arc<Instance>, Vec<Arc<Instance>>)>;

/// Field holding a list of values of one item field.
///
/// All conversion and relation logic is delegated to the item field, which
/// sees each element through an overlay of the parent record.
pub struct ArrayField {
    common: FieldCommon,
    items: SchemaFragment,
    collection_format: Option<String>,
    separator: Option<&'static str>,
    min_items: usize,
    max_items: Option<usize>,
    unique_items: bool,
    item_field: OnceLock<Arc<dyn Field>>,
}

fn separator_for(format: &str) -> Option<&'static str> {
    match format {
        "csv" => Some(","),
        "ssv" => Some(" "),
        "tsv" => Some("\t"),
        "pipes" => Some("|"),
        _ => None,
    }
}

impl ArrayField {
    pub fn new(fragment: SchemaFragment) -> Result<Self, FieldError> {
        let common = FieldCommon::new(fragment)?;
        let fragment = &common.fragment;
        let items = fragment.items.as_deref().cloned().ok_or_else(|| {
            FieldError::construction(&common.name, "\"items\" attribute is required for array field")
        })?;
        let collection_format = fragment
            .extra_str("collectionFormat")
            .or_else(|| fragment.extra_str("x-collectionFormat"))
            .map(str::to_string);
        let separator = collection_format.as_deref().and_then(separator_for);
        let min_items = fragment.extra_usize("minItems").unwrap_or(0);
        let max_items = fragment.extra_usize("maxItems");
        let unique_items = fragment.extra_bool("uniqueItems").unwrap_or(false);

        Ok(Self {
            common,
            items,
            collection_format,
            separator,
            min_items,
            max_items,
            unique_items,
            item_field: OnceLock::new(),
        })
    }

    pub fn construct(
        fragment: SchemaFragment,
        builder: &FieldBuilder<'_>,
    ) -> Result<Arc<dyn Field>, FieldError> {
        let field = Arc::new(Self::new(fragment)?);
        let bound = Arc::clone(&field);
        builder.defer(Box::new(move |context| {
            let item = context
                .resolver
                .resolve_field(bound.items.clone(), Some(bound.name()))?;
            bound.set_item_field(item);
            Ok(())
        }))?;
        Ok(field)
    }

    pub fn set_item_field(&self, field: Arc<dyn Field>) {
        let _ = self.item_field.set(field);
    }

    pub fn item_field(&self) -> Option<&Arc<dyn Field>> {
        self.item_field.get()
    }

    pub fn collection_format(&self) -> Option<&str> {
        self.collection_format.as_deref()
    }

    /// Elements of the array slot, splitting string-encoded arrays.
    pub fn items_of(&self, data: &dyn FieldData) -> Vec<RepresentValue> {
        match data.lookup(self.name()) {
            None | Some(RepresentValue::Value(Value::Null)) => Vec::new(),
            Some(RepresentValue::Value(Value::Array(items))) => {
                items.into_iter().map(RepresentValue::Value).collect()
            }
            Some(RepresentValue::Value(Value::String(text))) => match self.separator {
                Some(_) if text.is_empty() => Vec::new(),
                Some(separator) => text
                    .split(separator)
                    .map(|item| RepresentValue::Value(Value::String(item.to_string())))
                    .collect(),
                None => vec![RepresentValue::Value(Value::String(text))],
            },
            Some(RepresentValue::List(items)) => items,
            Some(other) => vec![other],
        }
    }

    fn encode(&self, values: Vec<Value>) -> Value {
        match self.separator {
            Some(separator) => Value::String(
                values
                    .iter()
                    .map(|value| match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .join(separator),
            ),
            None => Value::Array(values),
        }
    }

    /// One synthetic record per item, sharing the parent's data with only
    /// this field's slot replaced and `item_field` in its place.
    pub fn item_instances(&self, instances: &[Arc<Instance>], item_field: &Arc<dyn Field>) -> ItemInstances {
        let mut classes = HashMap::new();
        instances
            .iter()
            .map(|instance| {
                let class = classes
                    .entry(Arc::as_ptr(instance.class()))
                    .or_insert_with(|| Arc::new(instance.class().with_field(Arc::clone(item_field))))
                    .clone();
                let items = self
                    .items_of(instance.data())
                    .into_iter()
                    .map(|item| Arc::new(instance.overlay(Arc::clone(&class), self.name(), item.to_json())))
                    .collect();
                (Arc::clone(instance), items)
            })
            .collect()
    }

    /// Write the represented values of the synthetic records back into the
    /// array slot of their parents, preserving order and length.
    pub fn scatter_item_values(&self, item_instances: &ItemInstances) {
        for (instance, items) in item_instances {
            let values = items
                .iter()
                .map(|item| {
                    item.represent_value(self.name())
                        .unwrap_or(RepresentValue::Value(Value::Null))
                })
                .collect();
            instance.set_prefetched_value(self.name(), RepresentValue::List(values));
        }
    }
}

impl Field for ArrayField {
    fn common(&self) -> &FieldCommon {
        &self.common
    }

    fn class_name(&self) -> &'static str {
        "ArrayField"
    }

    fn to_inner(&self, data: &dyn FieldData) -> Option<Value> {
        data.lookup(self.name())?;
        let Some(item_field) = self.item_field() else {
            return Some(self.encode(self.items_of(data).iter().map(RepresentValue::to_json).collect()));
        };
        let values = self
            .items_of(data)
            .into_iter()
            .map(|item| {
                item_field
                    .to_inner(&Overlay::new(data, self.name(), Some(item)))
                    .unwrap_or(Value::Null)
            })
            .collect();
        Some(self.encode(values))
    }

    fn to_represent(&self, data: &dyn FieldData) -> Option<RepresentValue> {
        data.lookup(self.name())?;
        let items = self.items_of(data);
        let Some(item_field) = self.item_field() else {
            return Some(RepresentValue::List(items));
        };
        Some(RepresentValue::List(
            items
                .into_iter()
                .map(|item| {
                    item_field
                        .to_represent(&Overlay::new(data, self.name(), Some(item)))
                        .unwrap_or(RepresentValue::Value(Value::Null))
                })
                .collect(),
        ))
    }

    fn validate_value(&self, data: &dyn FieldData) -> Result<Option<RepresentValue>, ValidationError> {
        let value = self.common.validate_constraints(data.lookup(self.name()))?;
        if value.is_none() {
            return Ok(None);
        }
        let items = self.items_of(data);
        if items.len() < self.min_items {
            return Err(ValidationError::new(
                ValidationKind::MinItems,
                format!("'{}' must contain at least {} items", self.common.title, self.min_items),
            ));
        }
        if let Some(max) = self.max_items {
            if items.len() > max {
                return Err(ValidationError::new(
                    ValidationKind::MaxItems,
                    format!("'{}' must contain at most {} items", self.common.title, max),
                ));
            }
        }
        if self.unique_items && !items.iter().map(|item| item.to_json().to_string()).all_unique() {
            return Err(ValidationError::new(
                ValidationKind::UniqueItems,
                format!("Items of '{}' must be unique", self.common.title),
            ));
        }
        let Some(item_field) = self.item_field() else {
            return Ok(Some(RepresentValue::List(items)));
        };
        let mut validated = Vec::with_capacity(items.len());
        for item in items {
            let overlay = Overlay::new(data, self.name(), Some(item));
            validated.push(
                item_field
                    .validate_value(&overlay)?
                    .unwrap_or(RepresentValue::Value(Value::Null)),
            );
        }
        Ok(Some(RepresentValue::List(validated)))
    }

    fn prepare_field_for_view(&self, path: &str) {
        if let Some(item_field) = self.item_field() {
            item_field.prepare_field_for_view(path);
        }
    }

    fn capability(&self) -> FetchCapability<'_> {
        FetchCapability::Array(self)
    }

    fn after_instances_fetched<'a>(
        &'a self,
        instances: &'a [Arc<Instance>],
        source: &'a dyn QuerySource,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let Some(item_field) = self.item_field() else {
                return Ok(());
            };
            let item_instances = self.item_instances(instances, item_field);
            let all: Vec<Arc<Instance>> = item_instances
                .iter()
                .flat_map(|(_, items)| items.iter().cloned())
                .collect();
            let result = item_field.after_instances_fetched(&all, source).await;
            self.scatter_item_values(&item_instances);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SimpleField;
    use crate::model::{InnerData, ModelClass, FieldSet};
    use serde_json::json;

    fn array(fragment: Value) -> ArrayField {
        let field = ArrayField::new(SchemaFragment::from_value(fragment).unwrap()).unwrap();
        let item = SimpleField::integer(
            SchemaFragment::from_value(json!({"name": "ids", "type": "integer"})).unwrap(),
        )
        .unwrap();
        field.set_item_field(item);
        field
    }

    fn data(value: Value) -> InnerData {
        match value {
            Value::Object(map) => map,
            _ => InnerData::new(),
        }
    }

    #[test]
    fn test_items_are_required() {
        let err = ArrayField::new(
            SchemaFragment::from_value(json!({"name": "ids", "type": "array"})).unwrap(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, FieldError::Construction { .. }));
    }

    #[test]
    fn test_collection_format_round_trip() {
        let field = array(json!({
            "name": "ids", "type": "array", "items": {"type": "integer"}, "collectionFormat": "pipes"
        }));
        let inner = data(json!({"ids": "1|2|3"}));
        let represented = field.to_represent(&inner).unwrap();
        assert_eq!(represented.to_json(), json!([1, 2, 3]));

        let mut back = crate::model::RepresentData::new();
        back.insert("ids".to_string(), represented);
        assert_eq!(field.to_inner(&back), Some(json!("1|2|3")));
        assert_eq!(field.items_of(&data(json!({"ids": ""}))).len(), 0);
    }

    #[test]
    fn test_item_count_and_uniqueness() {
        let field = array(json!({
            "name": "ids", "type": "array", "items": {"type": "integer"},
            "minItems": 1, "maxItems": 3, "uniqueItems": true
        }));
        assert_eq!(
            field.validate_value(&data(json!({"ids": []}))).unwrap_err().kind,
            ValidationKind::MinItems
        );
        assert_eq!(
            field.validate_value(&data(json!({"ids": [1, 2, 3, 4]}))).unwrap_err().kind,
            ValidationKind::MaxItems
        );
        assert_eq!(
            field.validate_value(&data(json!({"ids": [1, 1]}))).unwrap_err().kind,
            ValidationKind::UniqueItems
        );
        assert!(field.validate_value(&data(json!({"ids": [1, 2]}))).is_ok());
    }

    #[test]
    fn test_item_instances_share_parent_data() {
        let field = array(json!({"name": "ids", "type": "array", "items": {"type": "integer"}}));
        let item_field = Arc::clone(field.item_field().unwrap());
        let class = Arc::new(ModelClass::new("Order", FieldSet::default()));
        let parent = Arc::new(Instance::new(class, data(json!({"id": 9, "ids": [4, 5]}))));

        let synthesized = field.item_instances(&[Arc::clone(&parent)], &item_field);
        let items = &synthesized[0].1;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].inner_value("ids"), Some(json!(5)));
        assert_eq!(items[1].inner_value("id"), Some(json!(9)));
        assert!(items[0].data().shares_base_with(parent.data()));
        assert_eq!(items[0].class().fields().get("ids").unwrap().class_name(), "IntegerField");

        items[0].set_prefetched_value("ids", RepresentValue::Value(json!("four")));
        field.scatter_item_values(&synthesized);
        assert_eq!(
            parent.represent_value("ids").unwrap().to_json(),
            json!(["four", 5])
        );
    }
}
