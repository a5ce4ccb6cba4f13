use crate::model::{BatchKey, ModelClass};
use crate::store::QuerySource;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Wire (API) form of a record.
pub type InnerData = Map<String, Value>;

/// Display form of a record.
pub type RepresentData = BTreeMap<String, RepresentValue>;

/// A value in the represented (display/edit) space.
///
/// Relation fields replace raw keys with the records they point at, array
/// fields hold one represented value per item.
#[derive(Debug, Clone)]
pub enum RepresentValue {
    Value(Value),
    Instance(Arc<Instance>),
    List(Vec<RepresentValue>),
}

impl RepresentValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RepresentValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            RepresentValue::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RepresentValue]> {
        match self {
            RepresentValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collapse into plain JSON. Records become their inner data.
    pub fn to_json(&self) -> Value {
        match self {
            RepresentValue::Value(value) => value.clone(),
            RepresentValue::Instance(instance) => Value::Object(instance.data().to_map()),
            RepresentValue::List(items) => {
                Value::Array(items.iter().map(RepresentValue::to_json).collect())
            }
        }
    }
}

impl PartialEq for RepresentValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RepresentValue::Value(a), RepresentValue::Value(b)) => a == b,
            (RepresentValue::Instance(a), RepresentValue::Instance(b)) => {
                Arc::ptr_eq(a, b) || a.data().to_map() == b.data().to_map()
            }
            (RepresentValue::List(a), RepresentValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for RepresentValue {
    fn from(value: Value) -> Self {
        RepresentValue::Value(value)
    }
}

/// Read access to a bag of field values, whichever value space it is in.
pub trait FieldData {
    fn lookup(&self, name: &str) -> Option<RepresentValue>;
}

impl FieldData for InnerData {
    fn lookup(&self, name: &str) -> Option<RepresentValue> {
        self.get(name).cloned().map(RepresentValue::Value)
    }
}

impl FieldData for RepresentData {
    fn lookup(&self, name: &str) -> Option<RepresentValue> {
        self.get(name).cloned()
    }
}

/// One slot of `base` replaced by `value`, everything else read through.
pub struct Overlay<'a> {
    base: &'a dyn FieldData,
    name: &'a str,
    value: Option<RepresentValue>,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a dyn FieldData, name: &'a str, value: Option<RepresentValue>) -> Self {
        Self { base, name, value }
    }
}

impl FieldData for Overlay<'_> {
    fn lookup(&self, name: &str) -> Option<RepresentValue> {
        if name == self.name {
            self.value.clone()
        } else {
            self.base.lookup(name)
        }
    }
}

/// Inner data shared between a record and the synthetic records derived
/// from it. Overridden slots are stored next to the shared base instead of
/// copying the whole map.
#[derive(Debug, Clone, Default)]
pub struct DataBag {
    base: Arc<InnerData>,
    slots: Vec<(String, Value)>,
}

impl DataBag {
    pub fn new(data: InnerData) -> Self {
        Self {
            base: Arc::new(data),
            slots: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots
            .iter()
            .rev()
            .find(|(slot, _)| slot == name)
            .map(|(_, value)| value)
            .or_else(|| self.base.get(name))
    }

    /// A view sharing this bag's data with `name` replaced by `value`.
    pub fn overlay(&self, name: &str, value: Value) -> DataBag {
        let mut slots: Vec<(String, Value)> = self
            .slots
            .iter()
            .filter(|(slot, _)| slot != name)
            .cloned()
            .collect();
        slots.push((name.to_string(), value));
        DataBag {
            base: Arc::clone(&self.base),
            slots,
        }
    }

    pub fn shares_base_with(&self, other: &DataBag) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }

    pub fn to_map(&self) -> InnerData {
        let mut map = (*self.base).clone();
        for (name, value) in &self.slots {
            map.insert(name.clone(), value.clone());
        }
        map
    }
}

impl FieldData for DataBag {
    fn lookup(&self, name: &str) -> Option<RepresentValue> {
        self.get(name).cloned().map(RepresentValue::Value)
    }
}

/// A record loaded from a query source.
///
/// Holds the inner data and the represented values written by relation
/// resolution. Represented values not written explicitly are derived from the
/// inner data through the owning field set.
pub struct Instance {
    class: Arc<ModelClass>,
    data: DataBag,
    source: Option<Arc<dyn QuerySource>>,
    prefetched: RwLock<HashMap<String, RepresentValue>>,
    not_found: bool,
}

impl Instance {
    pub fn new(class: Arc<ModelClass>, data: InnerData) -> Self {
        Self::from_bag(class, DataBag::new(data))
    }

    pub fn from_bag(class: Arc<ModelClass>, data: DataBag) -> Self {
        Self {
            class,
            data,
            source: None,
            prefetched: RwLock::new(HashMap::new()),
            not_found: false,
        }
    }

    /// Placeholder shown in place of a record that could not be found.
    pub fn not_found(class: Arc<ModelClass>, data: InnerData) -> Self {
        Self {
            not_found: true,
            ..Self::new(class, data)
        }
    }

    pub fn with_source(mut self, source: Arc<dyn QuerySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn data(&self) -> &DataBag {
        &self.data
    }

    pub fn source(&self) -> Option<&Arc<dyn QuerySource>> {
        self.source.as_ref()
    }

    pub fn is_not_found(&self) -> bool {
        self.not_found
    }

    pub fn inner_value(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned()
    }

    pub fn key_value(&self, name: &str) -> Option<BatchKey> {
        self.data.get(name).and_then(BatchKey::from_value)
    }

    pub fn set_prefetched_value(&self, name: &str, value: RepresentValue) {
        self.prefetched.write().insert(name.to_string(), value);
    }

    pub fn prefetched_value(&self, name: &str) -> Option<RepresentValue> {
        self.prefetched.read().get(name).cloned()
    }

    /// Represented value of one field.
    pub fn represent_value(&self, name: &str) -> Option<RepresentValue> {
        if let Some(value) = self.prefetched_value(name) {
            return Some(value);
        }
        match self.class.fields().get(name) {
            Some(field) => field.to_represent(&self.data),
            None => self.data.lookup(name),
        }
    }

    pub fn represent_data(&self) -> RepresentData {
        self.class
            .fields()
            .iter()
            .filter_map(|field| {
                self.represent_value(field.name())
                    .map(|value| (field.name().to_string(), value))
            })
            .collect()
    }

    /// Convert the represented values back into wire form.
    pub fn to_inner_data(&self) -> InnerData {
        let represented = self.represent_data();
        let mut inner = InnerData::new();
        for field in self.class.fields().iter() {
            if let Some(value) = field.to_inner(&represented) {
                inner.insert(field.name().to_string(), value);
            }
        }
        inner
    }

    /// Synthetic record sharing this record's data, with `name` holding
    /// `value` and `class` describing its fields.
    pub fn overlay(&self, class: Arc<ModelClass>, name: &str, value: Value) -> Instance {
        Instance {
            class,
            data: self.data.overlay(name, value),
            source: self.source.clone(),
            prefetched: RwLock::new(HashMap::new()),
            not_found: false,
        }
    }
}

impl FieldData for Instance {
    fn lookup(&self, name: &str) -> Option<RepresentValue> {
        self.data.lookup(name)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("data", &self.data.to_map())
            .field("not_found", &self.not_found)
            .finish()
    }
}
