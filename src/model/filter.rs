use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Logical filter applied to a query source.
///
/// Parameter values are scalars; a string holding comma separated values
/// means "one of". Encoding into a query string is the transport's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parameters of `other` override ours; its limit wins when set.
    pub fn merge(&self, other: &QueryFilter) -> QueryFilter {
        let mut params = self.params.clone();
        params.extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        QueryFilter {
            params,
            limit: other.limit.or(self.limit),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.limit.is_none()
    }
}

impl From<BTreeMap<String, Value>> for QueryFilter {
    fn from(params: BTreeMap<String, Value>) -> Self {
        Self {
            params,
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overrides_params_and_limit() {
        let base = QueryFilter::new().param("category", 1).param("active", true).limit(10);
        let extra = QueryFilter::new().param("category", 2).limit(3);
        let merged = base.merge(&extra);

        assert_eq!(merged.get("category"), Some(&json!(2)));
        assert_eq!(merged.get("active"), Some(&json!(true)));
        assert_eq!(merged.limit, Some(3));
    }

    #[test]
    fn test_serializes_flat() {
        let filter = QueryFilter::new().param("id", "1,2,3").limit(3);
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"id": "1,2,3", "limit": 3})
        );
    }
}
