//! Feature records and the [`FeatureStore`] seam.
//!
//! A feature is a flat attribute map plus an optional opaque geometry, the
//! shape shared by hosted feature layers and the local libSQL layers.

use async_trait::async_trait;
use billsync_shared::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute set by the store when a feature is first added (epoch ms).
pub const CREATION_DATE_FIELD: &str = "CreationDate";

/// Object id attribute name used on the wire.
pub const OBJECT_ID_FIELD: &str = "OBJECTID";

pub type Attributes = serde_json::Map<String, Value>;

/// One row of a feature layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Store-assigned id; `None` until the feature has been added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<i64>,
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

impl Feature {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            object_id: None,
            attributes,
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Option<Value>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field).filter(|v| !v.is_null())
    }

    /// String form of `field` for keying; numbers are rendered, blanks are `None`.
    pub fn key(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Per-row outcome of an add, update or delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    pub object_id: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
}

impl EditResult {
    pub fn ok(object_id: i64) -> Self {
        Self {
            object_id: Some(object_id),
            success: true,
            error: None,
        }
    }

    pub fn failed(object_id: Option<i64>, error: impl Into<String>) -> Self {
        Self {
            object_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Count of successful rows in a batch response.
pub fn successes(results: &[EditResult]) -> usize {
    results.iter().filter(|r| r.success).count()
}

/// A feature-layer store addressed by layer name or URL.
///
/// An `Err` means the whole call failed; row-level rejections come back as
/// unsuccessful [`EditResult`]s.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Every feature in `layer`.
    async fn query(&self, layer: &str) -> Result<Vec<Feature>>;

    async fn add_features(&self, layer: &str, features: &[Feature]) -> Result<Vec<EditResult>>;

    /// Update by `object_id`; only the supplied attributes change.
    async fn update_features(&self, layer: &str, features: &[Feature])
    -> Result<Vec<EditResult>>;

    async fn delete_features(&self, layer: &str, object_ids: &[i64]) -> Result<Vec<EditResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(value: Value) -> Feature {
        let Value::Object(attributes) = value else {
            panic!("attributes must be an object");
        };
        Feature::new(attributes)
    }

    #[test]
    fn key_renders_strings_and_numbers() {
        let f = feature(json!({ "unique_id": "A1", "count": 7, "blank": "", "nothing": null }));
        assert_eq!(f.key("unique_id").as_deref(), Some("A1"));
        assert_eq!(f.key("count").as_deref(), Some("7"));
        assert_eq!(f.key("blank"), None);
        assert_eq!(f.key("nothing"), None);
        assert_eq!(f.key("absent"), None);
    }

    #[test]
    fn successes_counts_only_successful_rows() {
        let results = vec![
            EditResult::ok(1),
            EditResult::failed(Some(2), "rejected"),
            EditResult::ok(3),
        ];
        assert_eq!(successes(&results), 2);
    }
}
