//! Hosted feature-service backend.
//!
//! Layers are addressed by their REST URL (`.../FeatureServer/0`). Reads use
//! `query` with result paging; adds and updates go through `applyEdits`;
//! deletes use `deleteFeatures`. The session token is issued elsewhere and
//! passed in as-is.
//!
//! Each layer names its own object-id field (`OBJECTID`, `FID`, ...). The
//! name reported by `query` is remembered per layer and used to key updates;
//! the id itself travels in [`Feature::object_id`], not in the attributes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use billsync_shared::{BillSyncError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::feature::{EditResult, Feature, FeatureStore, OBJECT_ID_FIELD};

const USER_AGENT: &str = concat!("billsync/", env!("CARGO_PKG_VERSION"));

/// Safety stop for `query` paging.
const MAX_QUERY_PAGES: usize = 10_000;

fn store_err(e: impl std::fmt::Display) -> BillSyncError {
    BillSyncError::Store(e.to_string())
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    code: Option<i64>,
    message: Option<String>,
    description: Option<String>,
}

impl ServiceError {
    fn text(&self) -> String {
        let message = self
            .message
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("unknown error");
        match self.code {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    object_id_field_name: Option<String>,
    #[serde(default)]
    features: Vec<WireFeature>,
    #[serde(default)]
    exceeded_transfer_limit: bool,
}

#[derive(Debug, Deserialize)]
struct WireFeature {
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    geometry: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditsResponse {
    #[serde(default)]
    add_results: Vec<WireEditResult>,
    #[serde(default)]
    update_results: Vec<WireEditResult>,
    #[serde(default)]
    delete_results: Vec<WireEditResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEditResult {
    object_id: Option<i64>,
    #[serde(default)]
    success: bool,
    error: Option<ServiceError>,
}

impl From<WireEditResult> for EditResult {
    fn from(wire: WireEditResult) -> Self {
        EditResult {
            object_id: wire.object_id,
            success: wire.success,
            error: wire.error.map(|e| e.text()),
        }
    }
}

/// [`FeatureStore`] over a hosted feature service.
pub struct ArcGisStore {
    client: Client,
    token: Option<String>,
    /// Layer URL → object-id field name, filled by `query`.
    id_fields: Mutex<HashMap<String, String>>,
}

impl ArcGisStore {
    pub fn new(token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BillSyncError::Store(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: token.filter(|t| !t.is_empty()),
            id_fields: Mutex::new(HashMap::new()),
        })
    }

    fn layer_key(layer: &str) -> String {
        layer.trim_end_matches('/').to_string()
    }

    fn remember_id_field(&self, layer: &str, field: &str) {
        if let Ok(mut fields) = self.id_fields.lock() {
            fields.insert(Self::layer_key(layer), field.to_string());
        }
    }

    /// Object-id field of `layer`; `OBJECTID` until a query says otherwise.
    fn id_field(&self, layer: &str) -> String {
        self.id_fields
            .lock()
            .ok()
            .and_then(|fields| fields.get(&Self::layer_key(layer)).cloned())
            .unwrap_or_else(|| OBJECT_ID_FIELD.to_string())
    }

    fn endpoint(layer: &str, op: &str) -> String {
        format!("{}/{op}", layer.trim_end_matches('/'))
    }

    fn with_token<'a>(&self, mut form: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
        form.push(("f", "json".into()));
        if let Some(token) = &self.token {
            form.push(("token", token.clone()));
        }
        form
    }

    /// Services report failures as HTTP 200 with an `error` body.
    async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(BillSyncError::Store(format!("{url}: HTTP {status}")));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| BillSyncError::Store(format!("{url}: unexpected response: {e}")))?;

        if let Some(error) = body.get("error") {
            let error: ServiceError = serde_json::from_value(error.clone()).map_err(store_err)?;
            return Err(BillSyncError::Store(format!("{url}: {}", error.text())));
        }
        serde_json::from_value(body)
            .map_err(|e| BillSyncError::Store(format!("{url}: unexpected response: {e}")))
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, form: Vec<(&str, String)>) -> Result<T> {
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .form(&self.with_token(form))
            .send()
            .await
            .map_err(|e| BillSyncError::Store(format!("{url}: {e}")))?;
        Self::decode(url, response).await
    }

    async fn apply_edits(
        &self,
        layer: &str,
        kind: &'static str,
        payload: Vec<Value>,
    ) -> Result<EditsResponse> {
        let url = Self::endpoint(layer, "applyEdits");
        let body = serde_json::to_string(&payload).map_err(store_err)?;
        self.post(&url, vec![(kind, body)]).await
    }
}

/// Wire form of `feature`; `id_field` set means an update keyed on that field.
fn wire_feature(feature: &Feature, id_field: Option<&str>) -> Value {
    let mut attributes = feature.attributes.clone();
    attributes.remove(OBJECT_ID_FIELD);
    if let Some(id_field) = id_field {
        attributes.remove(id_field);
        if let Some(object_id) = feature.object_id {
            attributes.insert(id_field.into(), object_id.into());
        }
    }

    let mut wire = serde_json::Map::new();
    wire.insert("attributes".into(), Value::Object(attributes));
    if let Some(geometry) = &feature.geometry {
        wire.insert("geometry".into(), geometry.clone());
    }
    Value::Object(wire)
}

#[async_trait]
impl FeatureStore for ArcGisStore {
    #[instrument(skip(self))]
    async fn query(&self, layer: &str) -> Result<Vec<Feature>> {
        let url = Self::endpoint(layer, "query");
        let mut features = Vec::new();

        for _ in 0..MAX_QUERY_PAGES {
            let form = vec![
                ("where", "1=1".to_string()),
                ("outFields", "*".to_string()),
                ("returnGeometry", "true".to_string()),
                ("resultOffset", features.len().to_string()),
            ];
            let page: QueryResponse = self.post(&url, form).await?;
            let id_field = page
                .object_id_field_name
                .unwrap_or_else(|| OBJECT_ID_FIELD.to_string());
            self.remember_id_field(layer, &id_field);

            let received = page.features.len();
            for mut wire in page.features {
                let object_id = wire.attributes.remove(&id_field).and_then(|v| v.as_i64());
                features.push(Feature {
                    object_id,
                    attributes: wire.attributes,
                    geometry: wire.geometry,
                });
            }

            if !page.exceeded_transfer_limit || received == 0 {
                return Ok(features);
            }
        }

        Err(BillSyncError::Store(format!(
            "{url}: query paging did not terminate"
        )))
    }

    async fn add_features(&self, layer: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        let payload = features.iter().map(|f| wire_feature(f, None)).collect();
        let response = self.apply_edits(layer, "adds", payload).await?;
        Ok(response.add_results.into_iter().map(Into::into).collect())
    }

    async fn update_features(&self, layer: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        let id_field = self.id_field(layer);
        let payload = features
            .iter()
            .map(|f| wire_feature(f, Some(id_field.as_str())))
            .collect();
        let response = self.apply_edits(layer, "updates", payload).await?;
        Ok(response.update_results.into_iter().map(Into::into).collect())
    }

    async fn delete_features(&self, layer: &str, object_ids: &[i64]) -> Result<Vec<EditResult>> {
        let url = Self::endpoint(layer, "deleteFeatures");
        let ids = object_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let response: EditsResponse = self.post(&url, vec![("objectIds", ids)]).await?;
        Ok(response.delete_results.into_iter().map(Into::into).collect())
    }
}
