//! Retention pruning of stored rows by a date attribute.

use billsync_shared::{Result, date_to_epoch_millis, parse_api_date};
use billsync_storage::{Feature, FeatureStore, successes};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub layer: String,
    pub cutoff_ms: i64,
    pub selected: usize,
    pub deleted: usize,
}

/// Epoch milliseconds of a stored date; numbers are taken as-is, strings
/// may be numeric or an API date.
fn date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| parse_api_date(s).map(date_to_epoch_millis)),
        _ => None,
    }
}

/// Object ids of rows whose `date_field` is strictly before `cutoff_ms`.
///
/// Rows with no object id or no readable date are never selected.
pub fn select_expired(existing: &[Feature], date_field: &str, cutoff_ms: i64) -> Vec<i64> {
    existing
        .iter()
        .filter(|f| {
            f.get(date_field)
                .and_then(date_millis)
                .is_some_and(|ms| ms < cutoff_ms)
        })
        .filter_map(|f| f.object_id)
        .collect()
}

/// Delete rows of `layer` older than `max_age` as of `now`, in one call.
#[instrument(skip(store, existing), fields(rows = existing.len()))]
pub async fn prune(
    store: &dyn FeatureStore,
    layer: &str,
    existing: &[Feature],
    date_field: &str,
    max_age: TimeDelta,
    now: DateTime<Utc>,
) -> Result<PruneReport> {
    let cutoff_ms = (now - max_age).timestamp_millis();
    let expired = select_expired(existing, date_field, cutoff_ms);

    let mut report = PruneReport {
        layer: layer.to_string(),
        cutoff_ms,
        selected: expired.len(),
        deleted: 0,
    };

    if expired.is_empty() {
        info!(layer, "nothing older than retention cutoff");
        return Ok(report);
    }

    let results = store.delete_features(layer, &expired).await?;
    report.deleted = successes(&results);
    info!(
        layer,
        selected = report.selected,
        deleted = report.deleted,
        "expired rows deleted"
    );
    Ok(report)
}
