//! Keyed diff of a stored layer against freshly assembled features, and the
//! batched push of the resulting adds and updates.
//!
//! Rows only in the new set are added, rows in both are updated with the new
//! values unless their fingerprints match, and rows only in the stored set
//! are left alone (retention handles removal).

use std::collections::{HashMap, HashSet};

use billsync_shared::{BillSyncError, Result};
use billsync_storage::{
    CREATION_DATE_FIELD, EditResult, Feature, FeatureStore, OBJECT_ID_FIELD, successes,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::features::ROW_HASH_FIELD;

/// Attributes maintained by the store itself; never zero-filled. Compared
/// case-insensitively.
const STORE_MANAGED_FIELDS: &[&str] = &[
    OBJECT_ID_FIELD,
    CREATION_DATE_FIELD,
    "FID",
    "GlobalID",
    "Creator",
    "EditDate",
    "Editor",
    "Shape__Area",
    "Shape__Length",
];

/// Classified rows, before anything is sent.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub adds: Vec<Feature>,
    /// New values carrying the stored object id.
    pub updates: Vec<Feature>,
    pub unchanged: usize,
    /// Stored rows absent from the new set.
    pub untouched: usize,
    /// New rows without a usable key, or duplicates of an earlier key.
    pub skipped: usize,
}

/// Outcome of pushing one kind of edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub batches: usize,
    pub failed_batches: Vec<usize>,
}

/// Per-layer reconciliation summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub layer: String,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub untouched: usize,
    pub skipped: usize,
    pub adds: PushStats,
    pub updates: PushStats,
}

impl ReconcilePlan {
    /// Report for a plan that was not pushed.
    pub fn summary(&self, layer: &str) -> ReconcileReport {
        ReconcileReport {
            layer: layer.to_string(),
            added: self.adds.len(),
            updated: self.updates.len(),
            unchanged: self.unchanged,
            untouched: self.untouched,
            skipped: self.skipped,
            ..ReconcileReport::default()
        }
    }
}

/// Classify `new` against `old` by `key_field`.
pub fn plan(old: &[Feature], new: Vec<Feature>, key_field: &str) -> ReconcilePlan {
    let mut result = ReconcilePlan::default();

    if old.is_empty() {
        info!(rows = new.len(), "layer is empty, every row is an add");
    }

    let mut old_by_key: HashMap<String, &Feature> = HashMap::new();
    for feature in old {
        if let Some(key) = feature.key(key_field) {
            old_by_key.entry(key).or_insert(feature);
        }
    }

    let mut new_keys = HashSet::new();
    for feature in new {
        let Some(key) = feature.key(key_field) else {
            warn!(key_field, "new row without key, skipping");
            result.skipped += 1;
            continue;
        };
        if !new_keys.insert(key.clone()) {
            warn!(%key, "duplicate key in new rows, keeping the first");
            result.skipped += 1;
            continue;
        }

        match old_by_key.get(&key) {
            None => result.adds.push(feature),
            Some(stored) if same_fingerprint(stored, &feature) => result.unchanged += 1,
            Some(stored) => match stored.object_id {
                Some(object_id) => {
                    result
                        .updates
                        .push(update_payload(stored, feature, object_id));
                }
                None => {
                    warn!(%key, "stored row has no object id, cannot update");
                    result.skipped += 1;
                }
            },
        }
    }

    result.untouched = old_by_key
        .keys()
        .filter(|key| !new_keys.contains(*key))
        .count();
    result
}

fn is_store_managed(field: &str) -> bool {
    STORE_MANAGED_FIELDS
        .iter()
        .any(|managed| managed.eq_ignore_ascii_case(field))
}

fn same_fingerprint(stored: &Feature, fresh: &Feature) -> bool {
    match (stored.key(ROW_HASH_FIELD), fresh.key(ROW_HASH_FIELD)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// New values with the stored object id; gaps are filled with `0`.
///
/// Any attribute that is null on the new side, or present only on the
/// stored side, is sent as `0` because the store rejects null/type
/// mismatches in updates. This loses the stored value.
fn update_payload(stored: &Feature, mut fresh: Feature, object_id: i64) -> Feature {
    for value in fresh.attributes.values_mut() {
        if value.is_null() {
            *value = Value::from(0);
        }
    }
    for field in stored.attributes.keys() {
        if is_store_managed(field) {
            continue;
        }
        fresh
            .attributes
            .entry(field.clone())
            .or_insert_with(|| Value::from(0));
    }
    fresh.object_id = Some(object_id);
    fresh
}

#[derive(Debug, Clone, Copy)]
enum EditKind {
    Add,
    Update,
}

impl EditKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
        }
    }
}

/// Pushes a [`ReconcilePlan`] to a store in bounded batches.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    batch_size: usize,
}

impl Reconciler {
    /// `batch_size == 0` sends each kind of edit in a single call.
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Diff `old` against `new` on `key_field` and push adds, then updates.
    ///
    /// A batch call that fails is logged with its index and the remaining
    /// batches still go out; nothing is retried or rolled back.
    #[instrument(skip_all, fields(layer = %layer, old = old.len(), new = new.len()))]
    pub async fn reconcile(
        &self,
        store: &dyn FeatureStore,
        layer: &str,
        old: &[Feature],
        new: Vec<Feature>,
        key_field: &str,
    ) -> Result<ReconcileReport> {
        if key_field.is_empty() {
            return Err(BillSyncError::validation("reconcile key field is empty"));
        }

        let plan = plan(old, new, key_field);
        let mut report = plan.summary(layer);
        report.adds = self.push(store, layer, EditKind::Add, &plan.adds).await;
        report.updates = self.push(store, layer, EditKind::Update, &plan.updates).await;

        info!(
            added = report.added,
            updated = report.updated,
            unchanged = report.unchanged,
            untouched = report.untouched,
            pushed = report.adds.succeeded + report.updates.succeeded,
            attempted = report.adds.attempted + report.updates.attempted,
            failed_batches = report.adds.failed_batches.len() + report.updates.failed_batches.len(),
            "layer reconciled"
        );
        Ok(report)
    }

    async fn push(
        &self,
        store: &dyn FeatureStore,
        layer: &str,
        kind: EditKind,
        features: &[Feature],
    ) -> PushStats {
        let mut stats = PushStats {
            attempted: features.len(),
            ..PushStats::default()
        };
        let size = if self.batch_size == 0 {
            features.len().max(1)
        } else {
            self.batch_size
        };

        for (idx, batch) in features.chunks(size).enumerate() {
            stats.batches += 1;
            let outcome = match kind {
                EditKind::Add => store.add_features(layer, batch).await,
                EditKind::Update => store.update_features(layer, batch).await,
            };
            match outcome {
                Ok(results) => {
                    let passed = successes(&results);
                    stats.succeeded += passed;
                    log_rejections(kind, idx, &results);
                    info!(
                        kind = kind.as_str(),
                        batch = idx,
                        passed,
                        sent = batch.len(),
                        "edit batch pushed"
                    );
                }
                Err(e) => {
                    error!(kind = kind.as_str(), batch = idx, error = %e, "edit batch failed");
                    stats.failed_batches.push(idx);
                }
            }
        }
        stats
    }
}

fn log_rejections(kind: EditKind, batch: usize, results: &[EditResult]) {
    for result in results.iter().filter(|r| !r.success) {
        warn!(
            kind = kind.as_str(),
            batch,
            object_id = ?result.object_id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "edit rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, feature};
    use serde_json::json;

    fn stored(object_id: i64, value: Value) -> Feature {
        let mut f = feature(value);
        f.object_id = Some(object_id);
        f
    }

    #[test]
    fn old_ab_new_b_prime_c() {
        let old = vec![
            stored(1, json!({ "unique_id": "A", "title": "a" })),
            stored(2, json!({ "unique_id": "B", "title": "b" })),
        ];
        let new = vec![
            feature(json!({ "unique_id": "B", "title": "b prime" })),
            feature(json!({ "unique_id": "C", "title": "c" })),
        ];

        let plan = plan(&old, new, "unique_id");
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].key("unique_id").as_deref(), Some("C"));
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].object_id, Some(2));
        assert_eq!(plan.updates[0].get("title"), Some(&json!("b prime")));
        assert_eq!(plan.untouched, 1);
    }

    #[test]
    fn matching_fingerprints_are_unchanged() {
        let old = vec![stored(1, json!({ "unique_id": "A", "row_hash": "h1" }))];
        let new = vec![feature(json!({ "unique_id": "A", "row_hash": "h1" }))];

        let plan = plan(&old, new, "unique_id");
        assert_eq!(plan.unchanged, 1);
        assert!(plan.updates.is_empty());
        assert!(plan.adds.is_empty());
    }

    #[test]
    fn update_zero_fills_gaps_and_loses_stored_values() {
        let old = vec![stored(
            7,
            json!({
                "unique_id": "A",
                "policy_area": "Energy",
                "legacy_note": "kept upstream",
                "CreationDate": 1_700_000_000_000i64,
                "OBJECTID": 7
            }),
        )];
        let new = vec![feature(json!({ "unique_id": "A", "policy_area": null }))];

        let plan = plan(&old, new, "unique_id");
        let update = &plan.updates[0];
        assert_eq!(update.get("policy_area"), Some(&json!(0)));
        assert_eq!(update.get("legacy_note"), Some(&json!(0)));
        assert_eq!(update.get("CreationDate"), None);
        assert_eq!(update.get("OBJECTID"), None);
    }

    #[test]
    fn id_field_in_any_spelling_is_never_zero_filled() {
        let old = vec![stored(
            7,
            json!({ "unique_id": "A", "ObjectId": 7, "fid": 7, "title": "old" }),
        )];
        let new = vec![feature(json!({ "unique_id": "A", "title": "new" }))];

        let plan = plan(&old, new, "unique_id");
        let update = &plan.updates[0];
        assert_eq!(update.object_id, Some(7));
        assert_eq!(update.get("ObjectId"), None);
        assert_eq!(update.get("fid"), None);
        assert_eq!(update.get("title"), Some(&json!("new")));
    }

    #[test]
    fn rows_without_key_and_duplicates_are_skipped() {
        let new = vec![
            feature(json!({ "title": "no key" })),
            feature(json!({ "unique_id": "A", "title": "first" })),
            feature(json!({ "unique_id": "A", "title": "second" })),
        ];

        let plan = plan(&[], new, "unique_id");
        assert_eq!(plan.skipped, 2);
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].get("title"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn empty_layer_adds_everything() {
        let store = MemoryStore::default();
        let new = (0..5)
            .map(|i| feature(json!({ "unique_id": format!("K{i}") })))
            .collect();

        let report = Reconciler::new(500)
            .reconcile(&store, "members", &[], new, "unique_id")
            .await
            .unwrap();

        assert_eq!(report.added, 5);
        assert_eq!(report.adds.succeeded, 5);
        assert_eq!(report.adds.batches, 1);
        assert_eq!(store.rows("members").len(), 5);
    }

    #[tokio::test]
    async fn reconcile_pushes_update_and_add_only() {
        let store = MemoryStore::default();
        store.seed(
            "members",
            vec![
                feature(json!({ "unique_id": "A", "title": "a" })),
                feature(json!({ "unique_id": "B", "title": "b" })),
            ],
        );
        let old = store.rows("members");

        let report = Reconciler::new(500)
            .reconcile(
                &store,
                "members",
                &old,
                vec![
                    feature(json!({ "unique_id": "B", "title": "b prime" })),
                    feature(json!({ "unique_id": "C", "title": "c" })),
                ],
                "unique_id",
            )
            .await
            .unwrap();

        assert_eq!((report.added, report.updated, report.untouched), (1, 1, 1));
        assert_eq!(store.calls(), vec!["add:1", "update:1"]);

        let rows = store.rows("members");
        let title = |key: &str| {
            rows.iter()
                .find(|f| f.key("unique_id").as_deref() == Some(key))
                .and_then(|f| f.get("title").cloned())
        };
        assert_eq!(title("A"), Some(json!("a")));
        assert_eq!(title("B"), Some(json!("b prime")));
        assert_eq!(title("C"), Some(json!("c")));
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_later_batches() {
        let store = MemoryStore::default();
        store.fail_add_call(1);
        let new = (0..5)
            .map(|i| feature(json!({ "unique_id": format!("K{i}") })))
            .collect();

        let report = Reconciler::new(2)
            .reconcile(&store, "members", &[], new, "unique_id")
            .await
            .unwrap();

        assert_eq!(report.adds.batches, 3);
        assert_eq!(report.adds.failed_batches, vec![1]);
        assert_eq!(report.adds.attempted, 5);
        assert_eq!(report.adds.succeeded, 3);
    }

    #[tokio::test]
    async fn zero_batch_size_sends_one_call() {
        let store = MemoryStore::default();
        let new = (0..7)
            .map(|i| feature(json!({ "unique_id": format!("K{i}") })))
            .collect();

        let report = Reconciler::new(0)
            .reconcile(&store, "members", &[], new, "unique_id")
            .await
            .unwrap();
        assert_eq!(report.adds.batches, 1);
        assert_eq!(store.calls(), vec!["add:7"]);
    }

    #[tokio::test]
    async fn nothing_to_push_makes_no_calls() {
        let store = MemoryStore::default();
        let report = Reconciler::new(500)
            .reconcile(&store, "members", &[], Vec::new(), "unique_id")
            .await
            .unwrap();
        assert_eq!(report.adds.batches, 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_key_field_is_rejected() {
        let store = MemoryStore::default();
        let err = Reconciler::new(500)
            .reconcile(&store, "members", &[], Vec::new(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, BillSyncError::Validation { .. }));
    }
}
