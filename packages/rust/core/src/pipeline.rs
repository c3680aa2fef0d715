//! End-to-end sync: collect → resolve → assemble → filter → join →
//! reconcile members and bills → prune.

use std::collections::HashSet;
use std::time::Instant;

use billsync_govinfo::GovInfoClient;
use billsync_shared::{
    AppConfig, BillTypeConfig, Dataset, FilterConfig, Result, RunId, TimeWindow,
};
use billsync_storage::{CREATION_DATE_FIELD, Feature, FeatureStore, Storage};
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::assembler::{assemble, bill_rows, dedupe_unique_ids};
use crate::features::{BILL_KEY_FIELD, MEMBER_KEY_FIELD, bill_feature, member_feature};
use crate::filter::KeywordFilter;
use crate::geo::StateTable;
use crate::reconcile::{ReconcileReport, Reconciler, plan};
use crate::retention::{PruneReport, prune};

/// Settings for one [`run_sync`] call.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub days_back: u32,
    /// Read the store and report what would change, but write nothing.
    pub dry_run: bool,
    /// `0` disables pruning.
    pub retention_days: u32,
    pub concurrency: usize,
    pub edit_batch_size: usize,
    pub members_layer: String,
    pub bills_layer: String,
    /// `None` uses the built-in state table.
    pub states_layer: Option<String>,
    pub bill_types: Vec<BillTypeConfig>,
    pub filter: FilterConfig,
}

impl SyncOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let states_layer = Some(config.store.states_layer.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            days_back: config.sync.days_back,
            dry_run: false,
            retention_days: config.sync.retention_days,
            concurrency: config.api.concurrency as usize,
            edit_batch_size: config.store.edit_batch_size,
            members_layer: config.store.members_layer.clone(),
            bills_layer: config.store.bills_layer.clone(),
            states_layer,
            bill_types: config.bill_types.clone(),
            filter: config.filter.clone(),
        }
    }
}

/// Summary of a run, also stored in the run ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub since: String,
    pub dry_run: bool,
    /// Bill types whose collection fetch failed and counted as empty.
    pub classes_failed: Vec<String>,
    pub packages_found: usize,
    pub packages_resolved: usize,
    pub packages_skipped: usize,
    pub rows_assembled: usize,
    pub rows_kept: usize,
    pub rows_joined: usize,
    pub members: Option<ReconcileReport>,
    pub bills: Option<ReconcileReport>,
    pub pruned: Vec<PruneReport>,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each package detail is resolved or skipped.
    fn package_resolved(&self, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &SyncReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn package_resolved(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &SyncReport) {}
}

/// Run the full sync.
///
/// 1. Collect package summaries per bill type (a failed type counts as empty)
/// 2. Resolve details and status documents with bounded concurrency
/// 3. Assemble, dedupe, keyword-filter and state-join the rows
/// 4. Reconcile the members layer, then the bills table
/// 5. Prune rows past retention
///
/// When `ledger` is given, the run is recorded there whether it succeeds
/// or not.
#[instrument(skip_all, fields(days_back = options.days_back, dry_run = options.dry_run))]
pub async fn run_sync(
    client: &GovInfoClient,
    store: &dyn FeatureStore,
    ledger: Option<&Storage>,
    options: &SyncOptions,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    let start = Instant::now();
    let run_id = RunId::new();
    let filter = KeywordFilter::from_config(&options.filter)?;

    if let Some(ledger) = ledger {
        ledger.insert_sync_run(&run_id, options.dry_run).await?;
    }
    info!(%run_id, "starting sync");

    let result = sync(client, store, filter.as_ref(), options, progress, &run_id).await;
    let result = result.map(|mut report| {
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    });

    if let Some(ledger) = ledger {
        let stats = match &result {
            Ok(report) => serde_json::to_string(report).unwrap_or_default(),
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        };
        if let Err(e) = ledger.finish_sync_run(&run_id, &stats).await {
            warn!(%run_id, error = %e, "failed to record sync run");
        }
    }

    if let Ok(report) = &result {
        info!(
            %run_id,
            elapsed_ms = report.elapsed_ms,
            rows = report.rows_joined,
            "sync complete"
        );
        progress.done(report);
    }
    result
}

async fn sync(
    client: &GovInfoClient,
    store: &dyn FeatureStore,
    filter: Option<&KeywordFilter>,
    options: &SyncOptions,
    progress: &dyn ProgressReporter,
    run_id: &RunId,
) -> Result<SyncReport> {
    let window = TimeWindow::days_back(options.days_back);
    let mut report = SyncReport {
        run_id: run_id.to_string(),
        since: window.query_param(),
        dry_run: options.dry_run,
        ..SyncReport::default()
    };

    progress.phase("Loading state table");
    let states = load_states(store, options.states_layer.as_deref()).await?;

    let mut dataset = Dataset::default();
    for bill_type in &options.bill_types {
        progress.phase(&format!("Collecting {}", bill_type.label));
        let summaries = match client.fetch_collection(&bill_type.code, &window).await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!(
                    doc_class = %bill_type.code,
                    error = %e,
                    "collection fetch failed, treating as empty"
                );
                report.classes_failed.push(bill_type.code.clone());
                continue;
            }
        };
        report.packages_found += summaries.len();

        let outcome = client
            .resolve_all(&summaries, options.concurrency, |done, total| {
                progress.package_resolved(done, total)
            })
            .await;
        report.packages_resolved += outcome.packages.len();
        report.packages_skipped += outcome.skipped.len();

        dataset.extend(assemble(&outcome.packages, &bill_type.label, &window));
    }
    report.rows_assembled = dataset.len();

    let dataset = dedupe_unique_ids(dataset);
    let dataset = match filter {
        Some(filter) => filter.apply(dataset),
        None => dataset,
    };
    report.rows_kept = dataset.len();

    let mut seen_bills = HashSet::new();
    let bills: Vec<Feature> = bill_rows(&dataset, &mut seen_bills)
        .into_iter()
        .map(bill_feature)
        .collect();

    let joined = states.join(dataset);
    report.rows_joined = joined.len();
    let members: Vec<Feature> = joined.iter().map(member_feature).collect();

    let reconciler = Reconciler::new(options.edit_batch_size);
    progress.phase("Reconciling members");
    report.members = Some(
        sync_layer(
            store,
            &reconciler,
            &options.members_layer,
            members,
            MEMBER_KEY_FIELD,
            options.dry_run,
        )
        .await?,
    );
    progress.phase("Reconciling bills");
    report.bills = Some(
        sync_layer(
            store,
            &reconciler,
            &options.bills_layer,
            bills,
            BILL_KEY_FIELD,
            options.dry_run,
        )
        .await?,
    );

    if options.dry_run || options.retention_days == 0 {
        return Ok(report);
    }

    progress.phase("Pruning expired rows");
    let max_age = TimeDelta::days(i64::from(options.retention_days));
    for layer in [&options.members_layer, &options.bills_layer] {
        match prune_layer(store, layer, max_age).await {
            Ok(pruned) => report.pruned.push(pruned),
            Err(e) => warn!(%layer, error = %e, "retention prune failed"),
        }
    }

    Ok(report)
}

/// States from the configured layer, or the built-in table.
async fn load_states(store: &dyn FeatureStore, layer: Option<&str>) -> Result<StateTable> {
    let Some(layer) = layer else {
        return Ok(StateTable::builtin());
    };
    let table = StateTable::from_features(&store.query(layer).await?);
    if table.is_empty() {
        warn!(%layer, "states layer has no usable rows, using built-in table");
        return Ok(StateTable::builtin());
    }
    info!(%layer, states = table.len(), "state table loaded");
    Ok(table)
}

async fn sync_layer(
    store: &dyn FeatureStore,
    reconciler: &Reconciler,
    layer: &str,
    rows: Vec<Feature>,
    key_field: &str,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let existing = store.query(layer).await?;
    if dry_run {
        let summary = plan(&existing, rows, key_field).summary(layer);
        info!(
            %layer,
            would_add = summary.added,
            would_update = summary.updated,
            unchanged = summary.unchanged,
            "dry run, nothing pushed"
        );
        return Ok(summary);
    }
    reconciler
        .reconcile(store, layer, &existing, rows, key_field)
        .await
}

async fn prune_layer(
    store: &dyn FeatureStore,
    layer: &str,
    max_age: TimeDelta,
) -> Result<PruneReport> {
    let existing = store.query(layer).await?;
    prune(store, layer, &existing, CREATION_DATE_FIELD, max_age, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, fixture};
    use billsync_govinfo::ClientOptions;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GovInfoClient {
        GovInfoClient::new(ClientOptions {
            base_url: server.uri(),
            collection: "BILLS".into(),
            api_key: "test-key".into(),
            congress: 118,
            page_size: 100,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn options(codes: &[&str]) -> SyncOptions {
        SyncOptions {
            days_back: 3,
            dry_run: false,
            retention_days: 30,
            concurrency: 2,
            edit_batch_size: 500,
            members_layer: "members".into(),
            bills_layer: "bills".into(),
            states_layer: None,
            bill_types: codes
                .iter()
                .map(|code| BillTypeConfig {
                    code: (*code).into(),
                    label: format!("{code} label"),
                })
                .collect(),
            filter: FilterConfig::default(),
        }
    }

    async fn test_ledger() -> Storage {
        let tmp = std::env::temp_dir().join(format!("billsync_pipeline_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    /// Status document with today's latest action so it lands inside the window.
    fn status_xml() -> String {
        fixture("xml/bill_status.xml").replace(
            "<actionDate>2024-03-02</actionDate>",
            &format!("<actionDate>{}</actionDate>", Utc::now().date_naive()),
        )
    }

    async fn mount_collection(server: &MockServer, doc_class: &str, ids: &[&str]) {
        let packages: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "packageId": id,
                    "packageLink": format!("{}/packages/{id}/summary", server.uri()),
                    "docClass": doc_class,
                    "title": format!("Title of {id}"),
                    "dateIssued": "2024-03-01"
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path_regex("^/BILLS/.+"))
            .and(query_param("docClass", doc_class))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": ids.len(),
                "packages": packages,
                "nextPage": null
            })))
            .mount(server)
            .await;
    }

    async fn mount_good_package(server: &MockServer, id: &str) {
        let detail = fixture("json/package_detail.json")
            .replace("{{SERVER}}", &server.uri())
            .replace("{{PACKAGE_ID}}", id);
        Mock::given(method("GET"))
            .and(path(format!("/packages/{id}/summary")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(detail, "application/json"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/status/{id}.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(status_xml(), "application/xml"))
            .mount(server)
            .await;
    }

    async fn mount_package_without_status_link(server: &MockServer, id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/packages/{id}/summary")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "A bill",
                "packageId": id,
                "billNumber": "99",
                "download": { "pdfLink": "https://example.test/x.pdf" }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn one_bad_package_leaves_the_other_synced() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is", "BILLS-118s99is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;
        mount_package_without_status_link(&server, "BILLS-118s99is").await;

        let store = MemoryStore::default();
        let ledger = test_ledger().await;
        let report = run_sync(
            &client_for(&server),
            &store,
            Some(&ledger),
            &options(&["s"]),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.packages_found, 2);
        assert_eq!(report.packages_resolved, 1);
        assert_eq!(report.packages_skipped, 1);
        assert_eq!(report.rows_joined, 3);

        let members = store.rows("members");
        assert_eq!(members.len(), 3);
        assert!(members
            .iter()
            .all(|f| f.key("package_id").as_deref() == Some("BILLS-118s1234is")));
        assert_eq!(store.rows("bills").len(), 1);

        let runs = ledger.list_sync_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("\"packages_resolved\":1"));
    }

    #[tokio::test]
    async fn failing_class_is_isolated() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;

        Mock::given(method("GET"))
            .and(path_regex("^/BILLS/.+"))
            .and(query_param("docClass", "hr"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = MemoryStore::default();
        let report = run_sync(
            &client_for(&server),
            &store,
            None,
            &options(&["hr", "s"]),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.classes_failed, vec!["hr"]);
        assert_eq!(report.packages_resolved, 1);
        assert_eq!(store.rows("members").len(), 3);
    }

    #[tokio::test]
    async fn second_run_with_same_data_changes_nothing() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;

        let store = MemoryStore::default();
        let client = client_for(&server);
        let opts = options(&["s"]);

        run_sync(&client, &store, None, &opts, &SilentProgress)
            .await
            .unwrap();
        let second = run_sync(&client, &store, None, &opts, &SilentProgress)
            .await
            .unwrap();

        let members = second.members.unwrap();
        assert_eq!(members.added, 0);
        assert_eq!(members.updated, 0);
        assert_eq!(members.unchanged, 3);
        assert_eq!(store.rows("members").len(), 3);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;

        let store = MemoryStore::default();
        let ledger = test_ledger().await;
        let mut opts = options(&["s"]);
        opts.dry_run = true;

        let report = run_sync(&client_for(&server), &store, Some(&ledger), &opts, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.members.unwrap().added, 3);
        assert!(store.calls().is_empty());
        assert!(ledger.list_sync_runs(1).await.unwrap()[0].dry_run);
    }

    #[tokio::test]
    async fn keyword_filter_drops_non_matching_bills() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;

        let store = MemoryStore::default();
        let mut opts = options(&["s"]);
        opts.filter = FilterConfig {
            enabled: true,
            categories: vec![billsync_shared::CategoryConfig {
                name: "Health".into(),
                keywords: vec!["medicare".into()],
            }],
        };

        let report = run_sync(&client_for(&server), &store, None, &opts, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.rows_assembled, 3);
        assert_eq!(report.rows_kept, 0);
        assert!(store.rows("members").is_empty());
    }

    #[tokio::test]
    async fn retention_prunes_old_rows_after_sync() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &[]).await;

        let store = MemoryStore::default();
        let old_ms = (Utc::now() - TimeDelta::days(90)).timestamp_millis();
        store.seed(
            "members",
            vec![crate::test_support::feature(
                json!({ "unique_id": "OLD", "CreationDate": old_ms }),
            )],
        );

        let report = run_sync(&client_for(&server), &store, None, &options(&["s"]), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.pruned.len(), 2);
        assert_eq!(report.pruned[0].deleted, 1);
        assert!(store.rows("members").is_empty());
    }

    #[tokio::test]
    async fn states_layer_drives_the_join() {
        let server = MockServer::start().await;
        mount_collection(&server, "s", &["BILLS-118s1234is"]).await;
        mount_good_package(&server, "BILLS-118s1234is").await;

        let store = MemoryStore::default();
        store.seed(
            "states",
            vec![crate::test_support::feature(
                json!({ "STATE_ABBR": "NY", "STATE_NAME": "New York" }),
            )],
        );
        let mut opts = options(&["s"]);
        opts.states_layer = Some("states".into());

        let report = run_sync(&client_for(&server), &store, None, &opts, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.rows_kept, 3);
        assert_eq!(report.rows_joined, 1);
    }

    #[test]
    fn options_from_default_config() {
        let opts = SyncOptions::from_config(&AppConfig::default());
        assert_eq!(opts.days_back, 3);
        assert_eq!(opts.retention_days, 30);
        assert_eq!(opts.edit_batch_size, 500);
        assert_eq!(opts.states_layer, None);
        assert_eq!(opts.bill_types.len(), 8);
        assert!(!opts.dry_run);
    }
}
