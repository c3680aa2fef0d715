//! SQL migration definitions for the billsync database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sync_runs",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per pipeline run
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    dry_run     INTEGER NOT NULL DEFAULT 0,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Local feature layers",
            sql: r#"
CREATE TABLE IF NOT EXISTS features (
    object_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    layer           TEXT NOT NULL,
    attributes_json TEXT NOT NULL,
    geometry_json   TEXT,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_features_layer ON features(layer);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
