//! Storage for billsync: the local libSQL database and feature-store backends.
//!
//! The [`Storage`] struct wraps a libSQL database holding the sync run
//! ledger and, for the `local` backend, the feature layers themselves.
//! [`ArcGisStore`] talks to a hosted feature service instead. Both implement
//! [`FeatureStore`].
//!
//! **Access rules:**
//! - `billsync run`: read-write via [`Storage::open`]
//! - `billsync history`: read-only via [`Storage::open_readonly`]

pub mod arcgis;
pub mod feature;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use billsync_shared::{BillSyncError, Result, RunId};
use chrono::Utc;
use libsql::{Connection, Database, params};

pub use arcgis::ArcGisStore;
pub use feature::{
    Attributes, CREATION_DATE_FIELD, EditResult, Feature, FeatureStore, OBJECT_ID_FIELD,
    successes,
};

fn storage_err(e: impl std::fmt::Display) -> BillSyncError {
    BillSyncError::Storage(e.to_string())
}

/// One row of the `sync_runs` ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub dry_run: bool,
    pub stats_json: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    /// Must outlive `conn`; never read directly.
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BillSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BillSyncError::Storage(format!(
                "no database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BillSyncError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BillSyncError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sync run ledger
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_sync_run(&self, id: &RunId, dry_run: bool) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, started_at, dry_run) VALUES (?1, ?2, ?3)",
                params![id.to_string(), now.as_str(), i64::from(dry_run)],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Stamp a run as finished with its serialized report.
    pub async fn finish_sync_run(&self, id: &RunId, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        if affected == 0 {
            return Err(BillSyncError::Storage(format!("unknown sync run {id}")));
        }
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_sync_runs(&self, limit: u32) -> Result<Vec<SyncRunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, dry_run, stats_json
                 FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(SyncRunRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                started_at: row.get::<String>(1).map_err(storage_err)?,
                finished_at: row.get::<String>(2).ok(),
                dry_run: row.get::<i64>(3).map_err(storage_err)? != 0,
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Local feature layers
    // -----------------------------------------------------------------------

    async fn load_attributes(&self, layer: &str, object_id: i64) -> Result<Option<Attributes>> {
        let mut rows = self
            .conn
            .query(
                "SELECT attributes_json FROM features WHERE layer = ?1 AND object_id = ?2",
                params![layer, object_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let json: String = row.get(0).map_err(storage_err)?;
                Ok(Some(parse_attributes(&json)?))
            }
            None => Ok(None),
        }
    }
}

fn parse_attributes(json: &str) -> Result<Attributes> {
    serde_json::from_str(json)
        .map_err(|e| BillSyncError::Storage(format!("corrupt attributes_json: {e}")))
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(storage_err)
}

#[async_trait]
impl FeatureStore for Storage {
    async fn query(&self, layer: &str) -> Result<Vec<Feature>> {
        let mut rows = self
            .conn
            .query(
                "SELECT object_id, attributes_json, geometry_json
                 FROM features WHERE layer = ?1 ORDER BY object_id",
                params![layer],
            )
            .await
            .map_err(storage_err)?;

        let mut features = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let object_id: i64 = row.get(0).map_err(storage_err)?;
            let mut attributes = parse_attributes(&row.get::<String>(1).map_err(storage_err)?)?;
            attributes.insert(OBJECT_ID_FIELD.into(), object_id.into());
            let geometry = row
                .get::<String>(2)
                .ok()
                .map(|g| serde_json::from_str(&g))
                .transpose()
                .map_err(|e| BillSyncError::Storage(format!("corrupt geometry_json: {e}")))?;

            features.push(Feature {
                object_id: Some(object_id),
                attributes,
                geometry,
            });
        }
        Ok(features)
    }

    /// Stamps [`CREATION_DATE_FIELD`] unless the caller already set it.
    async fn add_features(&self, layer: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        self.check_writable()?;
        let now_ms = Utc::now().timestamp_millis();

        let mut results = Vec::with_capacity(features.len());
        for feature in features {
            let mut attributes = feature.attributes.clone();
            attributes.remove(OBJECT_ID_FIELD);
            let created_at = match attributes.get(CREATION_DATE_FIELD).and_then(|v| v.as_i64()) {
                Some(ms) => ms,
                None => {
                    attributes.insert(CREATION_DATE_FIELD.into(), now_ms.into());
                    now_ms
                }
            };
            let geometry = feature.geometry.as_ref().map(to_json).transpose()?;

            self.conn
                .execute(
                    "INSERT INTO features (layer, attributes_json, geometry_json, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![layer, to_json(&attributes)?, geometry, created_at],
                )
                .await
                .map_err(storage_err)?;
            results.push(EditResult::ok(self.conn.last_insert_rowid()));
        }
        Ok(results)
    }

    async fn update_features(&self, layer: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        self.check_writable()?;

        let mut results = Vec::with_capacity(features.len());
        for feature in features {
            let Some(object_id) = feature.object_id else {
                results.push(EditResult::failed(None, "update without object id"));
                continue;
            };
            let Some(mut attributes) = self.load_attributes(layer, object_id).await? else {
                results.push(EditResult::failed(Some(object_id), "no such feature"));
                continue;
            };

            for (field, value) in &feature.attributes {
                if field != OBJECT_ID_FIELD {
                    attributes.insert(field.clone(), value.clone());
                }
            }

            match &feature.geometry {
                Some(geometry) => {
                    self.conn
                        .execute(
                            "UPDATE features SET attributes_json = ?1, geometry_json = ?2
                             WHERE layer = ?3 AND object_id = ?4",
                            params![to_json(&attributes)?, to_json(geometry)?, layer, object_id],
                        )
                        .await
                        .map_err(storage_err)?;
                }
                None => {
                    self.conn
                        .execute(
                            "UPDATE features SET attributes_json = ?1
                             WHERE layer = ?2 AND object_id = ?3",
                            params![to_json(&attributes)?, layer, object_id],
                        )
                        .await
                        .map_err(storage_err)?;
                }
            }
            results.push(EditResult::ok(object_id));
        }
        Ok(results)
    }

    async fn delete_features(&self, layer: &str, object_ids: &[i64]) -> Result<Vec<EditResult>> {
        self.check_writable()?;

        let mut results = Vec::with_capacity(object_ids.len());
        for &object_id in object_ids {
            let affected = self
                .conn
                .execute(
                    "DELETE FROM features WHERE layer = ?1 AND object_id = ?2",
                    params![layer, object_id],
                )
                .await
                .map_err(storage_err)?;
            results.push(if affected > 0 {
                EditResult::ok(object_id)
            } else {
                EditResult::failed(Some(object_id), "no such feature")
            });
        }
        Ok(results)
    }
}
