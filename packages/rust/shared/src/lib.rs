//! Shared types, error model, and configuration for billsync.
//!
//! This crate is the foundation depended on by all other billsync crates.
//! It provides:
//! - [`BillSyncError`]: the unified error type
//! - Domain records ([`PackageSummary`], [`BillRecord`], [`SponsorRecord`], [`EnrichedRow`])
//! - Configuration ([`AppConfig`], config loading and validation)
//! - Time windows ([`TimeWindow`]) and date normalization

pub mod config;
pub mod error;
pub mod types;
pub mod window;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, BillTypeConfig, CategoryConfig, FilterConfig, StoreBackend,
    StoreConfig, SyncConfig, config_dir, config_file_path, database_path, init_config,
    load_config, load_config_from, read_secret, validate_config,
};
pub use error::{BillSyncError, Result};
pub use types::{
    BillRecord, Dataset, EnrichedRow, GeoJoinRow, KEYWORD_TITLE_LIMIT, LONG_TEXT_LIMIT,
    PackageSummary, ResolvedPackage, RunId, SponsorRecord, SponsorRole, truncate_chars,
    unique_id,
};
pub use window::{TimeWindow, date_to_epoch_millis, parse_api_date};
