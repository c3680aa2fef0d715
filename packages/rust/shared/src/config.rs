//! Application configuration for billsync.
//!
//! User config lives at `~/.billsync/billsync.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file: it names the env vars that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BillSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "billsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".billsync";

/// Default local database file name.
const DATABASE_FILE_NAME: &str = "billsync.db";

// ---------------------------------------------------------------------------
// Config structs (matching billsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bill API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Document classes to pull, with the label stored on each row.
    #[serde(default = "default_bill_types")]
    pub bill_types: Vec<BillTypeConfig>,

    /// Feature store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lookback and retention.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Optional keyword/category filter.
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            bill_types: default_bill_types(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Collections endpoint root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Collection code appended to `base_url`.
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Congress number to restrict the listing to.
    #[serde(default = "default_congress")]
    pub congress: u32,

    /// Packages per collection page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Packages resolved concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            collection: default_collection(),
            api_key_env: default_api_key_env(),
            congress: default_congress(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.govinfo.gov/collections".into()
}
fn default_collection() -> String {
    "BILLS".into()
}
fn default_api_key_env() -> String {
    "GOVINFO_API_KEY".into()
}
fn default_congress() -> u32 {
    118
}
fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> u32 {
    4
}

/// `[[bill_types]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillTypeConfig {
    /// `docClass` code, e.g. `hr`.
    pub code: String,
    /// Label written to the `bill_type` column.
    pub label: String,
}

fn default_bill_types() -> Vec<BillTypeConfig> {
    [
        ("hr", "House Bill"),
        ("s", "Senate Bill"),
        ("hjres", "House Joint Resolution"),
        ("sjres", "Senate Joint Resolution"),
        ("hconres", "House Concurrent Resolution"),
        ("sconres", "Senate Concurrent Resolution"),
        ("hres", "House Simple Resolution"),
        ("sres", "Senate Simple Resolution"),
    ]
    .into_iter()
    .map(|(code, label)| BillTypeConfig {
        code: code.into(),
        label: label.into(),
    })
    .collect()
}

/// Which feature store implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Layers kept in the local libSQL database.
    Local,
    /// Hosted ArcGIS feature service.
    Arcgis,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Name of the env var holding a pre-issued store token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Member (sponsor) layer: URL for arcgis, name for local.
    #[serde(default = "default_members_layer")]
    pub members_layer: String,

    /// Bills table: URL for arcgis, name for local.
    #[serde(default = "default_bills_layer")]
    pub bills_layer: String,

    /// State reference layer. Empty uses the built-in table.
    #[serde(default)]
    pub states_layer: String,

    /// Features per add/update call; `0` sends one call per kind.
    #[serde(default = "default_edit_batch_size")]
    pub edit_batch_size: usize,

    /// Local database path. Empty uses `~/.billsync/billsync.db`.
    #[serde(default)]
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            token_env: default_token_env(),
            members_layer: default_members_layer(),
            bills_layer: default_bills_layer(),
            states_layer: String::new(),
            edit_batch_size: default_edit_batch_size(),
            database_path: String::new(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Local
}
fn default_token_env() -> String {
    "ARCGIS_TOKEN".into()
}
fn default_members_layer() -> String {
    "members".into()
}
fn default_bills_layer() -> String {
    "bills".into()
}
fn default_edit_batch_size() -> usize {
    500
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Lookback window for modified packages.
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    /// Rows created longer ago than this are deleted; `0` disables pruning.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_days_back() -> u32 {
    3
}
fn default_retention_days() -> u32 {
    30
}

/// `[filter]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Checked in order; the first matching keyword tags the package.
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

/// `[[filter.categories]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.billsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BillSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.billsync/billsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the local database path, defaulting into the config directory.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    if config.store.database_path.is_empty() {
        Ok(config_dir()?.join(DATABASE_FILE_NAME))
    } else {
        Ok(PathBuf::from(&config.store.database_path))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BillSyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BillSyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BillSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BillSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BillSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a non-empty secret from the env var named by `var_name`.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(BillSyncError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check everything the pipeline needs before any network activity.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    read_secret(&config.api.api_key_env, "bill API key")?;

    url::Url::parse(&config.api.base_url).map_err(|e| {
        BillSyncError::config(format!("api.base_url '{}' is invalid: {e}", config.api.base_url))
    })?;

    if config.api.congress == 0 {
        return Err(BillSyncError::config("api.congress must be greater than 0"));
    }
    if !(1..=1000).contains(&config.api.page_size) {
        return Err(BillSyncError::config("api.page_size must be between 1 and 1000"));
    }
    if config.api.concurrency == 0 {
        return Err(BillSyncError::config("api.concurrency must be at least 1"));
    }
    if config.bill_types.is_empty() {
        return Err(BillSyncError::config("at least one [[bill_types]] entry is required"));
    }

    if config.store.backend == StoreBackend::Arcgis {
        read_secret(&config.store.token_env, "feature store token")?;
        let layers = [
            ("store.members_layer", &config.store.members_layer),
            ("store.bills_layer", &config.store.bills_layer),
        ];
        for (name, value) in layers {
            url::Url::parse(value).map_err(|e| {
                BillSyncError::config(format!("{name} must be a layer URL for arcgis: {e}"))
            })?;
        }
        if !config.store.states_layer.is_empty() {
            url::Url::parse(&config.store.states_layer).map_err(|e| {
                BillSyncError::config(format!("store.states_layer is not a URL: {e}"))
            })?;
        }
    }

    if config.filter.enabled
        && config
            .filter
            .categories
            .iter()
            .all(|c| c.keywords.iter().all(|k| k.trim().is_empty()))
    {
        return Err(BillSyncError::config(
            "filter is enabled but no keywords are configured",
        ));
    }

    Ok(())
}
