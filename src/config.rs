/// Application configuration
///
/// Values come from, in increasing priority:
/// 1. Built-in defaults
/// 2. An optional TOML file (`--config`, or `config.toml` in the platform config dir)
/// 3. Environment variables prefixed `WIPE_CERTIFY_`, with `__` between
///    section and key (e.g. `WIPE_CERTIFY_STORE__BACKEND=memory`)
///
/// Environment values are read as strings and converted by the field they
/// land in, so a digits-only `signing.key_hex` stays text.
use crate::crypto::SigningKey;
use crate::store::{InMemoryStore, RecordStore, SqliteStore};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_PREFIX: &str = "WIPE_CERTIFY";

const DATABASE_FILE: &str = "records.db";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Seconds without progress before a health check counts as stalled
    pub health_stall_timeout_secs: u64,
    /// Seconds without progress before a wipe counts as stalled
    pub wipe_stall_timeout_secs: u64,
    /// Seconds a document extraction may take during verification
    pub extraction_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            health_stall_timeout_secs: 30,
            wipe_stall_timeout_secs: 120,
            extraction_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Hex-encoded HMAC key for certificate verification hashes
    pub key_hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub workflow: WorkflowConfig,
    pub signing: SigningConfig,
    pub logging: LoggingConfig,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "wipe-certify", "wipe-certify")
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; the default file
    /// location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(path) => Some(File::from(path).required(true)),
            None => Self::default_config_path().map(|p| File::from(p).required(false)),
        };

        let mut builder = Config::builder();
        if let Some(source) = file_source {
            builder = builder.add_source(source);
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        tracing::debug!(backend = ?config.store.backend, "Configuration loaded");
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn default_database_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().join(DATABASE_FILE))
    }

    pub fn health_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.health_stall_timeout_secs.max(1))
    }

    pub fn wipe_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.wipe_stall_timeout_secs.max(1))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.extraction_timeout_secs.max(1))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Self::default_database_path()
                .context("No home directory found; set store.path explicitly"),
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn RecordStore>> {
        match self.store.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory record store; records are lost on exit");
                Ok(Arc::new(InMemoryStore::new()))
            }
            StoreBackend::Sqlite => {
                let path = self.database_path()?;
                Ok(Arc::new(SqliteStore::open(&path)?))
            }
        }
    }

    /// The configured signing key, or a random one for this process
    pub fn signing_key(&self) -> Result<Arc<SigningKey>> {
        match self.signing.key_hex.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(hex_key) => Ok(Arc::new(
                SigningKey::from_hex(hex_key).context("Invalid signing.key_hex")?,
            )),
            None => {
                tracing::warn!(
                    "No signing key configured; verification hashes from this run \
                     cannot be re-checked later"
                );
                Ok(Arc::new(SigningKey::generate()?))
            }
        }
    }

    /// Whether certificates can be hash-checked across runs
    pub fn has_signing_key(&self) -> bool {
        self.signing
            .key_hex
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in [
            "WIPE_CERTIFY_STORE__BACKEND",
            "WIPE_CERTIFY_WORKFLOW__WIPE_STALL_TIMEOUT_SECS",
            "WIPE_CERTIFY_SIGNING__KEY_HEX",
            "WIPE_CERTIFY_LOGGING__JSON",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.health_stall_timeout(), Duration::from_secs(30));
        assert_eq!(config.wipe_stall_timeout(), Duration::from_secs(120));
        assert_eq!(config.extraction_timeout(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert!(!config.has_signing_key());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\nbackend = \"memory\"\n\n\
             [workflow]\nhealth_stall_timeout_secs = 5\nextraction_timeout_secs = 15\n\n\
             [logging]\njson = true"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.health_stall_timeout(), Duration::from_secs(5));
        assert_eq!(config.extraction_timeout(), Duration::from_secs(15));
        assert_eq!(config.wipe_stall_timeout(), Duration::from_secs(120));
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[store]\nbackend = \"sqlite\"").unwrap();

        std::env::set_var("WIPE_CERTIFY_STORE__BACKEND", "memory");
        std::env::set_var("WIPE_CERTIFY_WORKFLOW__WIPE_STALL_TIMEOUT_SECS", "9");
        let config = AppConfig::load(Some(file.path()));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.wipe_stall_timeout(), Duration::from_secs(9));
    }

    #[test]
    #[serial]
    fn test_numeric_looking_key_from_environment_is_kept_verbatim() {
        clear_env();
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let key_hex = "0123456789".repeat(3) + "01";

        std::env::set_var("WIPE_CERTIFY_SIGNING__KEY_HEX", &key_hex);
        std::env::set_var("WIPE_CERTIFY_LOGGING__JSON", "true");
        let config = AppConfig::load(Some(file.path()));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.signing.key_hex.as_deref(), Some(key_hex.as_str()));
        assert!(config.logging.json);
        assert!(config.signing_key().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        clear_env();
        assert!(AppConfig::load(Some(Path::new("/nonexistent/wipe-certify.toml"))).is_err());
    }

    #[test]
    fn test_signing_key_from_config() {
        let mut config = AppConfig::default();
        config.signing.key_hex = Some("0f".repeat(32));
        assert!(config.has_signing_key());
        assert!(config.signing_key().is_ok());

        config.signing.key_hex = Some("zz".to_string());
        assert!(config.signing_key().is_err());
    }

    #[test]
    fn test_generated_key_when_unset() {
        let config = AppConfig::default();
        assert!(config.signing_key().is_ok());
    }

    #[test]
    fn test_open_sqlite_store_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.store.path = Some(dir.path().join("db").join("records.db"));

        let store = config.open_store().unwrap();
        assert!(store
            .list_sessions(&crate::store::SortSpec::unsorted())
            .unwrap()
            .is_empty());
        assert!(dir.path().join("db").join("records.db").exists());
    }
}
