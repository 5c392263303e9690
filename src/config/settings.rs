use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{Argon2Params, MIN_MEMORY_KIB};
use crate::errors::{Result, VaultError};
use crate::vault::versions::AppendPolicy;

/// Engine configuration, loaded from `sealvault.toml`.
///
/// Every field has a sensible default so SealVault works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory (relative to the working directory) holding all state.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// SQLite database with nodes, versions, shares and roles.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Keyring file holding the KEK and wrapped DEKs.
    #[serde(default = "default_keyring_file")]
    pub keyring_file: String,

    /// When false, storing and retrieving secret content is refused.
    #[serde(default = "default_true")]
    pub encryption_enabled: bool,

    /// Record operations in `<data_dir>/audit.db`.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,

    /// Plaintexts longer than this are split into chunks (default: 64 KiB).
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: u32,

    /// Conflicting version appends retried before giving up.
    #[serde(default = "default_append_max_retries")]
    pub append_max_retries: u32,

    /// Base delay between append retries, before jitter.
    #[serde(default = "default_append_backoff_ms")]
    pub append_backoff_ms: u64,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_data_dir() -> String {
    ".sealvault".to_string()
}

fn default_database_file() -> String {
    "secrets.db".to_string()
}

fn default_keyring_file() -> String {
    "keyring.svkr".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size_kb() -> u32 {
    64
}

fn default_append_max_retries() -> u32 {
    8
}

fn default_append_backoff_ms() -> u64 {
    5
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_log_filter() -> String {
    "warn".to_string()
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            keyring_file: default_keyring_file(),
            encryption_enabled: true,
            audit_enabled: true,
            chunk_size_kb: default_chunk_size_kb(),
            append_max_retries: default_append_max_retries(),
            append_backoff_ms: default_append_backoff_ms(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    pub const FILE_NAME: &'static str = "sealvault.toml";

    /// Load settings from `<project_dir>/sealvault.toml`.
    ///
    /// If the file does not exist, defaults are returned.  If it exists but
    /// cannot be parsed or holds invalid values, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::Config(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_kb == 0 {
            return Err(VaultError::Config("chunk_size_kb must be at least 1".into()));
        }
        if self.data_dir.trim().is_empty() {
            return Err(VaultError::Config("data_dir cannot be empty".into()));
        }
        if self.argon2_memory_kib < MIN_MEMORY_KIB {
            return Err(VaultError::Config(format!(
                "argon2_memory_kib must be at least {MIN_MEMORY_KIB}"
            )));
        }
        self.argon2_params()
            .validate()
            .map_err(|e| VaultError::Config(e.to_string()))
    }

    /// `<project_dir>/<data_dir>`
    pub fn data_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.data_dir)
    }

    pub fn database_path(&self, project_dir: &Path) -> PathBuf {
        self.data_path(project_dir).join(&self.database_file)
    }

    pub fn keyring_path(&self, project_dir: &Path) -> PathBuf {
        self.data_path(project_dir).join(&self.keyring_file)
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kb as usize * 1024
    }

    pub fn append_policy(&self) -> AppendPolicy {
        AppendPolicy {
            max_retries: self.append_max_retries,
            base_backoff: Duration::from_millis(self.append_backoff_ms),
        }
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
