//! CLI module: Clap argument parser, output helpers, and command implementations.
//!
//! The `sealvault` binary is an operator tool.  It acts as whatever
//! principal `--as` names and trusts `--group`; nothing is authenticated.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use zeroize::Zeroizing;

use crate::access::Principal;
use crate::audit::SqliteAuditLog;
use crate::config::Settings;
use crate::crypto::KeyHierarchy;
use crate::errors::{Result, VaultError};
use crate::keystore::FileKeyStore;
use crate::storage::{SecretRepository, SqliteRepository};
use crate::vault::{EngineConfig, SecretEngine, SecretNode, SecretScope};

/// Minimum passphrase length to prevent trivially weak passphrases.
const MIN_PASSPHRASE_LEN: usize = 8;

/// Environment variable consulted before prompting for the passphrase.
pub const PASSPHRASE_ENV: &str = "SEALVAULT_PASSPHRASE";

/// SealVault CLI: encrypted, versioned, access-gated secrets.
#[derive(Parser)]
#[command(
    name = "sealvault",
    about = "Encrypted, versioned, access-gated secret store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Principal to act as
    #[arg(long = "as", default_value = "admin", global = true, env = "SEALVAULT_PRINCIPAL")]
    pub principal: String,

    /// Group the acting principal belongs to (repeatable)
    #[arg(long = "group", global = true)]
    pub groups: Vec<String>,

    /// Namespace of the secret (default: default)
    #[arg(short, long, default_value = "default", global = true)]
    pub namespace: String,

    /// Zone of the secret (default: default)
    #[arg(short, long, default_value = "default", global = true)]
    pub zone: String,

    /// Environment of the secret (default: dev)
    #[arg(short, long, default_value = "dev", global = true)]
    pub env: String,

    /// Data directory (overrides `data_dir` in sealvault.toml)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create the key hierarchy and the secret database
    Init {
        /// Destroy existing key material (existing versions become unreadable)
        #[arg(long)]
        force: bool,

        /// Store the KEK without passphrase sealing
        #[arg(long)]
        no_passphrase: bool,
    },

    /// Show key hierarchy and encryption status
    Status,

    /// Rotate the data-encryption key or the key-encryption key
    Rotate {
        /// Which key to rotate: dek or kek
        scope: String,
    },

    /// Create a new, empty secret
    Create {
        /// Secret name (e.g. db-password)
        name: String,

        /// Declared type (e.g. password, certificate)
        #[arg(long = "type", default_value = "generic")]
        secret_type: String,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Expire after a duration (e.g. 7d, 24h, 30m)
        #[arg(long)]
        expires_in: Option<String>,

        /// Maximum number of reads per version
        #[arg(long)]
        max_reads: Option<u64>,
    },

    /// Store a new version of a secret
    Put {
        /// Secret name
        name: String,

        /// Secret value (omit to read stdin or prompt)
        value: Option<String>,

        /// Read the value from a file
        #[arg(long, conflicts_with = "value")]
        file: Option<PathBuf>,

        /// Chunk size in KiB (stores as a chunked large secret)
        #[arg(long)]
        chunk_size_kb: Option<u32>,
    },

    /// Print a secret's value
    Get {
        /// Secret name
        name: String,

        /// Version to read (default: latest)
        #[arg(long)]
        version: Option<u32>,
    },

    /// List secrets visible to the principal
    List,

    /// Show the version history of a secret
    Versions {
        /// Secret name
        name: String,
    },

    /// Set or clear a secret's expiration
    Expire {
        /// Secret name
        name: String,

        /// Expire after a duration (e.g. 7d, 24h, 30m)
        #[arg(long = "in", conflicts_with = "clear")]
        expires_in: Option<String>,

        /// Remove the expiration
        #[arg(long)]
        clear: bool,
    },

    /// Share a secret with a user or group
    Share {
        /// Secret name
        name: String,

        /// Recipient: `user:<id>`, `group:<id>` or a bare user id
        recipient: String,

        /// Permission to grant: read or write
        #[arg(long, default_value = "read")]
        permission: String,

        /// Share lapses after a duration (e.g. 7d, 24h, 30m)
        #[arg(long)]
        expires_in: Option<String>,
    },

    /// List the shares of a secret
    Shares {
        /// Secret name
        name: String,
    },

    /// Revoke a share by id
    Revoke {
        /// Share id as printed by `share`
        share_id: String,
    },

    /// Delete a secret
    Delete {
        /// Secret name
        name: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// View the audit log of engine operations
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Paths and settings resolved from the working directory and CLI flags.
pub struct Workspace {
    pub settings: Settings,
    pub data_dir: PathBuf,
    pub keyring_path: PathBuf,
    pub database_path: PathBuf,
}

impl Workspace {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::resolve_in(cli, &cwd)
    }

    pub fn resolve_in(cli: &Cli, root: &Path) -> Result<Self> {
        let mut settings = Settings::load(root)?;
        if let Some(dir) = &cli.data_dir {
            settings.data_dir = dir.clone();
        }
        Ok(Self {
            data_dir: settings.data_path(root),
            keyring_path: settings.keyring_path(root),
            database_path: settings.database_path(root),
            settings,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.keyring_path.exists()
    }
}

/// Open the engine over the workspace's keyring and database.
///
/// Prompts for the passphrase only when the keyring is sealed.
pub fn open_engine(ws: &Workspace) -> Result<SecretEngine> {
    if !ws.is_initialized() {
        output::tip("Run `sealvault init` to create the key hierarchy.");
        return Err(VaultError::CommandFailed(format!(
            "no keyring at {}",
            ws.keyring_path.display()
        )));
    }

    let passphrase = if FileKeyStore::is_sealed(&ws.keyring_path)? {
        Some(prompt_passphrase()?)
    } else {
        None
    };
    let store = FileKeyStore::new(
        &ws.keyring_path,
        passphrase.as_ref().map(|p| p.as_bytes()),
        ws.settings.argon2_params(),
    )?;
    let keys = KeyHierarchy::new(Arc::new(store))?;
    build_engine(ws, keys)
}

/// Wire a key hierarchy to the workspace database and audit log.
pub fn build_engine(ws: &Workspace, keys: KeyHierarchy) -> Result<SecretEngine> {
    let repo: Arc<dyn SecretRepository> = Arc::new(SqliteRepository::open(&ws.database_path)?);
    let mut engine = SecretEngine::new(repo, Arc::new(keys), EngineConfig::from(&ws.settings));

    if ws.settings.audit_enabled {
        match SqliteAuditLog::open(&ws.data_dir) {
            Some(audit) => engine = engine.with_audit(Arc::new(audit)),
            None => debug!("audit log unavailable, continuing without it"),
        }
    }
    Ok(engine)
}

/// The acting principal from `--as` and `--group`.
pub fn principal(cli: &Cli) -> Principal {
    cli.groups
        .iter()
        .fold(Principal::new(&cli.principal), |p, g| p.with_group(g))
}

/// The scope from `--namespace`, `--zone` and `--env`.
pub fn scope(cli: &Cli) -> SecretScope {
    SecretScope::new(&cli.namespace, &cli.zone, &cli.env)
}

/// Find a live secret by name in the CLI scope.
pub fn locate(engine: &SecretEngine, cli: &Cli, name: &str) -> Result<SecretNode> {
    let scope = scope(cli);
    engine
        .repository()
        .find_node(&scope, name)?
        .ok_or_else(|| VaultError::NotFound(format!("secret '{name}' in {scope}")))
}

/// Get the keyring passphrase, trying in order:
/// 1. `SEALVAULT_PASSPHRASE` env var (CI/CD)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the passphrase is wiped from memory on drop.
pub fn prompt_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter keyring passphrase")
        .interact()
        .map_err(|e| VaultError::CommandFailed(format!("passphrase prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new passphrase with confirmation (used during `init`).
///
/// Also respects `SEALVAULT_PASSPHRASE` for scripted/CI usage.
/// Enforces a minimum length.
pub fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if !pw.is_empty() {
            if pw.len() < MIN_PASSPHRASE_LEN {
                return Err(VaultError::CommandFailed(format!(
                    "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
                )));
            }
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Choose keyring passphrase")
            .with_confirmation(
                "Confirm keyring passphrase",
                "Passphrases do not match, try again",
            )
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("passphrase prompt: {e}")))?;

        if passphrase.len() < MIN_PASSPHRASE_LEN {
            output::warning(&format!(
                "Passphrase must be at least {MIN_PASSPHRASE_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(passphrase));
    }
}

/// Parse a human-friendly duration string like "7d", "24h", "30m".
pub fn parse_duration(input: &str) -> Result<chrono::Duration> {
    let input = input.trim();

    let (num_str, unit) = if let Some(s) = input.strip_suffix('d') {
        (s, 'd')
    } else if let Some(s) = input.strip_suffix('h') {
        (s, 'h')
    } else if let Some(s) = input.strip_suffix('m') {
        (s, 'm')
    } else {
        return Err(VaultError::CommandFailed(format!(
            "invalid duration '{input}': use a format like 7d, 24h, or 30m"
        )));
    };

    let num: i64 = num_str.parse().map_err(|_| {
        VaultError::CommandFailed(format!(
            "invalid duration '{input}': number part is not valid"
        ))
    })?;
    if num <= 0 {
        return Err(VaultError::CommandFailed(format!(
            "invalid duration '{input}': must be positive"
        )));
    }

    Ok(match unit {
        'd' => chrono::Duration::days(num),
        'h' => chrono::Duration::hours(num),
        _ => chrono::Duration::minutes(num),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["sealvault"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("7d").unwrap(), chrono::Duration::days(7));
        assert_eq!(parse_duration("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_duration("30m").unwrap(), chrono::Duration::minutes(30));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("7x").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("0h").is_err());
    }

    #[test]
    fn principal_collects_groups() {
        let c = cli(&["--as", "alice", "--group", "ops", "--group", "dev", "status"]);
        let p = principal(&c);
        assert_eq!(p.id, "alice");
        assert!(p.groups.contains("ops"));
        assert!(p.groups.contains("dev"));
    }

    #[test]
    fn scope_from_flags() {
        let c = cli(&["-n", "payments", "-z", "eu", "-e", "prod", "status"]);
        assert_eq!(scope(&c).to_string(), "payments/eu/prod");
    }

    #[test]
    fn data_dir_flag_overrides_settings() {
        let tmp = tempfile::TempDir::new().unwrap();
        let c = cli(&["--data-dir", "state", "status"]);
        let ws = Workspace::resolve_in(&c, tmp.path()).unwrap();
        assert_eq!(ws.data_dir, tmp.path().join("state"));
        assert!(!ws.is_initialized());
    }
}
