//! `sealvault init`: create the key hierarchy and the secret database.

use std::fs;
use std::sync::Arc;

use crate::cli::output;
use crate::cli::{build_engine, prompt_new_passphrase, Cli, Workspace};
use crate::crypto::KeyHierarchy;
use crate::errors::{Result, VaultError};
use crate::keystore::FileKeyStore;

/// Execute the `init` command.
pub fn execute(cli: &Cli, force: bool, no_passphrase: bool) -> Result<()> {
    let ws = Workspace::resolve(cli)?;

    // 1. Create the data directory if it doesn't exist.
    if !ws.data_dir.exists() {
        fs::create_dir_all(&ws.data_dir)?;
        output::info(&format!("Created data directory: {}", ws.data_dir.display()));
    }

    // 2. Refuse to clobber existing key material unless forced.  The old
    //    keyring may be sealed with a passphrase we don't have, so a forced
    //    init removes the file instead of opening it.
    if ws.is_initialized() {
        if !force {
            output::tip("Use `sealvault init --force` to discard the existing keys.");
            return Err(VaultError::KeyInit(format!(
                "keyring already exists at {}",
                ws.keyring_path.display()
            )));
        }
        output::warning("Discarding existing key material: stored versions become unreadable.");
        fs::remove_file(&ws.keyring_path)?;
    }

    // 3. Choose how the KEK is stored.
    let passphrase = if no_passphrase {
        output::warning("KEK will be stored unsealed; protect the keyring file yourself.");
        None
    } else {
        Some(prompt_new_passphrase()?)
    };
    let store = FileKeyStore::new(
        &ws.keyring_path,
        passphrase.as_ref().map(|p| p.as_bytes()),
        ws.settings.argon2_params(),
    )?;

    // 4. Generate KEK + first DEK and open the database.
    let keys = KeyHierarchy::new(Arc::new(store))?;
    let engine = build_engine(&ws, keys)?;
    let status = engine.initialize_keys(force)?;

    output::success(&format!(
        "Key hierarchy created at {} (KEK v{}, DEK v{})",
        ws.keyring_path.display(),
        status.kek_version.unwrap_or_default(),
        status.current_key_version.unwrap_or_default(),
    ));
    output::tip("Run `sealvault create <NAME>` to create a secret.");
    output::tip("Run `sealvault put <NAME>` to store a value.");

    Ok(())
}
