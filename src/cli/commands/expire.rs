//! `sealvault expire`: set or clear a secret's expiration.

use chrono::Utc;

use crate::cli::output;
use crate::cli::{locate, open_engine, parse_duration, principal, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `expire` command.
pub fn execute(cli: &Cli, name: &str, expires_in: Option<&str>, clear: bool) -> Result<()> {
    let expires_at = match (expires_in, clear) {
        (Some(d), false) => Some(Utc::now() + parse_duration(d)?),
        (None, true) => None,
        _ => {
            return Err(VaultError::CommandFailed(
                "pass exactly one of --in <DURATION> or --clear".into(),
            ))
        }
    };

    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;
    let node = engine.set_expiration(&principal(cli), &node.id, expires_at)?;

    match node.expires_at {
        Some(exp) => output::success(&format!(
            "Secret '{name}' expires at {}",
            exp.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        None => output::success(&format!("Secret '{name}' no longer expires")),
    }
    Ok(())
}
