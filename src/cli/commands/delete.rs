//! `sealvault delete`: tombstone a secret.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{locate, open_engine, principal, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, name: &str, force: bool) -> Result<()> {
    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete secret '{name}' and all of its versions?"))
            .default(false)
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;

    engine.delete_secret(&principal(cli), &node.id)?;
    output::success(&format!("Deleted secret '{name}'"));

    Ok(())
}
