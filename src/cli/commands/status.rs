//! `sealvault status`: show key hierarchy and encryption status.

use crate::cli::output;
use crate::cli::{open_engine, Cli, Workspace};
use crate::errors::Result;

/// Execute the `status` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    if !ws.is_initialized() {
        output::info("No key hierarchy in this directory.");
        output::tip("Run `sealvault init` to create one.");
        return Ok(());
    }

    let engine = open_engine(&ws)?;
    let status = engine.encryption_status()?;
    output::print_status(&status);

    if !status.enabled {
        output::warning("Encryption is disabled in sealvault.toml: reads and writes will fail.");
    }
    Ok(())
}
