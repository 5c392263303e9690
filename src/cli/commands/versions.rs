//! `sealvault versions`: show the version history of a secret.

use crate::cli::output;
use crate::cli::{locate, open_engine, principal, Cli, Workspace};
use crate::errors::Result;

/// Execute the `versions` command.
pub fn execute(cli: &Cli, name: &str) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;

    let versions = engine.list_versions(&principal(cli), &node.id)?;
    output::print_versions_table(name, &versions);
    Ok(())
}
