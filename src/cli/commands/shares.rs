//! `sealvault shares`: list who a secret is shared with.

use crate::cli::output;
use crate::cli::{locate, open_engine, principal, Cli, Workspace};
use crate::errors::Result;

/// Execute the `shares` command.  Needs write permission on the secret.
pub fn execute(cli: &Cli, name: &str) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;

    let shares = engine.list_shares(&principal(cli), &node.id)?;
    output::print_shares_table(name, &shares);
    Ok(())
}
