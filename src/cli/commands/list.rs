//! `sealvault list`: show the secrets the caller can read.

use crate::cli::output;
use crate::cli::{open_engine, principal, Cli, Workspace};
use crate::errors::Result;

/// Execute the `list` command.
///
/// Lists every namespace; `--namespace` only narrows when set explicitly
/// to something other than the default.
pub fn execute(cli: &Cli) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;

    let namespace = (cli.namespace != "default").then_some(cli.namespace.as_str());
    let secrets = engine.list_secrets(&principal(cli), namespace)?;
    output::print_secrets_table(&secrets);

    Ok(())
}
