//! `sealvault get`: decrypt and print a secret's value.

use std::io::{self, IsTerminal, Write};

use crate::cancel::Cancellation;
use crate::cli::{locate, open_engine, principal, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `get` command.
pub fn execute(cli: &Cli, name: &str, version: Option<u32>) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;
    let caller = principal(cli);
    let cancel = Cancellation::new();

    // Decrypt the requested version, or the latest complete one.
    let value = match version {
        Some(n) => {
            let head_id = engine
                .list_versions(&caller, &node.id)?
                .into_iter()
                .find(|v| v.version == n)
                .map(|v| v.head_id)
                .ok_or_else(|| VaultError::NotFound(format!("version {n} of secret '{name}'")))?;
            engine.retrieve_secret(&caller, &head_id, &cancel)?
        }
        None => engine.retrieve_large_secret(&caller, &node.id, &cancel)?,
    };

    // Values are bytes; only add a newline for humans.
    let mut stdout = io::stdout().lock();
    stdout.write_all(&value)?;
    if stdout.is_terminal() && !value.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    Ok(())
}
