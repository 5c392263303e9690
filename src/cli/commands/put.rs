//! `sealvault put`: encrypt and store a new version of a secret.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::Path;

use zeroize::Zeroizing;

use crate::cancel::Cancellation;
use crate::cli::output;
use crate::cli::{locate, open_engine, principal, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `put` command.
pub fn execute(
    cli: &Cli,
    name: &str,
    value: Option<&str>,
    file: Option<&Path>,
    chunk_size_kb: Option<u32>,
) -> Result<()> {
    // Determine the secret value from one of four sources.
    let plaintext = if let Some(v) = value {
        // Source 1: Inline value on the command line.
        output::warning("Value provided on command line: it may appear in shell history.");
        Zeroizing::new(v.as_bytes().to_vec())
    } else if let Some(path) = file {
        // Source 2: A file, read as raw bytes.
        Zeroizing::new(fs::read(path)?)
    } else if !io::stdin().is_terminal() {
        // Source 3: Piped input (stdin is not a terminal).
        let mut buf = Zeroizing::new(Vec::new());
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        // Source 4: Interactive secure prompt (default).
        let v = dialoguer::Password::new()
            .with_prompt(format!("Enter value for {name}"))
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("input prompt: {e}")))?;
        Zeroizing::new(v.into_bytes())
    };

    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;
    let caller = principal(cli);
    let cancel = Cancellation::new();

    let (version, chunks) = match chunk_size_kb {
        Some(kb) => {
            let metas = engine.store_large_secret(&caller, &node.id, &plaintext, kb, &cancel)?;
            let version = metas.first().map(|m| m.version).unwrap_or_default();
            (version, metas.len())
        }
        None => {
            let handle = engine.store_secret(&caller, &node.id, &plaintext, &cancel)?;
            (handle.version, handle.chunk_count as usize)
        }
    };

    let noun = if chunks == 1 { "chunk" } else { "chunks" };
    output::success(&format!(
        "Stored version {version} of '{name}' ({} bytes, {chunks} {noun})",
        plaintext.len()
    ));
    Ok(())
}
