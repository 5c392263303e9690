//! `sealvault rotate`: rotate the DEK or the KEK.
//!
//! DEK rotation adds a new data key; older versions keep decrypting with
//! the DEK they were written under.  KEK rotation re-wraps every retained
//! DEK under a fresh KEK and commits the keyring in one write.

use crate::cancel::Cancellation;
use crate::cli::output;
use crate::cli::{open_engine, Cli, Workspace};
use crate::crypto::RotationScope;
use crate::errors::Result;

/// Execute the `rotate` command.
pub fn execute(cli: &Cli, scope: &str) -> Result<()> {
    let scope: RotationScope = scope.parse()?;
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;

    let version = engine.rotate_keys(scope, &Cancellation::new())?;
    match scope {
        RotationScope::Dek => {
            output::success(&format!("Data key rotated: new writes use DEK v{version}"));
        }
        RotationScope::Kek => {
            let retained = engine.encryption_status()?.retained_deks;
            output::success(&format!(
                "Key-encryption key rotated to v{version} ({retained} data keys re-wrapped)"
            ));
        }
    }
    Ok(())
}
