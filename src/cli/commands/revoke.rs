//! `sealvault revoke`: remove a share.

use crate::access::ShareId;
use crate::cli::output;
use crate::cli::{open_engine, principal, Cli, Workspace};
use crate::errors::Result;

/// Execute the `revoke` command.
pub fn execute(cli: &Cli, share_id: &str) -> Result<()> {
    let share_id: ShareId = share_id.parse()?;
    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;

    engine.revoke_share(&principal(cli), &share_id)?;
    output::success(&format!("Share {share_id} revoked"));
    Ok(())
}
