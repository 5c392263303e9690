//! `sealvault share`: grant a user or group access to a secret.

use chrono::Utc;

use crate::access::{NewShare, Recipient, SharePermission};
use crate::cli::output;
use crate::cli::{locate, open_engine, parse_duration, principal, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `share` command.
pub fn execute(
    cli: &Cli,
    name: &str,
    recipient: &str,
    permission: &str,
    expires_in: Option<&str>,
) -> Result<()> {
    let share = NewShare {
        recipient: parse_recipient(recipient)?,
        permission: permission.parse::<SharePermission>()?,
        expires_at: expires_in
            .map(|d| parse_duration(d).map(|d| Utc::now() + d))
            .transpose()?,
    };

    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = locate(&engine, cli, name)?;
    let record = engine.share_secret(&principal(cli), &node.id, share)?;

    output::success(&format!(
        "Granted {} on '{name}' to {}",
        record.permission, record.recipient
    ));
    output::info(&format!("Share id: {}", record.id));
    output::tip(&format!("Run `sealvault revoke {}` to take it back.", record.id));
    Ok(())
}

/// Parse `user:<id>`, `group:<id>` or a bare user id.
fn parse_recipient(input: &str) -> Result<Recipient> {
    let recipient = match input.split_once(':') {
        Some(("user", id)) => Recipient::User(id.to_string()),
        Some(("group", id)) => Recipient::Group(id.to_string()),
        Some((kind, _)) => {
            return Err(VaultError::Validation(format!(
                "unknown recipient kind '{kind}' (expected 'user' or 'group')"
            )))
        }
        None => Recipient::User(input.to_string()),
    };
    Ok(recipient)
}
