//! `sealvault audit`: display the audit log.
//!
//! Usage:
//!   sealvault audit               # show last 50 entries
//!   sealvault audit --last 20     # show last 20
//!   sealvault audit --since 7d    # entries from last 7 days

use chrono::Utc;

use crate::audit::SqliteAuditLog;
use crate::cli::output;
use crate::cli::{parse_duration, Cli, Workspace};
use crate::errors::{Result, VaultError};

/// Execute the `audit` command.
pub fn execute(cli: &Cli, last: usize, since: Option<&str>) -> Result<()> {
    let ws = Workspace::resolve(cli)?;

    let audit = SqliteAuditLog::open(&ws.data_dir)
        .ok_or_else(|| VaultError::Audit("failed to open audit database".into()))?;

    let since_dt = since
        .map(|s| parse_duration(s).map(|d| Utc::now() - d))
        .transpose()?;

    let entries = audit.query(last, since_dt)?;

    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }

    output::print_audit_table(&entries);

    Ok(())
}
