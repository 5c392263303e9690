//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::access::ShareRecord;
use crate::audit::AuditEntry;
use crate::vault::{EncryptionStatus, NodeStatus, SecretNode, VersionMetadata};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

fn status_cell(status: NodeStatus) -> String {
    match status {
        NodeStatus::Active => style(status).green().to_string(),
        NodeStatus::Expired => style(status).yellow().to_string(),
        NodeStatus::Deleted => style(status).red().to_string(),
    }
}

/// Print a table of secrets (Name, Scope, Type, Status, Owner, Expires, Max reads).
pub fn print_secrets_table(secrets: &[SecretNode]) {
    if secrets.is_empty() {
        info("No secrets visible to you.");
        tip("Run `sealvault create <NAME>` to add your first secret.");
        return;
    }

    let mut table = new_table(vec![
        "Name", "Scope", "Type", "Status", "Owner", "Expires", "Max reads",
    ]);
    for s in secrets {
        table.add_row(vec![
            s.name.clone(),
            s.scope.to_string(),
            s.secret_type.clone(),
            status_cell(s.status),
            s.owner.clone(),
            s.expires_at
                .map_or_else(|| "-".to_string(), |t| t.format(TIME_FORMAT).to_string()),
            s.max_reads.map_or_else(|| "-".to_string(), |n| n.to_string()),
        ]);
    }

    println!("{table}");
}

/// Print the version history of one secret, newest first.
pub fn print_versions_table(name: &str, versions: &[VersionMetadata]) {
    if versions.is_empty() {
        info(&format!("Secret '{name}' has no stored versions yet."));
        tip(&format!("Run `sealvault put {name}` to store one."));
        return;
    }

    let mut table = new_table(vec![
        "Version", "Chunks", "Bytes", "Key", "Reads", "Created by", "Created",
    ]);
    for v in versions.iter().rev() {
        let chunks = if v.complete {
            v.chunk_count.to_string()
        } else {
            style(format!("{} (incomplete)", v.chunk_count)).red().to_string()
        };
        table.add_row(vec![
            v.version.to_string(),
            chunks,
            v.total_length.to_string(),
            format!("v{}", v.key_version),
            v.read_count.to_string(),
            v.created_by.clone(),
            v.created_at.format(TIME_FORMAT).to_string(),
        ]);
    }

    println!("{table}");
}

/// Print the shares of one secret.
pub fn print_shares_table(name: &str, shares: &[ShareRecord]) {
    if shares.is_empty() {
        info(&format!("Secret '{name}' is not shared."));
        return;
    }

    let mut table = new_table(vec!["Id", "Recipient", "Permission", "Granted by", "Expires"]);
    for s in shares {
        table.add_row(vec![
            s.id.to_string(),
            s.recipient.to_string(),
            s.permission.to_string(),
            s.created_by.clone(),
            s.expires_at
                .map_or_else(|| "never".to_string(), |t| t.format(TIME_FORMAT).to_string()),
        ]);
    }

    println!("{table}");
}

/// Print the key hierarchy summary.
pub fn print_status(status: &EncryptionStatus) {
    let version = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| format!("v{v}"));
    let enabled = if status.enabled {
        style("enabled").green()
    } else {
        style("disabled").red()
    };
    let initialized = if status.initialized {
        style("yes").green()
    } else {
        style("no").yellow()
    };

    println!("{:<16} {}", style("Encryption").bold(), enabled);
    println!("{:<16} {}", style("Initialized").bold(), initialized);
    println!("{:<16} {}", style("KEK").bold(), version(status.kek_version));
    println!(
        "{:<16} {}",
        style("Current DEK").bold(),
        version(status.current_key_version)
    );
    println!("{:<16} {}", style("Retained DEKs").bold(), status.retained_deks);
}

/// Print audit entries in a formatted table.
pub fn print_audit_table(entries: &[AuditEntry]) {
    let mut table = new_table(vec!["Time", "Operation", "Principal", "Secret", "Outcome", "Details"]);

    for entry in entries {
        table.add_row(vec![
            entry.timestamp.format(TIME_FORMAT).to_string(),
            colorize_operation(&entry.operation),
            entry.principal.clone(),
            entry.node_id.as_deref().unwrap_or("-").to_string(),
            colorize_outcome(&entry.outcome),
            entry.details.as_deref().unwrap_or("-").to_string(),
        ]);
    }

    println!(
        "{}",
        style(format!("{} audit entries:", entries.len())).bold()
    );
    println!("{table}");
}

/// Colorize operation names for display.
fn colorize_operation(op: &str) -> String {
    match op {
        "create_secret" | "initialize_keys" => style(op).green().to_string(),
        "store_secret" | "store_large_secret" | "set_expiration" => style(op).blue().to_string(),
        "delete_secret" | "purge_secret" | "revoke_share" => style(op).red().to_string(),
        "rotate_keys" => style(op).yellow().to_string(),
        "share_secret" => style(op).cyan().to_string(),
        "retrieve_secret" | "retrieve_large_secret" => style(op).magenta().to_string(),
        _ => op.to_string(),
    }
}

fn colorize_outcome(outcome: &str) -> String {
    match outcome {
        "success" => style(outcome).green().to_string(),
        "denied" => style(outcome).yellow().to_string(),
        "failed" => style(outcome).red().to_string(),
        _ => outcome.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorize_known_operations_keeps_name() {
        for op in ["create_secret", "rotate_keys", "share_secret", "purge_secret"] {
            assert!(colorize_operation(op).contains(op));
        }
    }

    #[test]
    fn colorize_unknown_operation_passthrough() {
        assert_eq!(colorize_operation("custom"), "custom");
        assert_eq!(colorize_outcome("other"), "other");
    }
}
