//! Audit log: a record of every engine operation and its outcome.
//!
//! The engine reports to an `AuditSink`.  `SqliteAuditLog` stores events
//! in `<data_dir>/audit.db`; `NoopAudit` drops them.
//!
//! Designed for graceful degradation: if the database can't be opened or
//! written to, operations silently continue without logging.  Events never
//! carry plaintext or key material.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::debug;

use crate::errors::{Result, VaultError};
use crate::vault::secret::NodeId;

/// How an audited operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation as reported by the engine.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub operation: &'static str,
    pub principal: String,
    pub node_id: Option<NodeId>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(operation: &'static str, principal: &str, outcome: AuditOutcome) -> Self {
        Self {
            operation,
            principal: principal.to_string(),
            node_id: None,
            outcome,
            detail: None,
        }
    }

    pub fn node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receiver of audit events.  Recording must never fail the operation.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _event: &AuditEvent) {}
}

/// A single stored audit entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub principal: String,
    pub node_id: Option<String>,
    pub outcome: String,
    pub details: Option<String>,
}

/// SQLite-backed audit log.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    /// Open (or create) the audit database at `<data_dir>/audit.db`.
    ///
    /// Returns `None` if the database can't be opened; callers should
    /// treat this as "audit logging unavailable" and continue normally.
    pub fn open(data_dir: &Path) -> Option<Self> {
        let db_path = Self::db_path(data_dir);
        let conn = Connection::open(&db_path).ok()?;

        // Set restrictive permissions on the audit database (owner-only).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&db_path, perms);
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                operation TEXT NOT NULL,
                principal TEXT NOT NULL,
                node_id   TEXT,
                outcome   TEXT NOT NULL,
                details   TEXT
            );",
        )
        .ok()?;

        Some(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Query recent audit entries.
    ///
    /// - `limit`: maximum number of entries to return (most recent first).
    /// - `since`: if provided, only return entries newer than this timestamp.
    pub fn query(&self, limit: usize, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEntry>> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let since = since.map(|ts| ts.to_rfc3339());

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, operation, principal, node_id, outcome, details
                 FROM audit_log
                 WHERE ?1 IS NULL OR timestamp >= ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(|e| VaultError::Audit(format!("query prepare: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![since, limit_i64], |row| {
                let ts_str: String = row.get(1)?;
                let timestamp = DateTime::parse_from_rfc3339(&ts_str)
                    .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp,
                    operation: row.get(2)?,
                    principal: row.get(3)?,
                    node_id: row.get(4)?,
                    outcome: row.get(5)?,
                    details: row.get(6)?,
                })
            })
            .map_err(|e| VaultError::Audit(format!("query exec: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| VaultError::Audit(format!("row parse: {e}")))?);
        }

        Ok(entries)
    }

    /// Return the path to the audit database (for testing/display).
    pub fn db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("audit.db")
    }
}

impl AuditSink for SqliteAuditLog {
    /// Fire-and-forget: errors are logged at debug level and dropped.
    fn record(&self, event: &AuditEvent) {
        let now = Utc::now().to_rfc3339();
        let node_id = event.node_id.map(|id| id.to_string());
        let result = self.conn.lock().execute(
            "INSERT INTO audit_log (timestamp, operation, principal, node_id, outcome, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                now,
                event.operation,
                event.principal,
                node_id,
                event.outcome.as_str(),
                event.detail
            ],
        );
        if let Err(e) = result {
            debug!(error = %e, operation = event.operation, "audit write dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(op: &'static str) -> AuditEvent {
        AuditEvent::new(op, "u1", AuditOutcome::Success)
    }

    #[test]
    fn open_creates_database() {
        let dir = TempDir::new().unwrap();
        assert!(SqliteAuditLog::open(dir.path()).is_some());
        assert!(dir.path().join("audit.db").exists());
    }

    #[test]
    fn record_and_query_roundtrip() {
        let dir = TempDir::new().unwrap();
        let audit = SqliteAuditLog::open(dir.path()).unwrap();
        let node = NodeId::new();

        audit.record(&event("store").node(node));
        audit.record(&AuditEvent::new("retrieve", "u2", AuditOutcome::Denied).node(node));
        audit.record(&event("rotate_keys").detail("dek"));

        let entries = audit.query(10, None).unwrap();
        assert_eq!(entries.len(), 3);

        // Most recent first.
        assert_eq!(entries[0].operation, "rotate_keys");
        assert_eq!(entries[0].details.as_deref(), Some("dek"));
        assert!(entries[0].node_id.is_none());
        assert_eq!(entries[1].outcome, "denied");
        assert_eq!(entries[1].principal, "u2");
        assert_eq!(entries[2].node_id, Some(node.to_string()));
    }

    #[test]
    fn query_with_limit() {
        let dir = TempDir::new().unwrap();
        let audit = SqliteAuditLog::open(dir.path()).unwrap();
        for _ in 0..10 {
            audit.record(&event("store"));
        }
        assert_eq!(audit.query(3, None).unwrap().len(), 3);
    }

    #[test]
    fn query_with_since_filter() {
        let dir = TempDir::new().unwrap();
        let audit = SqliteAuditLog::open(dir.path()).unwrap();
        audit.record(&event("store"));

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(audit.query(10, Some(past)).unwrap().len(), 1);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(audit.query(10, Some(future)).unwrap().is_empty());
    }

    #[test]
    fn open_returns_none_on_bad_path() {
        let result = SqliteAuditLog::open(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(result.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn audit_db_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let _audit = SqliteAuditLog::open(dir.path()).unwrap();

        let perms = std::fs::metadata(dir.path().join("audit.db"))
            .unwrap()
            .permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
