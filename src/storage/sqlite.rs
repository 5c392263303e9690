//! SQLite-backed repository.
//!
//! One connection behind a mutex.  Multi-statement operations run inside
//! `IMMEDIATE` transactions so the version-append check and insert happen
//! under SQLite's write lock.  Timestamps are stored as RFC 3339 text and
//! ids as hyphenated UUID text.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::SecretRepository;
use crate::access::model::{Recipient, Role, RoleGrant, ShareId, ShareRecord};
use crate::errors::{Result, VaultError};
use crate::vault::secret::{NodeId, NodeStatus, SecretNode, SecretScope, VersionId, VersionRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    namespace   TEXT NOT NULL,
    zone        TEXT NOT NULL,
    environment TEXT NOT NULL,
    owner       TEXT NOT NULL,
    secret_type TEXT NOT NULL,
    status      TEXT NOT NULL,
    description TEXT,
    expires_at  TEXT,
    max_reads   INTEGER,
    metadata    TEXT NOT NULL,
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_live_name
    ON nodes (namespace, zone, environment, name) WHERE status != 'deleted';

CREATE TABLE IF NOT EXISTS versions (
    id           TEXT PRIMARY KEY,
    node_id      TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
    version      INTEGER NOT NULL,
    ciphertext   BLOB NOT NULL,
    nonce        BLOB NOT NULL,
    key_version  INTEGER NOT NULL,
    chunk_index  INTEGER NOT NULL,
    chunk_count  INTEGER NOT NULL,
    total_length INTEGER NOT NULL,
    read_count   INTEGER NOT NULL DEFAULT 0,
    created_by   TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (node_id, version, chunk_index)
);

CREATE TABLE IF NOT EXISTS shares (
    id             TEXT PRIMARY KEY,
    node_id        TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
    recipient_kind TEXT NOT NULL,
    recipient_id   TEXT NOT NULL,
    permission     TEXT NOT NULL,
    created_by     TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    expires_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_shares_node ON shares (node_id);

CREATE TABLE IF NOT EXISTS roles (
    name        TEXT PRIMARY KEY,
    permissions TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,
    namespace TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (user_id, role, namespace)
);

CREATE TABLE IF NOT EXISTS group_roles (
    group_id  TEXT NOT NULL,
    role      TEXT NOT NULL,
    namespace TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (group_id, role, namespace)
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);
";

const NODE_COLUMNS: &str = "id, name, namespace, zone, environment, owner, secret_type, status,
     description, expires_at, max_reads, metadata, created_by, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, node_id, version, ciphertext, nonce, key_version, chunk_index,
     chunk_count, total_length, read_count, created_by, created_at";

const SHARE_COLUMNS: &str =
    "id, node_id, recipient_kind, recipient_id, permission, created_by, created_at, expires_at";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        let repo = Self::setup(conn, Some(path.to_path_buf()))?;
        debug!(path = %path.display(), "secret database opened");
        Ok(repo)
    }

    /// A private, non-persistent database.
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?, None)
    }

    fn setup(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn conversion_error(idx: usize, e: VaultError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = VaultError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, VaultError::Serialization(format!("timestamp: {e}"))))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, VaultError::Serialization(format!("timestamp: {e}"))))
    })
    .transpose()
}

fn parse_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    Ok(u64::try_from(raw).unwrap_or(0))
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<SecretNode> {
    let metadata: String = row.get(11)?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| conversion_error(11, VaultError::Serialization(format!("metadata: {e}"))))?;
    let max_reads: Option<i64> = row.get(10)?;

    Ok(SecretNode {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        scope: SecretScope {
            namespace: row.get(2)?,
            zone: row.get(3)?,
            environment: row.get(4)?,
        },
        owner: row.get(5)?,
        secret_type: row.get(6)?,
        status: parse_col(row, 7)?,
        description: row.get(8)?,
        expires_at: parse_opt_ts(row, 9)?,
        max_reads: max_reads.map(|n| u64::try_from(n).unwrap_or(0)),
        metadata,
        created_by: row.get(12)?,
        created_at: parse_ts(row, 13)?,
        updated_at: parse_ts(row, 14)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    Ok(VersionRecord {
        id: parse_col(row, 0)?,
        node_id: parse_col(row, 1)?,
        version: row.get(2)?,
        ciphertext: row.get(3)?,
        nonce: row.get(4)?,
        key_version: row.get(5)?,
        chunk_index: row.get(6)?,
        chunk_count: row.get(7)?,
        total_length: parse_u64(row, 8)?,
        read_count: parse_u64(row, 9)?,
        created_by: row.get(10)?,
        created_at: parse_ts(row, 11)?,
    })
}

fn share_from_row(row: &Row<'_>) -> rusqlite::Result<ShareRecord> {
    let kind: String = row.get(2)?;
    let id: String = row.get(3)?;
    Ok(ShareRecord {
        id: parse_col(row, 0)?,
        node_id: parse_col(row, 1)?,
        recipient: Recipient::from_parts(&kind, &id).map_err(|e| conversion_error(2, e))?,
        permission: parse_col(row, 4)?,
        created_by: row.get(5)?,
        created_at: parse_ts(row, 6)?,
        expires_at: parse_opt_ts(row, 7)?,
    })
}

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<RoleGrant> {
    let role: String = row.get(0)?;
    let namespace: String = row.get(1)?;
    Ok(RoleGrant {
        role,
        namespace: (!namespace.is_empty()).then_some(namespace),
    })
}

fn node_exists(conn: &Connection, id: &NodeId) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM nodes WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// SecretRepository
// ---------------------------------------------------------------------------

impl SecretRepository for SqliteRepository {
    fn create_node(&self, node: &SecretNode) -> Result<()> {
        let metadata = serde_json::to_string(&node.metadata)
            .map_err(|e| VaultError::Serialization(format!("metadata: {e}")))?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            &format!(
                "INSERT INTO nodes ({NODE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                node.id.to_string(),
                node.name,
                node.scope.namespace,
                node.scope.zone,
                node.scope.environment,
                node.owner,
                node.secret_type,
                node.status.as_str(),
                node.description,
                opt_ts(&node.expires_at),
                node.max_reads.map(to_i64),
                metadata,
                node.created_by,
                ts(&node.created_at),
                ts(&node.updated_at),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(VaultError::AlreadyExists(format!(
                "secret '{}' in {}",
                node.name, node.scope
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn get_node(&self, id: &NodeId) -> Result<SecretNode> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
            params![id.to_string()],
            node_from_row,
        )
        .optional()?
        .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))
    }

    fn find_node(&self, scope: &SecretScope, name: &str) -> Result<Option<SecretNode>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE namespace = ?1 AND zone = ?2 AND environment = ?3 AND name = ?4
                       AND status != 'deleted'"
                ),
                params![scope.namespace, scope.zone, scope.environment, name],
                node_from_row,
            )
            .optional()?)
    }

    fn list_nodes(&self, namespace: Option<&str>) -> Result<Vec<SecretNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE status != 'deleted' AND (?1 IS NULL OR namespace = ?1)
             ORDER BY name, created_at"
        ))?;
        let rows = stmt.query_map(params![namespace], node_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_node_status(&self, id: &NodeId, status: NodeStatus) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: NodeStatus = tx
            .query_row(
                "SELECT status FROM nodes WHERE id = ?1",
                params![id.to_string()],
                |row| parse_col(row, 0),
            )
            .optional()?
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))?;

        if current == status {
            return Ok(());
        }
        if !current.can_transition_to(status) {
            return Err(VaultError::Validation(format!(
                "cannot move secret from {current} to {status}"
            )));
        }

        tx.execute(
            "UPDATE nodes SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), ts(&Utc::now())],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_node_expiration(
        &self,
        id: &NodeId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE nodes SET expires_at = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), opt_ts(&expires_at), ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(VaultError::NotFound(format!("secret {id}")));
        }
        Ok(())
    }

    fn mark_deleted(&self, id: &NodeId) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !node_exists(&tx, id)? {
            return Err(VaultError::NotFound(format!("secret {id}")));
        }
        tx.execute(
            "UPDATE nodes SET status = 'deleted', updated_at = ?2
             WHERE id = ?1 AND status != 'deleted'",
            params![id.to_string(), ts(&Utc::now())],
        )?;
        tx.execute(
            "DELETE FROM shares WHERE node_id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn purge_node(&self, id: &NodeId) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = id.to_string();
        tx.execute("DELETE FROM versions WHERE node_id = ?1", params![key])?;
        tx.execute("DELETE FROM shares WHERE node_id = ?1", params![key])?;
        let removed = tx.execute("DELETE FROM nodes WHERE id = ?1", params![key])?;
        if removed == 0 {
            return Err(VaultError::NotFound(format!("secret {id}")));
        }
        tx.commit()?;
        Ok(())
    }

    fn max_version(&self, node_id: &NodeId) -> Result<u32> {
        let conn = self.conn.lock();
        if !node_exists(&conn, node_id)? {
            return Err(VaultError::NotFound(format!("secret {node_id}")));
        }
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM versions WHERE node_id = ?1",
            params![node_id.to_string()],
            |row| row.get(0),
        )?)
    }

    fn append_version_records(
        &self,
        node_id: &NodeId,
        expected_max: u32,
        records: &[VersionRecord],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !node_exists(&tx, node_id)? {
            return Err(VaultError::NotFound(format!("secret {node_id}")));
        }

        let current: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM versions WHERE node_id = ?1",
            params![node_id.to_string()],
            |row| row.get(0),
        )?;
        if current != expected_max {
            return Err(VaultError::Concurrency(format!(
                "secret {node_id} advanced to version {current} (expected {expected_max})"
            )));
        }

        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO versions ({VERSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ))?;
            for record in records {
                insert.execute(params![
                    record.id.to_string(),
                    node_id.to_string(),
                    record.version,
                    record.ciphertext,
                    record.nonce,
                    record.key_version,
                    record.chunk_index,
                    record.chunk_count,
                    to_i64(record.total_length),
                    to_i64(record.read_count),
                    record.created_by,
                    ts(&record.created_at),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn query_versions(&self, node_id: &NodeId) -> Result<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE node_id = ?1 ORDER BY version, chunk_index"
        ))?;
        let rows = stmt.query_map(params![node_id.to_string()], version_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_version_chunks(&self, node_id: &NodeId, version: u32) -> Result<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE node_id = ?1 AND version = ?2 ORDER BY chunk_index"
        ))?;
        let rows = stmt.query_map(params![node_id.to_string(), version], version_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_version_record(&self, id: &VersionId) -> Result<VersionRecord> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM versions WHERE id = ?1"),
            params![id.to_string()],
            version_from_row,
        )
        .optional()?
        .ok_or_else(|| VaultError::NotFound(format!("version {id}")))
    }

    fn increment_read_count(&self, id: &VersionId) -> Result<u64> {
        let conn = self.conn.lock();
        let count: Option<i64> = conn
            .query_row(
                "UPDATE versions SET read_count = read_count + 1 WHERE id = ?1
                 RETURNING read_count",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        count
            .map(|n| u64::try_from(n).unwrap_or(0))
            .ok_or_else(|| VaultError::NotFound(format!("version {id}")))
    }

    fn create_share(&self, share: &ShareRecord) -> Result<()> {
        let conn = self.conn.lock();
        if !node_exists(&conn, &share.node_id)? {
            return Err(VaultError::NotFound(format!("secret {}", share.node_id)));
        }
        conn.execute(
            &format!(
                "INSERT INTO shares ({SHARE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                share.id.to_string(),
                share.node_id.to_string(),
                share.recipient.kind(),
                share.recipient.id(),
                share.permission.as_str(),
                share.created_by,
                ts(&share.created_at),
                opt_ts(&share.expires_at),
            ],
        )?;
        Ok(())
    }

    fn get_share(&self, id: &ShareId) -> Result<Option<ShareRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = ?1"),
                params![id.to_string()],
                share_from_row,
            )
            .optional()?)
    }

    fn delete_share(&self, id: &ShareId) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM shares WHERE id = ?1", params![id.to_string()])?;
        Ok(removed > 0)
    }

    fn query_shares(&self, node_id: &NodeId) -> Result<Vec<ShareRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE node_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![node_id.to_string()], share_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_role(&self, role: &Role) -> Result<()> {
        role.validate()?;
        let permissions = serde_json::to_string(&role.permissions)
            .map_err(|e| VaultError::Serialization(format!("role permissions: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO roles (name, permissions) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET permissions = excluded.permissions",
            params![role.name, permissions],
        )?;
        Ok(())
    }

    fn get_role(&self, name: &str) -> Result<Option<Role>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT permissions FROM roles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map(|permissions| Role {
                    name: name.to_string(),
                    permissions,
                })
                .map_err(|e| VaultError::Serialization(format!("role permissions: {e}")))
        })
        .transpose()
    }

    fn grant_user_role(&self, user: &str, grant: &RoleGrant) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role, namespace) VALUES (?1, ?2, ?3)",
            params![user, grant.role, grant.namespace.as_deref().unwrap_or("")],
        )?;
        Ok(())
    }

    fn grant_group_role(&self, group: &str, grant: &RoleGrant) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO group_roles (group_id, role, namespace) VALUES (?1, ?2, ?3)",
            params![group, grant.role, grant.namespace.as_deref().unwrap_or("")],
        )?;
        Ok(())
    }

    fn add_group_member(&self, group: &str, user: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group, user],
        )?;
        Ok(())
    }

    fn query_roles_for_principal(&self, user: &str) -> Result<Vec<RoleGrant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, namespace FROM user_roles WHERE user_id = ?1 ORDER BY role, namespace",
        )?;
        let rows = stmt.query_map(params![user], grant_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_groups_for_principal(&self, user: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT group_id FROM group_members WHERE user_id = ?1 ORDER BY group_id")?;
        let rows = stmt.query_map(params![user], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_roles_for_group(&self, group: &str) -> Result<Vec<RoleGrant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, namespace FROM group_roles WHERE group_id = ?1 ORDER BY role, namespace",
        )?;
        let rows = stmt.query_map(params![group], grant_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::model::SharePermission;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn node(name: &str) -> SecretNode {
        let now = Utc::now();
        let mut metadata = BTreeMap::new();
        metadata.insert("team".to_string(), "payments".to_string());
        SecretNode {
            id: NodeId::new(),
            name: name.to_string(),
            scope: SecretScope::new("n1", "z1", "dev"),
            owner: "u1".into(),
            secret_type: "password".into(),
            status: NodeStatus::Active,
            description: Some("primary database".into()),
            expires_at: Some(now + chrono::Duration::days(1)),
            max_reads: Some(3),
            metadata,
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn record(node_id: NodeId, version: u32, chunk_index: u32, chunk_count: u32) -> VersionRecord {
        VersionRecord {
            id: VersionId::new(),
            node_id,
            version,
            ciphertext: vec![7; 32],
            nonce: vec![1; 12],
            key_version: 1,
            chunk_index,
            chunk_count,
            total_length: 16,
            read_count: 0,
            created_by: "u1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn node_roundtrip() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let n = node("db-password");
        repo.create_node(&n).unwrap();

        let loaded = repo.get_node(&n.id).unwrap();
        assert_eq!(loaded.name, n.name);
        assert_eq!(loaded.scope, n.scope);
        assert_eq!(loaded.max_reads, Some(3));
        assert_eq!(loaded.metadata, n.metadata);
        assert_eq!(loaded.status, NodeStatus::Active);

        let found = repo.find_node(&n.scope, "db-password").unwrap().unwrap();
        assert_eq!(found.id, n.id);
    }

    #[test]
    fn duplicate_live_name_is_rejected() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let first = node("api-key");
        repo.create_node(&first).unwrap();
        assert!(matches!(
            repo.create_node(&node("api-key")),
            Err(VaultError::AlreadyExists(_))
        ));

        repo.mark_deleted(&first.id).unwrap();
        repo.create_node(&node("api-key")).unwrap();
        assert_eq!(repo.list_nodes(Some("n1")).unwrap().len(), 1);
    }

    #[test]
    fn append_is_conditional_on_max_version() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let n = node("a");
        repo.create_node(&n).unwrap();

        let v1 = [record(n.id, 1, 0, 2), record(n.id, 1, 1, 2)];
        repo.append_version_records(&n.id, 0, &v1).unwrap();
        assert_eq!(repo.max_version(&n.id).unwrap(), 1);

        let stale = repo.append_version_records(&n.id, 0, &[record(n.id, 1, 0, 1)]);
        assert!(matches!(stale, Err(VaultError::Concurrency(_))));

        let chunks = repo.query_version_chunks(&n.id, 1).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn read_count_is_atomic_counter() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let n = node("a");
        repo.create_node(&n).unwrap();
        let head = record(n.id, 1, 0, 1);
        repo.append_version_records(&n.id, 0, &[head.clone()]).unwrap();

        assert_eq!(repo.increment_read_count(&head.id).unwrap(), 1);
        assert_eq!(repo.increment_read_count(&head.id).unwrap(), 2);
        assert!(matches!(
            repo.increment_read_count(&VersionId::new()),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn shares_removed_on_delete() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let n = node("a");
        repo.create_node(&n).unwrap();
        let share = ShareRecord {
            id: ShareId::new(),
            node_id: n.id,
            recipient: Recipient::Group("ops".into()),
            permission: SharePermission::Read,
            created_by: "u1".into(),
            created_at: Utc::now(),
            expires_at: None,
        };
        repo.create_share(&share).unwrap();
        assert_eq!(repo.query_shares(&n.id).unwrap(), vec![share.clone()]);

        repo.mark_deleted(&n.id).unwrap();
        assert!(repo.query_shares(&n.id).unwrap().is_empty());
        assert!(!repo.delete_share(&share.id).unwrap());
    }

    #[test]
    fn malformed_role_is_not_stored() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert!(matches!(
            repo.create_role(&Role::new("reader", ["secrets"])),
            Err(VaultError::Validation(_))
        ));
        assert!(repo.get_role("reader").unwrap().is_none());
    }

    #[test]
    fn role_grants_keep_namespace_scope() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create_role(&Role::new("reader", ["secrets.read"]))
            .unwrap();
        repo.grant_user_role("u2", &RoleGrant::scoped("reader", "n1"))
            .unwrap();
        repo.grant_user_role("u2", &RoleGrant::global("reader"))
            .unwrap();
        repo.add_group_member("ops", "u2").unwrap();
        repo.grant_group_role("ops", &RoleGrant::global("reader"))
            .unwrap();

        let grants = repo.query_roles_for_principal("u2").unwrap();
        assert_eq!(
            grants,
            vec![RoleGrant::global("reader"), RoleGrant::scoped("reader", "n1")]
        );
        assert_eq!(repo.query_groups_for_principal("u2").unwrap(), vec!["ops"]);
        assert_eq!(
            repo.get_role("reader").unwrap().unwrap().permissions.len(),
            1
        );
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.db");
        let n = node("a");
        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.create_node(&n).unwrap();
        }
        let repo = SqliteRepository::open(&path).unwrap();
        assert_eq!(repo.get_node(&n.id).unwrap().name, "a");
    }

    #[cfg(unix)]
    #[test]
    fn database_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.db");
        let _repo = SqliteRepository::open(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
