//! Persistent store for nodes, versions, shares, roles and groups.
//!
//! The engine never talks to a database directly; it consumes the
//! `SecretRepository` trait.  Two implementations ship with the crate:
//! - `MemoryRepository`: process-local maps behind a lock (`memory`)
//! - `SqliteRepository`: a bundled SQLite database (`sqlite`)
//!
//! Errors distinguish `NotFound`, write conflicts (`Concurrency`) and
//! transient backend failures (`StorageUnavailable`).

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::access::model::{Role, RoleGrant, ShareId, ShareRecord};
use crate::errors::Result;
use crate::vault::secret::{NodeId, NodeStatus, SecretNode, SecretScope, VersionId, VersionRecord};

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

pub trait SecretRepository: Send + Sync {
    // --- Nodes ---

    /// Insert a node.  `AlreadyExists` if a non-deleted node with the same
    /// name exists in the same scope.
    fn create_node(&self, node: &SecretNode) -> Result<()>;

    fn get_node(&self, id: &NodeId) -> Result<SecretNode>;

    /// Look up a non-deleted node by scope and name.
    fn find_node(&self, scope: &SecretScope, name: &str) -> Result<Option<SecretNode>>;

    /// Non-deleted nodes, optionally limited to one namespace, sorted by name.
    fn list_nodes(&self, namespace: Option<&str>) -> Result<Vec<SecretNode>>;

    /// Move a node to `status`.  Re-applying the current status is a no-op;
    /// transitions the state machine forbids fail with `Validation`.
    fn update_node_status(&self, id: &NodeId, status: NodeStatus) -> Result<()>;

    fn update_node_expiration(&self, id: &NodeId, expires_at: Option<DateTime<Utc>>)
        -> Result<()>;

    /// Tombstone the node and remove its shares.
    fn mark_deleted(&self, id: &NodeId) -> Result<()>;

    /// Hard-delete the node, its versions and its shares.
    fn purge_node(&self, id: &NodeId) -> Result<()>;

    // --- Versions ---

    /// Highest version number recorded for the node (0 if none).
    fn max_version(&self, node_id: &NodeId) -> Result<u32>;

    /// Append the records of one logical version.
    ///
    /// Succeeds only if the node's max version still equals `expected_max`;
    /// otherwise fails with `Concurrency` and writes nothing.
    fn append_version_records(
        &self,
        node_id: &NodeId,
        expected_max: u32,
        records: &[VersionRecord],
    ) -> Result<()>;

    /// Every record of the node ordered by (version, chunk_index).
    fn query_versions(&self, node_id: &NodeId) -> Result<Vec<VersionRecord>>;

    /// The records of one version ordered by chunk_index.
    fn query_version_chunks(&self, node_id: &NodeId, version: u32) -> Result<Vec<VersionRecord>>;

    fn get_version_record(&self, id: &VersionId) -> Result<VersionRecord>;

    /// Atomically bump a record's read counter; returns the new value.
    fn increment_read_count(&self, id: &VersionId) -> Result<u64>;

    // --- Shares ---

    fn create_share(&self, share: &ShareRecord) -> Result<()>;

    fn get_share(&self, id: &ShareId) -> Result<Option<ShareRecord>>;

    /// Returns `false` if no such share existed.
    fn delete_share(&self, id: &ShareId) -> Result<bool>;

    fn query_shares(&self, node_id: &NodeId) -> Result<Vec<ShareRecord>>;

    // --- Roles and groups ---

    /// Insert or replace a role definition.
    fn create_role(&self, role: &Role) -> Result<()>;

    fn get_role(&self, name: &str) -> Result<Option<Role>>;

    fn grant_user_role(&self, user: &str, grant: &RoleGrant) -> Result<()>;

    fn grant_group_role(&self, group: &str, grant: &RoleGrant) -> Result<()>;

    fn add_group_member(&self, group: &str, user: &str) -> Result<()>;

    fn query_roles_for_principal(&self, user: &str) -> Result<Vec<RoleGrant>>;

    fn query_groups_for_principal(&self, user: &str) -> Result<Vec<String>>;

    fn query_roles_for_group(&self, group: &str) -> Result<Vec<RoleGrant>>;
}
