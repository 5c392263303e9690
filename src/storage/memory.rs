//! In-memory repository.
//!
//! Every method takes the lock once, so each call is atomic with respect
//! to the others.  Used by tests and by embedders that bring their own
//! persistence.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::SecretRepository;
use crate::access::model::{Role, RoleGrant, ShareId, ShareRecord};
use crate::errors::{Result, VaultError};
use crate::vault::secret::{NodeId, NodeStatus, SecretNode, SecretScope, VersionId, VersionRecord};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, SecretNode>,
    versions: HashMap<NodeId, Vec<VersionRecord>>,
    version_owner: HashMap<VersionId, NodeId>,
    shares: HashMap<ShareId, ShareRecord>,
    roles: HashMap<String, Role>,
    user_roles: HashMap<String, BTreeSet<RoleGrant>>,
    group_roles: HashMap<String, BTreeSet<RoleGrant>>,
    group_members: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn node_mut(&mut self, id: &NodeId) -> Result<&mut SecretNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))
    }

    fn max_version(&self, id: &NodeId) -> u32 {
        self.versions
            .get(id)
            .and_then(|records| records.iter().map(|r| r.version).max())
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretRepository for MemoryRepository {
    fn create_node(&self, node: &SecretNode) -> Result<()> {
        let mut inner = self.inner.write();
        let duplicate = inner.nodes.values().any(|n| {
            n.status != NodeStatus::Deleted && n.scope == node.scope && n.name == node.name
        });
        if duplicate {
            return Err(VaultError::AlreadyExists(format!(
                "secret '{}' in {}",
                node.name, node.scope
            )));
        }
        inner.nodes.insert(node.id, node.clone());
        Ok(())
    }

    fn get_node(&self, id: &NodeId) -> Result<SecretNode> {
        self.inner
            .read()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))
    }

    fn find_node(&self, scope: &SecretScope, name: &str) -> Result<Option<SecretNode>> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .find(|n| n.status != NodeStatus::Deleted && &n.scope == scope && n.name == name)
            .cloned())
    }

    fn list_nodes(&self, namespace: Option<&str>) -> Result<Vec<SecretNode>> {
        let inner = self.inner.read();
        let mut nodes: Vec<SecretNode> = inner
            .nodes
            .values()
            .filter(|n| n.status != NodeStatus::Deleted)
            .filter(|n| namespace.map_or(true, |ns| n.scope.namespace == ns))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(nodes)
    }

    fn update_node_status(&self, id: &NodeId, status: NodeStatus) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.node_mut(id)?;
        if node.status == status {
            return Ok(());
        }
        if !node.status.can_transition_to(status) {
            return Err(VaultError::Validation(format!(
                "cannot move secret from {} to {}",
                node.status, status
            )));
        }
        node.status = status;
        node.updated_at = Utc::now();
        Ok(())
    }

    fn update_node_expiration(
        &self,
        id: &NodeId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.node_mut(id)?;
        node.expires_at = expires_at;
        node.updated_at = Utc::now();
        Ok(())
    }

    fn mark_deleted(&self, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.node_mut(id)?;
        if node.status != NodeStatus::Deleted {
            node.status = NodeStatus::Deleted;
            node.updated_at = Utc::now();
        }
        inner.shares.retain(|_, s| s.node_id != *id);
        Ok(())
    }

    fn purge_node(&self, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.nodes.remove(id).is_none() {
            return Err(VaultError::NotFound(format!("secret {id}")));
        }
        if let Some(records) = inner.versions.remove(id) {
            for record in records {
                inner.version_owner.remove(&record.id);
            }
        }
        inner.shares.retain(|_, s| s.node_id != *id);
        Ok(())
    }

    fn max_version(&self, node_id: &NodeId) -> Result<u32> {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(node_id) {
            return Err(VaultError::NotFound(format!("secret {node_id}")));
        }
        Ok(inner.max_version(node_id))
    }

    fn append_version_records(
        &self,
        node_id: &NodeId,
        expected_max: u32,
        records: &[VersionRecord],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(node_id) {
            return Err(VaultError::NotFound(format!("secret {node_id}")));
        }

        let current = inner.max_version(node_id);
        if current != expected_max {
            return Err(VaultError::Concurrency(format!(
                "secret {node_id} advanced to version {current} (expected {expected_max})"
            )));
        }

        for record in records {
            inner.version_owner.insert(record.id, *node_id);
        }
        inner
            .versions
            .entry(*node_id)
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }

    fn query_versions(&self, node_id: &NodeId) -> Result<Vec<VersionRecord>> {
        let mut records = self
            .inner
            .read()
            .versions
            .get(node_id)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| (r.version, r.chunk_index));
        Ok(records)
    }

    fn query_version_chunks(&self, node_id: &NodeId, version: u32) -> Result<Vec<VersionRecord>> {
        let inner = self.inner.read();
        let mut chunks: Vec<VersionRecord> = inner
            .versions
            .get(node_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.version == version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        chunks.sort_by_key(|r| r.chunk_index);
        Ok(chunks)
    }

    fn get_version_record(&self, id: &VersionId) -> Result<VersionRecord> {
        let inner = self.inner.read();
        inner
            .version_owner
            .get(id)
            .and_then(|node_id| inner.versions.get(node_id))
            .and_then(|records| records.iter().find(|r| r.id == *id))
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("version {id}")))
    }

    fn increment_read_count(&self, id: &VersionId) -> Result<u64> {
        let mut inner = self.inner.write();
        let node_id = *inner
            .version_owner
            .get(id)
            .ok_or_else(|| VaultError::NotFound(format!("version {id}")))?;
        let record = inner
            .versions
            .get_mut(&node_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == *id))
            .ok_or_else(|| VaultError::NotFound(format!("version {id}")))?;
        record.read_count += 1;
        Ok(record.read_count)
    }

    fn create_share(&self, share: &ShareRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(&share.node_id) {
            return Err(VaultError::NotFound(format!("secret {}", share.node_id)));
        }
        inner.shares.insert(share.id, share.clone());
        Ok(())
    }

    fn get_share(&self, id: &ShareId) -> Result<Option<ShareRecord>> {
        Ok(self.inner.read().shares.get(id).cloned())
    }

    fn delete_share(&self, id: &ShareId) -> Result<bool> {
        Ok(self.inner.write().shares.remove(id).is_some())
    }

    fn query_shares(&self, node_id: &NodeId) -> Result<Vec<ShareRecord>> {
        let mut shares: Vec<ShareRecord> = self
            .inner
            .read()
            .shares
            .values()
            .filter(|s| s.node_id == *node_id)
            .cloned()
            .collect();
        shares.sort_by_key(|s| s.created_at);
        Ok(shares)
    }

    fn create_role(&self, role: &Role) -> Result<()> {
        role.validate()?;
        self.inner
            .write()
            .roles
            .insert(role.name.clone(), role.clone());
        Ok(())
    }

    fn get_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.inner.read().roles.get(name).cloned())
    }

    fn grant_user_role(&self, user: &str, grant: &RoleGrant) -> Result<()> {
        self.inner
            .write()
            .user_roles
            .entry(user.to_string())
            .or_default()
            .insert(grant.clone());
        Ok(())
    }

    fn grant_group_role(&self, group: &str, grant: &RoleGrant) -> Result<()> {
        self.inner
            .write()
            .group_roles
            .entry(group.to_string())
            .or_default()
            .insert(grant.clone());
        Ok(())
    }

    fn add_group_member(&self, group: &str, user: &str) -> Result<()> {
        self.inner
            .write()
            .group_members
            .entry(group.to_string())
            .or_default()
            .insert(user.to_string());
        Ok(())
    }

    fn query_roles_for_principal(&self, user: &str) -> Result<Vec<RoleGrant>> {
        Ok(self
            .inner
            .read()
            .user_roles
            .get(user)
            .map(|grants| grants.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn query_groups_for_principal(&self, user: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut groups: Vec<String> = inner
            .group_members
            .iter()
            .filter(|(_, members)| members.contains(user))
            .map(|(group, _)| group.clone())
            .collect();
        groups.sort();
        Ok(groups)
    }

    fn query_roles_for_group(&self, group: &str) -> Result<Vec<RoleGrant>> {
        Ok(self
            .inner
            .read()
            .group_roles
            .get(group)
            .map(|grants| grants.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(name: &str) -> SecretNode {
        let now = Utc::now();
        SecretNode {
            id: NodeId::new(),
            name: name.to_string(),
            scope: SecretScope::new("n1", "z1", "dev"),
            owner: "u1".into(),
            secret_type: "generic".into(),
            status: NodeStatus::Active,
            description: None,
            expires_at: None,
            max_reads: None,
            metadata: BTreeMap::new(),
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn record(node_id: NodeId, version: u32) -> VersionRecord {
        VersionRecord {
            id: VersionId::new(),
            node_id,
            version,
            ciphertext: vec![1, 2, 3],
            nonce: vec![0; 12],
            key_version: 1,
            chunk_index: 0,
            chunk_count: 1,
            total_length: 3,
            read_count: 0,
            created_by: "u1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_names_rejected_until_deleted() {
        let repo = MemoryRepository::new();
        let first = node("db-password");
        repo.create_node(&first).unwrap();
        assert!(matches!(
            repo.create_node(&node("db-password")),
            Err(VaultError::AlreadyExists(_))
        ));

        repo.mark_deleted(&first.id).unwrap();
        repo.create_node(&node("db-password")).unwrap();
    }

    #[test]
    fn append_checks_expected_max() {
        let repo = MemoryRepository::new();
        let n = node("a");
        repo.create_node(&n).unwrap();

        repo.append_version_records(&n.id, 0, &[record(n.id, 1)])
            .unwrap();
        let stale = repo.append_version_records(&n.id, 0, &[record(n.id, 1)]);
        assert!(matches!(stale, Err(VaultError::Concurrency(_))));
        assert_eq!(repo.max_version(&n.id).unwrap(), 1);
    }

    #[test]
    fn read_count_increments() {
        let repo = MemoryRepository::new();
        let n = node("a");
        repo.create_node(&n).unwrap();
        let r = record(n.id, 1);
        repo.append_version_records(&n.id, 0, &[r.clone()]).unwrap();

        assert_eq!(repo.increment_read_count(&r.id).unwrap(), 1);
        assert_eq!(repo.increment_read_count(&r.id).unwrap(), 2);
        assert_eq!(repo.get_version_record(&r.id).unwrap().read_count, 2);
    }

    #[test]
    fn status_machine_is_enforced() {
        let repo = MemoryRepository::new();
        let n = node("a");
        repo.create_node(&n).unwrap();
        repo.update_node_status(&n.id, NodeStatus::Expired).unwrap();
        assert!(repo.update_node_status(&n.id, NodeStatus::Active).is_err());
        repo.update_node_status(&n.id, NodeStatus::Expired).unwrap();
    }

    #[test]
    fn purge_removes_everything() {
        let repo = MemoryRepository::new();
        let n = node("a");
        repo.create_node(&n).unwrap();
        let r = record(n.id, 1);
        repo.append_version_records(&n.id, 0, &[r.clone()]).unwrap();
        repo.mark_deleted(&n.id).unwrap();
        repo.purge_node(&n.id).unwrap();

        assert!(matches!(repo.get_node(&n.id), Err(VaultError::NotFound(_))));
        assert!(matches!(
            repo.get_version_record(&r.id),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_role_is_not_stored() {
        let repo = MemoryRepository::new();
        assert!(repo.create_role(&Role::new("Reader", ["secrets.read"])).is_err());
        assert!(repo.create_role(&Role::new("reader", ["a.b.c"])).is_err());
        assert!(repo.get_role("reader").unwrap().is_none());
    }
}
