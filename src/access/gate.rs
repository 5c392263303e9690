//! The access gate in front of every secret operation.
//!
//! Checks run in a fixed order so that lifecycle state always wins over
//! permissions: a deleted or expired secret is refused even for its owner.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::model::{Action, Principal};
use super::resolver::PermissionResolver;
use crate::errors::{Result, VaultError};
use crate::storage::SecretRepository;
use crate::vault::secret::{NodeStatus, SecretNode, VersionRecord};

pub struct AccessGate {
    repo: Arc<dyn SecretRepository>,
    resolver: PermissionResolver,
}

impl AccessGate {
    pub fn new(repo: Arc<dyn SecretRepository>) -> Self {
        Self {
            resolver: PermissionResolver::new(repo.clone()),
            repo,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Authorize reading `node`, optionally a specific version of it.
    ///
    /// `head` is the head record of the version about to be read; its read
    /// counter is compared with the node's `max_reads`.
    pub fn authorize_read(
        &self,
        principal: &Principal,
        node: &SecretNode,
        head: Option<&VersionRecord>,
    ) -> Result<()> {
        self.check_lifecycle(node)?;

        if let (Some(limit), Some(head)) = (node.max_reads, head) {
            if head.read_count >= limit {
                return Err(VaultError::ReadLimitExceeded);
            }
        }

        self.require(principal, node, Action::Read)
    }

    /// Authorize modifying `node`: lifecycle checks plus `can_write`.
    pub fn authorize_write(&self, principal: &Principal, node: &SecretNode) -> Result<()> {
        self.check_lifecycle(node)?;
        self.require(principal, node, Action::Write)
    }

    /// Permission check only; lifecycle state is ignored.
    pub fn require(&self, principal: &Principal, node: &SecretNode, action: Action) -> Result<()> {
        if self.resolver.check(principal, node, action)? {
            Ok(())
        } else {
            Err(VaultError::PermissionDenied)
        }
    }

    fn check_lifecycle(&self, node: &SecretNode) -> Result<()> {
        match node.status {
            NodeStatus::Deleted => return Err(VaultError::NotFound(format!("secret {}", node.id))),
            NodeStatus::Expired => return Err(VaultError::Expired),
            NodeStatus::Active => {}
        }

        if node.is_past_expiration(Utc::now()) {
            match self.repo.update_node_status(&node.id, NodeStatus::Expired) {
                Ok(()) => info!(node_id = %node.id, "secret expired"),
                // A concurrent delete may have won; the read is refused either way.
                Err(e) => warn!(node_id = %node.id, error = %e, "could not persist expiration"),
            }
            return Err(VaultError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::model::RoleGrant;
    use crate::access::model::Role;
    use crate::storage::MemoryRepository;
    use crate::vault::secret::{NodeId, SecretScope, VersionId};

    fn setup(expires_in: Option<chrono::Duration>) -> (Arc<MemoryRepository>, AccessGate, SecretNode) {
        let repo = Arc::new(MemoryRepository::new());
        let now = Utc::now();
        let node = SecretNode {
            id: NodeId::new(),
            name: "a".into(),
            scope: SecretScope::new("n", "z", "e"),
            owner: "owner".into(),
            secret_type: "generic".into(),
            status: NodeStatus::Active,
            description: None,
            expires_at: expires_in.map(|d| now + d),
            max_reads: Some(2),
            metadata: Default::default(),
            created_by: "owner".into(),
            created_at: now,
            updated_at: now,
        };
        repo.create_node(&node).unwrap();
        (repo.clone(), AccessGate::new(repo), node)
    }

    fn head(read_count: u64, node: &SecretNode) -> VersionRecord {
        VersionRecord {
            id: VersionId::new(),
            node_id: node.id,
            version: 1,
            ciphertext: vec![],
            nonce: vec![],
            key_version: 1,
            chunk_index: 0,
            chunk_count: 1,
            total_length: 0,
            read_count,
            created_by: "owner".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn past_expiration_is_persisted_and_denied() {
        let (repo, gate, node) = setup(Some(chrono::Duration::seconds(-1)));
        let owner = Principal::new("owner");
        assert!(matches!(
            gate.authorize_read(&owner, &node, None),
            Err(VaultError::Expired)
        ));
        assert_eq!(repo.get_node(&node.id).unwrap().status, NodeStatus::Expired);
    }

    #[test]
    fn read_limit_checked_before_permission() {
        let (_repo, gate, node) = setup(None);
        let stranger = Principal::new("u9");
        assert!(matches!(
            gate.authorize_read(&stranger, &node, Some(&head(2, &node))),
            Err(VaultError::ReadLimitExceeded)
        ));
        assert!(matches!(
            gate.authorize_read(&stranger, &node, Some(&head(1, &node))),
            Err(VaultError::PermissionDenied)
        ));
    }

    #[test]
    fn deleted_node_looks_missing() {
        let (_repo, gate, mut node) = setup(None);
        node.status = NodeStatus::Deleted;
        assert!(matches!(
            gate.authorize_write(&Principal::new("owner"), &node),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn write_requires_can_write() {
        let (repo, gate, node) = setup(None);
        repo.create_role(&Role::new("reader", ["secrets.read"]))
            .unwrap();
        let reader = Principal::new("u2").with_role(RoleGrant::global("reader"));
        assert!(gate.authorize_read(&reader, &node, None).is_ok());
        assert!(matches!(
            gate.authorize_write(&reader, &node),
            Err(VaultError::PermissionDenied)
        ));
    }
}
