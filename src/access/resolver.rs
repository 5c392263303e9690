//! Effective-permission resolution.
//!
//! A principal's rights over a secret are the union of every source that
//! grants anything: ownership, directly granted roles, roles granted to
//! any of its groups, active user shares and active group shares.
//! Nothing subtracts.  Results are computed fresh on every call.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::trace;

use super::model::{Action, PermissionSet, Principal, RoleGrant};
use crate::errors::Result;
use crate::storage::SecretRepository;
use crate::vault::secret::SecretNode;

pub struct PermissionResolver {
    repo: Arc<dyn SecretRepository>,
}

impl PermissionResolver {
    pub fn new(repo: Arc<dyn SecretRepository>) -> Self {
        Self { repo }
    }

    /// Every group the principal belongs to, from the caller and the store.
    pub fn groups_of(&self, principal: &Principal) -> Result<BTreeSet<String>> {
        let mut groups = principal.groups.clone();
        groups.extend(self.repo.query_groups_for_principal(&principal.id)?);
        Ok(groups)
    }

    pub fn resolve(&self, principal: &Principal, node: &SecretNode) -> Result<PermissionSet> {
        if node.owner == principal.id {
            trace!(principal = %principal.id, node_id = %node.id, "owner has full access");
            return Ok(PermissionSet::FULL);
        }

        let groups = self.groups_of(principal)?;

        let mut grants: BTreeSet<RoleGrant> = principal.roles.iter().cloned().collect();
        grants.extend(self.repo.query_roles_for_principal(&principal.id)?);
        for group in &groups {
            grants.extend(self.repo.query_roles_for_group(group)?);
        }

        let mut effective = PermissionSet::default();
        for grant in grants
            .iter()
            .filter(|g| g.applies_to(&node.scope.namespace))
        {
            let Some(role) = self.repo.get_role(&grant.role)? else {
                continue;
            };
            for perm in &role.permissions {
                effective = effective.union(PermissionSet::from_permission(perm));
            }
            if effective.is_full() {
                return Ok(effective);
            }
        }

        let now = Utc::now();
        for share in self.repo.query_shares(&node.id)? {
            if share.is_active(now) && share.names(&principal.id, &groups) {
                effective = effective.union(PermissionSet::from_share(share.permission));
            }
        }

        trace!(
            principal = %principal.id,
            node_id = %node.id,
            can_read = effective.can_read,
            can_write = effective.can_write,
            "permissions resolved"
        );
        Ok(effective)
    }

    pub fn check(&self, principal: &Principal, node: &SecretNode, action: Action) -> Result<bool> {
        Ok(self.resolve(principal, node)?.allows(action))
    }
}
