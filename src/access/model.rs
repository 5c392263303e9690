//! Principals, roles, groups and share grants.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, VaultError};
use crate::vault::secret::{uuid_id, validate_principal, validate_scope_part, NodeId};

/// An already-authenticated caller.
///
/// `roles` and `groups` are what the authentication layer knows about the
/// caller; the resolver unions them with what the repository records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub id: String,
    pub roles: Vec<RoleGrant>,
    pub groups: BTreeSet<String>,
}

impl Principal {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, grant: RoleGrant) -> Self {
        self.roles.push(grant);
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.insert(group.to_string());
        self
    }
}

/// A named bundle of `resource.action` permission strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: BTreeSet<String>,
}

impl Role {
    pub fn new<I, S>(name: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_scope_part("role name", &self.name)?;
        for perm in &self.permissions {
            if perm != "*" && !is_resource_action(perm) {
                return Err(VaultError::Validation(format!(
                    "permission '{perm}' must have the form 'resource.action'"
                )));
            }
        }
        Ok(())
    }
}

fn is_resource_action(perm: &str) -> bool {
    match perm.split_once('.') {
        Some((resource, action)) => {
            !resource.is_empty() && !action.is_empty() && !action.contains('.')
        }
        None => false,
    }
}

/// A role granted to a user or group, optionally limited to one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    /// `None` is a global grant.
    pub namespace: Option<String>,
}

impl RoleGrant {
    pub fn global(role: &str) -> Self {
        Self {
            role: role.to_string(),
            namespace: None,
        }
    }

    pub fn scoped(role: &str, namespace: &str) -> Self {
        Self {
            role: role.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Whether this grant applies to a secret in `namespace`.
    pub fn applies_to(&self, namespace: &str) -> bool {
        self.namespace.as_deref().map_or(true, |ns| ns == namespace)
    }
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

uuid_id!(
    /// Identifier of a `ShareRecord`.
    ShareId
);

/// Who a share grants access to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    User(String),
    Group(String),
}

impl Recipient {
    pub fn kind(&self) -> &'static str {
        match self {
            Recipient::User(_) => "user",
            Recipient::Group(_) => "group",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Recipient::User(id) | Recipient::Group(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: &str) -> Result<Self> {
        match kind {
            "user" => Ok(Recipient::User(id.to_string())),
            "group" => Ok(Recipient::Group(id.to_string())),
            other => Err(VaultError::Serialization(format!(
                "unknown recipient kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// What a share grants.  A `Write` share does not imply read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    Write,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::Write => "write",
        }
    }
}

impl fmt::Display for SharePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharePermission {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(SharePermission::Read),
            "write" => Ok(SharePermission::Write),
            other => Err(VaultError::Validation(format!(
                "unknown share permission '{other}' (expected 'read' or 'write')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: ShareId,
    pub node_id: NodeId,
    pub recipient: Recipient,
    pub permission: SharePermission,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShareRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn names(&self, principal: &str, groups: &BTreeSet<String>) -> bool {
        match &self.recipient {
            Recipient::User(id) => id == principal,
            Recipient::Group(name) => groups.contains(name),
        }
    }
}

/// Request to share a secret.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub recipient: Recipient,
    pub permission: SharePermission,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewShare {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        validate_principal("share recipient", self.recipient.id())?;
        if self.expires_at.is_some_and(|exp| exp <= now) {
            return Err(VaultError::Validation(
                "share expiration must be in the future".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolution results
// ---------------------------------------------------------------------------

/// A requested action on a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
}

impl FromStr for Action {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            other => Err(VaultError::Validation(format!(
                "unknown action '{other}' (expected 'read' or 'write')"
            ))),
        }
    }
}

/// Effective permissions of a principal over one secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PermissionSet {
    pub can_read: bool,
    pub can_write: bool,
}

impl PermissionSet {
    pub const FULL: PermissionSet = PermissionSet {
        can_read: true,
        can_write: true,
    };

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Write => self.can_write,
        }
    }

    pub fn union(self, other: PermissionSet) -> PermissionSet {
        PermissionSet {
            can_read: self.can_read || other.can_read,
            can_write: self.can_write || other.can_write,
        }
    }

    pub fn is_full(&self) -> bool {
        self.can_read && self.can_write
    }

    /// Map one permission string to the secret actions it grants.
    pub fn from_permission(perm: &str) -> PermissionSet {
        match perm {
            "secrets.read" => PermissionSet {
                can_read: true,
                can_write: false,
            },
            "secrets.write" => PermissionSet {
                can_read: false,
                can_write: true,
            },
            "secrets.*" | "*" => PermissionSet::FULL,
            _ => PermissionSet::default(),
        }
    }

    pub fn from_share(permission: SharePermission) -> PermissionSet {
        match permission {
            SharePermission::Read => PermissionSet::from_permission("secrets.read"),
            SharePermission::Write => PermissionSet::from_permission("secrets.write"),
        }
    }
}
