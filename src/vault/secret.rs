//! Secret nodes, version records, and the validation rules for them.
//!
//! A `SecretNode` is the identity of a logical secret.  Its content lives
//! in immutable `VersionRecord`s: one record per chunk, all chunks of one
//! write sharing a version number.  Record `chunk_index == 0` is the head
//! of a logical version; its id names the version and it carries the
//! read counter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, VaultError};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = VaultError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    VaultError::Validation(format!(
                        "invalid {} '{s}': {e}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(
    /// Identifier of a `SecretNode`.
    NodeId
);
uuid_id!(
    /// Identifier of a single `VersionRecord` (one chunk).
    VersionId
);

// ---------------------------------------------------------------------------
// Scope and status
// ---------------------------------------------------------------------------

/// The namespace / zone / environment partition a secret lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretScope {
    pub namespace: String,
    pub zone: String,
    pub environment: String,
}

impl SecretScope {
    pub fn new(namespace: &str, zone: &str, environment: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            zone: zone.to_string(),
            environment: environment.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_scope_part("namespace", &self.namespace)?;
        validate_scope_part("zone", &self.zone)?;
        validate_scope_part("environment", &self.environment)
    }
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.zone, self.environment)
    }
}

/// Lifecycle state of a node.  `Deleted` is terminal; `Expired` never
/// returns to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Expired,
    Deleted,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Expired => "expired",
            NodeStatus::Deleted => "deleted",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Active, NodeStatus::Expired)
                | (NodeStatus::Active, NodeStatus::Deleted)
                | (NodeStatus::Expired, NodeStatus::Deleted)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "expired" => Ok(NodeStatus::Expired),
            "deleted" => Ok(NodeStatus::Deleted),
            other => Err(VaultError::Serialization(format!(
                "unknown node status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretNode {
    pub id: NodeId,
    pub name: String,
    pub scope: SecretScope,
    pub owner: String,
    /// Declared type tag, e.g. "password" or "certificate".
    pub secret_type: String,
    pub status: NodeStatus,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-version read limit; `None` means unlimited.
    pub max_reads: Option<u64>,
    pub metadata: BTreeMap<String, String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretNode {
    /// `true` if an expiration timestamp is set and not after `now`.
    pub fn is_past_expiration(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Request to create a new secret node.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub scope: SecretScope,
    pub secret_type: String,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_reads: Option<u64>,
    pub metadata: BTreeMap<String, String>,
}

impl NewSecret {
    pub fn new(name: &str, scope: SecretScope) -> Self {
        Self {
            name: name.to_string(),
            scope,
            secret_type: "generic".to_string(),
            description: None,
            expires_at: None,
            max_reads: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, secret_type: &str) -> Self {
        self.secret_type = secret_type.to_string();
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_reads(mut self, max_reads: u64) -> Self {
        self.max_reads = Some(max_reads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_secret_name(&self.name)?;
        self.scope.validate()?;
        validate_scope_part("secret type", &self.secret_type)?;
        if self.max_reads == Some(0) {
            return Err(VaultError::Validation(
                "max_reads must be at least 1 when set".into(),
            ));
        }
        for key in self.metadata.keys() {
            if key.is_empty() || key.len() > 128 {
                return Err(VaultError::Validation(
                    "metadata keys must be 1-128 characters".into(),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// One persisted, immutable chunk of one secret version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub id: VersionId,
    pub node_id: NodeId,
    pub version: u32,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    /// DEK key version used to encrypt this chunk.
    pub key_version: u32,
    pub chunk_index: u32,
    pub chunk_count: u32,
    /// Length of the full reassembled plaintext.
    pub total_length: u64,
    /// Meaningful on the head record only.
    pub read_count: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl VersionRecord {
    pub fn is_head(&self) -> bool {
        self.chunk_index == 0
    }

    pub fn meta(&self) -> VersionRecordMeta {
        VersionRecordMeta {
            id: self.id,
            version: self.version,
            chunk_index: self.chunk_index,
            chunk_count: self.chunk_count,
            ciphertext_len: self.ciphertext.len(),
            key_version: self.key_version,
        }
    }
}

/// Per-chunk summary returned from a chunked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionRecordMeta {
    pub id: VersionId,
    pub version: u32,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub ciphertext_len: usize,
    pub key_version: u32,
}

/// Handle to one logical version returned from a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionHandle {
    pub node_id: NodeId,
    pub version: u32,
    /// Id of the head record; pass it to `retrieve_secret`.
    pub head_id: VersionId,
    pub chunk_count: u32,
    pub total_length: u64,
}

/// Metadata about one logical version (no ciphertext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMetadata {
    pub head_id: VersionId,
    pub version: u32,
    pub chunk_count: u32,
    pub total_length: u64,
    pub key_version: u32,
    pub read_count: u64,
    /// `false` if some chunk of this version is missing.
    pub complete: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a secret name.
///
/// Allowed: ASCII letters, digits, underscores, hyphens, periods.
/// Must be non-empty and at most 256 characters.
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultError::Validation("secret name cannot be empty".into()));
    }
    if name.len() > 256 {
        return Err(VaultError::Validation(
            "secret name cannot exceed 256 characters".into(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(VaultError::Validation(format!(
            "secret name '{name}' contains invalid characters (allowed: ASCII letters, digits, '_', '-', '.')"
        )));
    }
    Ok(())
}

/// Validate one component of a scope, or a similar short identifier.
///
/// Allowed: lowercase letters, digits, hyphens, underscores; 1-64 chars.
pub fn validate_scope_part(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VaultError::Validation(format!("{what} cannot be empty")));
    }
    if value.len() > 64 {
        return Err(VaultError::Validation(format!(
            "{what} cannot exceed 64 characters"
        )));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    {
        return Err(VaultError::Validation(format!(
            "{what} '{value}' is invalid (allowed: lowercase letters, digits, '-', '_')"
        )));
    }
    Ok(())
}

/// Validate a principal or group identifier.
pub fn validate_principal(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 128 {
        return Err(VaultError::Validation(format!(
            "{what} must be 1-128 characters"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(VaultError::Validation(format!(
            "{what} contains control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_secret_names() {
        assert!(validate_secret_name("db-password").is_ok());
        assert!(validate_secret_name("API_KEY.v2").is_ok());
    }

    #[test]
    fn invalid_secret_names() {
        assert!(validate_secret_name("").is_err());
        assert!(validate_secret_name("a b").is_err());
        assert!(validate_secret_name("a/b").is_err());
        assert!(validate_secret_name(&"x".repeat(257)).is_err());
    }

    #[test]
    fn scope_parts_are_validated() {
        assert!(SecretScope::new("payments", "eu-west", "prod")
            .validate()
            .is_ok());
        assert!(SecretScope::new("", "z", "e").validate().is_err());
        assert!(SecretScope::new("Payments", "z", "e").validate().is_err());
    }

    #[test]
    fn status_transitions() {
        use NodeStatus::*;
        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Deleted));
        assert!(Expired.can_transition_to(Deleted));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Expired));
    }

    #[test]
    fn zero_max_reads_rejected() {
        let req = NewSecret::new("x", SecretScope::new("n", "z", "e")).with_max_reads(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn ids_roundtrip_through_strings() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<NodeId>().is_err());
    }
}
