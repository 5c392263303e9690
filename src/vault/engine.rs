//! The `SecretEngine` façade.
//!
//! Every caller-facing operation goes through here: the access gate first,
//! then chunking, the envelope cipher and the version store.  The engine
//! is an explicitly constructed value with no global state; it is `Send +
//! Sync` and meant to be shared behind an `Arc` by request handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use super::chunking::{self, chunk_aad};
use super::secret::{
    validate_principal, NewSecret, NodeId, NodeStatus, SecretNode, VersionHandle,
    VersionId, VersionMetadata, VersionRecord, VersionRecordMeta,
};
use super::versions::{AppendPolicy, ChunkSet, SealedChunk, VersionStore};
use crate::access::model::{Action, NewShare, Principal, ShareId, ShareRecord};
use crate::access::AccessGate;
use crate::audit::{AuditEvent, AuditOutcome, AuditSink, NoopAudit};
use crate::cancel::Cancellation;
use crate::config::Settings;
use crate::crypto::{decrypt_with_aad, encrypt_with_aad, DataKey, KeyHierarchy, RotationScope};
use crate::errors::{Result, VaultError};
use crate::storage::SecretRepository;

/// Principal recorded for operations not made on anyone's behalf.
const SYSTEM_PRINCIPAL: &str = "system";

/// Runtime knobs of the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub encryption_enabled: bool,
    /// Chunk size in bytes for `store_secret`.
    pub chunk_size: usize,
    pub append: AppendPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
            append: AppendPolicy::default(),
        }
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            encryption_enabled: settings.encryption_enabled,
            chunk_size: settings.chunk_size(),
            append: settings.append_policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncryptionStatus {
    pub enabled: bool,
    pub initialized: bool,
    pub current_key_version: Option<u32>,
    pub kek_version: Option<u32>,
    pub retained_deks: usize,
}

pub struct SecretEngine {
    repo: Arc<dyn SecretRepository>,
    keys: Arc<KeyHierarchy>,
    versions: VersionStore,
    gate: AccessGate,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl SecretEngine {
    pub fn new(
        repo: Arc<dyn SecretRepository>,
        keys: Arc<KeyHierarchy>,
        config: EngineConfig,
    ) -> Self {
        Self {
            versions: VersionStore::new(repo.clone(), config.append),
            gate: AccessGate::new(repo.clone()),
            repo,
            keys,
            audit: Arc::new(NoopAudit),
            config,
        }
    }

    /// Report operations to `audit` instead of discarding them.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn repository(&self) -> &Arc<dyn SecretRepository> {
        &self.repo
    }

    pub fn keys(&self) -> &Arc<KeyHierarchy> {
        &self.keys
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Create a secret owned by `principal`.  It has no versions yet.
    #[instrument(skip_all, fields(principal = %principal.id, name = %request.name))]
    pub fn create_secret(&self, principal: &Principal, request: NewSecret) -> Result<SecretNode> {
        let result = (|| {
            validate_principal("principal", &principal.id)?;
            request.validate()?;

            let now = Utc::now();
            if request.expires_at.is_some_and(|exp| exp <= now) {
                return Err(VaultError::Validation(
                    "expiration must be in the future".into(),
                ));
            }

            let node = SecretNode {
                id: NodeId::new(),
                name: request.name,
                scope: request.scope,
                owner: principal.id.clone(),
                secret_type: request.secret_type,
                status: NodeStatus::Active,
                description: request.description,
                expires_at: request.expires_at,
                max_reads: request.max_reads,
                metadata: request.metadata,
                created_by: principal.id.clone(),
                created_at: now,
                updated_at: now,
            };
            self.repo.create_node(&node)?;
            info!(node_id = %node.id, scope = %node.scope, "secret created");
            Ok(node)
        })();

        let node_id = result.as_ref().ok().map(|n| n.id);
        self.audited("create_secret", principal, node_id, None, result)
    }

    /// Change or clear a secret's expiration.
    ///
    /// An expired secret stays expired: clearing its expiration fails with
    /// `Expired`.
    #[instrument(skip_all, fields(principal = %principal.id, %node_id))]
    pub fn set_expiration(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<SecretNode> {
        let result = (|| {
            let node = self.repo.get_node(node_id)?;
            self.gate.authorize_write(principal, &node)?;
            if expires_at.is_some_and(|exp| exp <= Utc::now()) {
                return Err(VaultError::Validation(
                    "expiration must be in the future".into(),
                ));
            }
            self.repo.update_node_expiration(node_id, expires_at)?;
            info!(%node_id, expires_at = ?expires_at, "expiration updated");
            self.repo.get_node(node_id)
        })();

        self.audited("set_expiration", principal, Some(*node_id), None, result)
    }

    /// Tombstone a secret.  Its shares are removed and its versions become
    /// unreachable; hard removal is `purge_secret`.
    #[instrument(skip_all, fields(principal = %principal.id, %node_id))]
    pub fn delete_secret(&self, principal: &Principal, node_id: &NodeId) -> Result<()> {
        let result = (|| {
            let node = self.live_node(node_id)?;
            self.gate.require(principal, &node, Action::Write)?;
            self.repo.mark_deleted(node_id)?;
            info!(%node_id, "secret deleted");
            Ok(())
        })();

        self.audited("delete_secret", principal, Some(*node_id), None, result)
    }

    /// Hard-delete a tombstoned secret and all of its versions.
    ///
    /// Meant for an external retention job, so no principal is involved.
    pub fn purge_secret(&self, node_id: &NodeId) -> Result<()> {
        let node = self.repo.get_node(node_id)?;
        if node.status != NodeStatus::Deleted {
            return Err(VaultError::Validation(format!(
                "secret {node_id} must be deleted before it can be purged"
            )));
        }
        self.repo.purge_node(node_id)?;
        info!(%node_id, "secret purged");
        self.audit.record(
            &AuditEvent::new("purge_secret", SYSTEM_PRINCIPAL, AuditOutcome::Success)
                .node(*node_id),
        );
        Ok(())
    }

    /// Live secrets the principal may read, optionally within one namespace.
    pub fn list_secrets(
        &self,
        principal: &Principal,
        namespace: Option<&str>,
    ) -> Result<Vec<SecretNode>> {
        let mut visible = Vec::new();
        for node in self.repo.list_nodes(namespace)? {
            if self.gate.resolver().check(principal, &node, Action::Read)? {
                visible.push(node);
            }
        }
        Ok(visible)
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Encrypt and store a new version, chunking when `plaintext` is
    /// larger than the configured chunk size.
    #[instrument(skip_all, fields(principal = %principal.id, %node_id, len = plaintext.len()))]
    pub fn store_secret(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        plaintext: &[u8],
        cancel: &Cancellation,
    ) -> Result<VersionHandle> {
        let result =
            self.store_with_chunk_size(principal, node_id, plaintext, self.config.chunk_size, cancel);
        let detail = result.as_ref().ok().map(|h| format!("version {}", h.version));
        self.audited("store_secret", principal, Some(*node_id), detail, result)
    }

    /// Store a new version with an explicit chunk size in KiB, returning one
    /// entry per chunk.
    #[instrument(skip_all, fields(principal = %principal.id, %node_id, len = plaintext.len(), chunk_size_kb = chunk_size_kb))]
    pub fn store_large_secret(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        plaintext: &[u8],
        chunk_size_kb: u32,
        cancel: &Cancellation,
    ) -> Result<Vec<VersionRecordMeta>> {
        let result = (|| {
            if chunk_size_kb == 0 {
                return Err(VaultError::Validation(
                    "chunk size must be at least 1 KiB".into(),
                ));
            }
            let chunk_size = chunk_size_kb as usize * 1024;
            let handle =
                self.store_with_chunk_size(principal, node_id, plaintext, chunk_size, cancel)?;
            let chunks = self.versions.version(node_id, handle.version)?;
            Ok(chunks.iter().map(VersionRecord::meta).collect::<Vec<_>>())
        })();

        let detail = result.as_ref().ok().map(|m| format!("{} chunks", m.len()));
        self.audited("store_large_secret", principal, Some(*node_id), detail, result)
    }

    /// Decrypt the version whose head record is `version_id`.
    #[instrument(skip_all, fields(principal = %principal.id, %version_id))]
    pub fn retrieve_secret(
        &self,
        principal: &Principal,
        version_id: &VersionId,
        cancel: &Cancellation,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let mut node_id = None;
        let result = (|| {
            self.ensure_encryption_enabled()?;
            let chunks = self.versions.version_by_id(version_id)?;
            let node = self.repo.get_node(&chunks[0].node_id)?;
            node_id = Some(node.id);
            let head = head_of(&chunks)?;
            self.gate.authorize_read(principal, &node, Some(head))?;
            self.read_version(&node, &chunks, cancel)
        })();

        self.audited("retrieve_secret", principal, node_id, None, result)
    }

    /// Decrypt the latest complete version of a secret.
    #[instrument(skip_all, fields(principal = %principal.id, %node_id))]
    pub fn retrieve_large_secret(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        cancel: &Cancellation,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let result = (|| {
            self.ensure_encryption_enabled()?;
            let node = self.repo.get_node(node_id)?;
            let latest = self.versions.latest_version(node_id)?;
            let head = latest.as_deref().map(head_of).transpose()?;
            self.gate.authorize_read(principal, &node, head)?;

            let chunks = latest.ok_or_else(|| {
                VaultError::NotFound(format!("stored version of secret {node_id}"))
            })?;
            self.read_version(&node, &chunks, cancel)
        })();

        self.audited("retrieve_large_secret", principal, Some(*node_id), None, result)
    }

    /// Metadata of every version.  Needs read permission only, so history
    /// stays visible after expiration or once the read limit is spent.
    pub fn list_versions(
        &self,
        principal: &Principal,
        node_id: &NodeId,
    ) -> Result<Vec<VersionMetadata>> {
        let node = self.live_node(node_id)?;
        self.gate.require(principal, &node, Action::Read)?;
        self.versions.version_history(node_id)
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    pub fn check_permission(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        action: Action,
    ) -> Result<bool> {
        let node = self.live_node(node_id)?;
        self.gate.resolver().check(principal, &node, action)
    }

    #[instrument(skip_all, fields(principal = %principal.id, %node_id, recipient = %share.recipient))]
    pub fn share_secret(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        share: NewShare,
    ) -> Result<ShareRecord> {
        let result = (|| {
            let node = self.repo.get_node(node_id)?;
            self.gate.authorize_write(principal, &node)?;

            let now = Utc::now();
            share.validate(now)?;
            let record = ShareRecord {
                id: ShareId::new(),
                node_id: *node_id,
                recipient: share.recipient,
                permission: share.permission,
                created_by: principal.id.clone(),
                created_at: now,
                expires_at: share.expires_at,
            };
            self.repo.create_share(&record)?;
            info!(share_id = %record.id, permission = %record.permission, "secret shared");
            Ok(record)
        })();

        let detail = result
            .as_ref()
            .ok()
            .map(|s| format!("{} {}", s.permission, s.recipient));
        self.audited("share_secret", principal, Some(*node_id), detail, result)
    }

    /// Remove a share.  Revoking a share that does not exist succeeds.
    #[instrument(skip_all, fields(principal = %principal.id, %share_id))]
    pub fn revoke_share(&self, principal: &Principal, share_id: &ShareId) -> Result<()> {
        let mut node_id = None;
        let result = (|| {
            let Some(share) = self.repo.get_share(share_id)? else {
                debug!("share already gone");
                return Ok(());
            };
            node_id = Some(share.node_id);
            let node = self.live_node(&share.node_id)?;
            self.gate.require(principal, &node, Action::Write)?;
            self.repo.delete_share(share_id)?;
            info!(node_id = %share.node_id, "share revoked");
            Ok(())
        })();

        self.audited("revoke_share", principal, node_id, None, result)
    }

    pub fn list_shares(&self, principal: &Principal, node_id: &NodeId) -> Result<Vec<ShareRecord>> {
        let node = self.live_node(node_id)?;
        self.gate.require(principal, &node, Action::Write)?;
        self.repo.query_shares(node_id)
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    pub fn encryption_status(&self) -> Result<EncryptionStatus> {
        let keys = self.keys.status()?;
        Ok(EncryptionStatus {
            enabled: self.config.encryption_enabled,
            initialized: keys.initialized,
            current_key_version: keys.current_key_version,
            kek_version: keys.kek_version,
            retained_deks: keys.retained_deks,
        })
    }

    /// Create the key hierarchy.  See `KeyHierarchy::initialize`.
    pub fn initialize_keys(&self, force: bool) -> Result<EncryptionStatus> {
        let system = Principal::new(SYSTEM_PRINCIPAL);
        let result = self.keys.initialize(force).map(|_| ());
        let detail = force.then(|| "forced".to_string());
        self.audited("initialize_keys", &system, None, detail, result)?;
        self.encryption_status()
    }

    /// Rotate the DEK or the KEK; returns the new version of that key.
    #[instrument(skip(self, cancel))]
    pub fn rotate_keys(&self, scope: RotationScope, cancel: &Cancellation) -> Result<u32> {
        let system = Principal::new(SYSTEM_PRINCIPAL);
        let (result, layer) = match scope {
            RotationScope::Dek => (self.keys.rotate_dek(), "dek"),
            RotationScope::Kek => (self.keys.rotate_kek(cancel), "kek"),
        };
        let detail = result.as_ref().ok().map(|v| format!("{layer} -> v{v}"));
        self.audited("rotate_keys", &system, None, detail, result)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_encryption_enabled(&self) -> Result<()> {
        if self.config.encryption_enabled {
            Ok(())
        } else {
            Err(VaultError::KeyUnavailable(
                "encryption is disabled in settings".into(),
            ))
        }
    }

    /// Fetch a node, reporting tombstones as missing.
    fn live_node(&self, node_id: &NodeId) -> Result<SecretNode> {
        let node = self.repo.get_node(node_id)?;
        if node.status == NodeStatus::Deleted {
            return Err(VaultError::NotFound(format!("secret {node_id}")));
        }
        Ok(node)
    }

    fn store_with_chunk_size(
        &self,
        principal: &Principal,
        node_id: &NodeId,
        plaintext: &[u8],
        chunk_size: usize,
        cancel: &Cancellation,
    ) -> Result<VersionHandle> {
        self.ensure_encryption_enabled()?;
        let node = self.repo.get_node(node_id)?;
        self.gate.authorize_write(principal, &node)?;

        let pieces = chunking::split(plaintext, chunk_size)?;
        let chunk_count = u32::try_from(pieces.len())
            .map_err(|_| VaultError::Validation("too many chunks".into()))?;

        let total_length = plaintext.len() as u64;
        let dek = self.keys.current_dek()?;
        let mut sealed = Vec::with_capacity(pieces.len());
        for (index, piece) in (0u32..).zip(pieces) {
            cancel.check()?;
            let aad = chunk_aad(node_id, index, chunk_count, total_length);
            let (ciphertext, nonce) = encrypt_with_aad(dek.as_bytes(), piece, &aad)?;
            sealed.push(SealedChunk {
                chunk_index: index,
                ciphertext,
                nonce: nonce.to_vec(),
                key_version: dek.version(),
            });
        }
        drop(dek);

        let set = ChunkSet {
            chunks: sealed,
            total_length,
            created_by: principal.id.clone(),
        };
        let handle = self.versions.append_version(node_id, &set, cancel)?;
        info!(
            %node_id,
            version = handle.version,
            chunks = handle.chunk_count,
            key_version = set.chunks[0].key_version,
            "secret version stored"
        );
        Ok(handle)
    }

    /// Decrypt and reassemble `chunks`, then count the read.
    fn read_version(
        &self,
        node: &SecretNode,
        chunks: &[VersionRecord],
        cancel: &Cancellation,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let head = head_of(chunks)?;
        let mut dek: Option<DataKey> = None;
        let mut opened = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            cancel.check()?;
            if chunk.chunk_count != head.chunk_count {
                return Err(VaultError::ChunkIntegrity(format!(
                    "chunk {} disagrees on chunk count",
                    chunk.chunk_index
                )));
            }
            if dek.as_ref().map(DataKey::version) != Some(chunk.key_version) {
                dek = Some(self.keys.dek_for_version(chunk.key_version)?);
            }
            let key = dek
                .as_ref()
                .ok_or_else(|| VaultError::KeyUnavailable(format!("key version {}", chunk.key_version)))?;
            let aad = chunk_aad(
                &node.id,
                chunk.chunk_index,
                chunk.chunk_count,
                head.total_length,
            );
            let plain = decrypt_with_aad(key.as_bytes(), &chunk.ciphertext, &chunk.nonce, &aad)?;
            opened.push((chunk.chunk_index, plain));
        }
        drop(dek);

        let plaintext =
            chunking::reassemble(opened, head.chunk_count, head.total_length, cancel)?;

        let reads = self.versions.increment_read_count(&head.id)?;
        if node.max_reads.is_some_and(|limit| reads > limit) {
            // Lost a race with a concurrent reader for the last read.
            return Err(VaultError::ReadLimitExceeded);
        }

        debug!(node_id = %node.id, version = head.version, reads, "secret version read");
        Ok(plaintext)
    }

    fn audited<T>(
        &self,
        operation: &'static str,
        principal: &Principal,
        node_id: Option<NodeId>,
        detail: Option<String>,
        result: Result<T>,
    ) -> Result<T> {
        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err(
                VaultError::PermissionDenied | VaultError::Expired | VaultError::ReadLimitExceeded,
            ) => AuditOutcome::Denied,
            Err(_) => AuditOutcome::Failed,
        };

        let detail = match (&result, detail) {
            (Err(e), _) => Some(e.to_string()),
            (Ok(_), detail) => detail,
        };
        let mut event = AuditEvent::new(operation, &principal.id, outcome);
        if let Some(node_id) = node_id {
            event = event.node(node_id);
        }
        if let Some(detail) = detail {
            event = event.detail(detail);
        }
        self.audit.record(&event);
        result
    }
}

fn head_of(chunks: &[VersionRecord]) -> Result<&VersionRecord> {
    chunks
        .iter()
        .find(|c| c.is_head())
        .ok_or_else(|| VaultError::ChunkIntegrity("version has no head chunk".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;
    use crate::storage::MemoryRepository;
    use crate::vault::secret::SecretScope;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<AuditEvent>>);

    impl AuditSink for Captured {
        fn record(&self, event: &AuditEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn engine(config: EngineConfig) -> SecretEngine {
        let keys = Arc::new(KeyHierarchy::new(Arc::new(MemoryKeyStore::new())).unwrap());
        keys.initialize(false).unwrap();
        SecretEngine::new(Arc::new(MemoryRepository::new()), keys, config)
    }

    fn scope() -> SecretScope {
        SecretScope::new("n1", "z1", "dev")
    }

    #[test]
    fn store_and_retrieve() {
        let engine = engine(EngineConfig::default());
        let owner = Principal::new("u1");
        let cancel = Cancellation::new();
        let node = engine
            .create_secret(&owner, NewSecret::new("db-password", scope()))
            .unwrap();

        let handle = engine
            .store_secret(&owner, &node.id, b"s3cret!", &cancel)
            .unwrap();
        assert_eq!(handle.version, 1);

        let plain = engine
            .retrieve_secret(&owner, &handle.head_id, &cancel)
            .unwrap();
        assert_eq!(plain.as_slice(), b"s3cret!");
    }

    #[test]
    fn disabled_encryption_refuses_content() {
        let engine = engine(EngineConfig {
            encryption_enabled: false,
            ..EngineConfig::default()
        });
        let owner = Principal::new("u1");
        let node = engine
            .create_secret(&owner, NewSecret::new("a", scope()))
            .unwrap();
        assert!(matches!(
            engine.store_secret(&owner, &node.id, b"x", &Cancellation::new()),
            Err(VaultError::KeyUnavailable(_))
        ));
        assert!(!engine.encryption_status().unwrap().enabled);
    }

    #[test]
    fn retrieve_without_versions_is_not_found() {
        let engine = engine(EngineConfig::default());
        let owner = Principal::new("u1");
        let node = engine
            .create_secret(&owner, NewSecret::new("a", scope()))
            .unwrap();
        assert!(matches!(
            engine.retrieve_large_secret(&owner, &node.id, &Cancellation::new()),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn cancelled_store_writes_nothing() {
        let engine = engine(EngineConfig::default());
        let owner = Principal::new("u1");
        let node = engine
            .create_secret(&owner, NewSecret::new("a", scope()))
            .unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();

        assert!(matches!(
            engine.store_secret(&owner, &node.id, b"x", &cancel),
            Err(VaultError::Cancelled)
        ));
        assert!(engine.list_versions(&owner, &node.id).unwrap().is_empty());
    }

    #[test]
    fn purge_requires_tombstone() {
        let engine = engine(EngineConfig::default());
        let owner = Principal::new("u1");
        let node = engine
            .create_secret(&owner, NewSecret::new("a", scope()))
            .unwrap();
        assert!(engine.purge_secret(&node.id).is_err());
        engine.delete_secret(&owner, &node.id).unwrap();
        engine.purge_secret(&node.id).unwrap();
        assert!(matches!(
            engine.repository().get_node(&node.id),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn audit_events_carry_node_and_detail() {
        let sink = Arc::new(Captured::default());
        let engine = engine(EngineConfig::default()).with_audit(sink.clone());
        let owner = Principal::new("u1");
        let cancel = Cancellation::new();
        let node = engine
            .create_secret(&owner, NewSecret::new("a", scope()))
            .unwrap();
        let handle = engine.store_secret(&owner, &node.id, b"x", &cancel).unwrap();
        let _ = engine.retrieve_secret(&Principal::new("u2"), &handle.head_id, &cancel);

        let events = sink.0.lock();
        let stored = events.iter().find(|e| e.operation == "store_secret").unwrap();
        assert_eq!(stored.node_id, Some(node.id));
        assert_eq!(stored.detail.as_deref(), Some("version 1"));
        assert_eq!(stored.outcome, AuditOutcome::Success);

        let denied = events.iter().find(|e| e.operation == "retrieve_secret").unwrap();
        assert_eq!(denied.principal, "u2");
        assert_eq!(denied.outcome, AuditOutcome::Denied);
        assert!(denied.detail.is_some());
    }
}
