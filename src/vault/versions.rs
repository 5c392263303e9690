//! Append-only version store on top of a `SecretRepository`.
//!
//! Writers race through an optimistic loop: read the node's max version,
//! try to append `max + 1` conditioned on the max being unchanged, and on
//! conflict back off with jitter and try again.  Ciphertext does not depend
//! on the version number, so a retry only re-stamps the records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::errors::{Result, VaultError};
use crate::storage::SecretRepository;
use crate::vault::secret::{NodeId, VersionHandle, VersionId, VersionMetadata, VersionRecord};

/// Backoff never grows past this multiple of the base delay.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// One encrypted chunk waiting for a version number.
#[derive(Debug, Clone)]
pub struct SealedChunk {
    pub chunk_index: u32,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_version: u32,
}

/// Every chunk of one logical write, ordered by index.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub chunks: Vec<SealedChunk>,
    pub total_length: u64,
    pub created_by: String,
}

impl ChunkSet {
    fn chunk_count(&self) -> Result<u32> {
        u32::try_from(self.chunks.len())
            .map_err(|_| VaultError::Validation("too many chunks in one version".into()))
    }

    fn stamp(&self, node_id: NodeId, version: u32) -> Result<Vec<VersionRecord>> {
        let chunk_count = self.chunk_count()?;
        let created_at = Utc::now();
        Ok(self
            .chunks
            .iter()
            .map(|chunk| VersionRecord {
                id: VersionId::new(),
                node_id,
                version,
                ciphertext: chunk.ciphertext.clone(),
                nonce: chunk.nonce.clone(),
                key_version: chunk.key_version,
                chunk_index: chunk.chunk_index,
                chunk_count,
                total_length: self.total_length,
                read_count: 0,
                created_by: self.created_by.clone(),
                created_at,
            })
            .collect())
    }
}

/// Retry policy for contended appends.
#[derive(Debug, Clone, Copy)]
pub struct AppendPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for AppendPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_backoff: Duration::from_millis(5),
        }
    }
}

impl AppendPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_backoff;
        let exp = base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT));
        let jitter_ceiling = u64::try_from(base.as_micros()).unwrap_or(u64::MAX).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        exp.saturating_add(Duration::from_micros(jitter))
    }
}

pub struct VersionStore {
    repo: Arc<dyn SecretRepository>,
    policy: AppendPolicy,
}

impl VersionStore {
    pub fn new(repo: Arc<dyn SecretRepository>, policy: AppendPolicy) -> Self {
        Self { repo, policy }
    }

    /// Append `set` as the node's next version.
    ///
    /// Fails with `Concurrency` once `max_retries` conflicting attempts
    /// have been made.
    pub fn append_version(
        &self,
        node_id: &NodeId,
        set: &ChunkSet,
        cancel: &Cancellation,
    ) -> Result<VersionHandle> {
        let chunk_count = set.chunk_count()?;
        if chunk_count == 0 {
            return Err(VaultError::Validation(
                "a version needs at least one chunk".into(),
            ));
        }

        let mut attempt = 0u32;
        loop {
            cancel.check()?;

            let current = self.repo.max_version(node_id)?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| VaultError::Validation("version number overflow".into()))?;
            let records = set.stamp(*node_id, next)?;
            let head_id = records[0].id;

            match self.repo.append_version_records(node_id, current, &records) {
                Ok(()) => {
                    debug!(%node_id, version = next, chunks = chunk_count, attempt, "version appended");
                    return Ok(VersionHandle {
                        node_id: *node_id,
                        version: next,
                        head_id,
                        chunk_count,
                        total_length: set.total_length,
                    });
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > self.policy.max_retries {
                        warn!(%node_id, attempts = attempt, "version append gave up under contention");
                        return Err(VaultError::Concurrency(format!(
                            "could not append a version to secret {node_id} after {attempt} attempts"
                        )));
                    }
                    let delay = self.policy.delay(attempt - 1);
                    debug!(%node_id, attempt, delay_us = delay.as_micros() as u64, error = %e, "append conflict, retrying");
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Chunks of the highest-numbered complete version, or `None` if the
    /// node has no complete version.
    pub fn latest_version(&self, node_id: &NodeId) -> Result<Option<Vec<VersionRecord>>> {
        let grouped = group_by_version(self.repo.query_versions(node_id)?);
        Ok(grouped
            .into_iter()
            .rev()
            .map(|(_, chunks)| chunks)
            .find(|chunks| is_complete(chunks)))
    }

    /// Chunks of version `version` ordered by index.
    pub fn version(&self, node_id: &NodeId, version: u32) -> Result<Vec<VersionRecord>> {
        let chunks = self.repo.query_version_chunks(node_id, version)?;
        if chunks.is_empty() {
            return Err(VaultError::NotFound(format!(
                "version {version} of secret {node_id}"
            )));
        }
        Ok(chunks)
    }

    /// Chunks of the version that record `id` belongs to.
    pub fn version_by_id(&self, id: &VersionId) -> Result<Vec<VersionRecord>> {
        let record = self.repo.get_version_record(id)?;
        self.version(&record.node_id, record.version)
    }

    /// Metadata of every logical version, ascending by version number.
    pub fn version_history(&self, node_id: &NodeId) -> Result<Vec<VersionMetadata>> {
        let grouped = group_by_version(self.repo.query_versions(node_id)?);
        Ok(grouped
            .into_values()
            .filter_map(|chunks| {
                let complete = is_complete(&chunks);
                let head = chunks.iter().find(|c| c.is_head())?;
                Some(VersionMetadata {
                    head_id: head.id,
                    version: head.version,
                    chunk_count: head.chunk_count,
                    total_length: head.total_length,
                    key_version: head.key_version,
                    read_count: head.read_count,
                    complete,
                    created_by: head.created_by.clone(),
                    created_at: head.created_at,
                })
            })
            .collect())
    }

    /// Bump the read counter on a version's head record.
    pub fn increment_read_count(&self, head_id: &VersionId) -> Result<u64> {
        self.repo.increment_read_count(head_id)
    }
}

fn group_by_version(records: Vec<VersionRecord>) -> BTreeMap<u32, Vec<VersionRecord>> {
    let mut grouped: BTreeMap<u32, Vec<VersionRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.version).or_default().push(record);
    }
    for chunks in grouped.values_mut() {
        chunks.sort_by_key(|c| c.chunk_index);
    }
    grouped
}

/// Sorted chunks form a complete set when they are exactly `0..count`.
fn is_complete(chunks: &[VersionRecord]) -> bool {
    let Some(head) = chunks.first() else {
        return false;
    };
    chunks.len() as u64 == u64::from(head.chunk_count)
        && chunks
            .iter()
            .enumerate()
            .all(|(i, c)| c.chunk_index as usize == i && c.chunk_count == head.chunk_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;
    use crate::vault::secret::{NodeStatus, SecretNode, SecretScope};

    fn setup() -> (Arc<MemoryRepository>, VersionStore, NodeId) {
        let repo = Arc::new(MemoryRepository::new());
        let now = Utc::now();
        let node = SecretNode {
            id: NodeId::new(),
            name: "a".into(),
            scope: SecretScope::new("n", "z", "e"),
            owner: "u1".into(),
            secret_type: "generic".into(),
            status: NodeStatus::Active,
            description: None,
            expires_at: None,
            max_reads: None,
            metadata: Default::default(),
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        };
        repo.create_node(&node).unwrap();
        let store = VersionStore::new(repo.clone(), AppendPolicy::default());
        (repo, store, node.id)
    }

    fn set(chunks: u32) -> ChunkSet {
        ChunkSet {
            chunks: (0..chunks)
                .map(|i| SealedChunk {
                    chunk_index: i,
                    ciphertext: vec![i as u8; 20],
                    nonce: vec![0; 12],
                    key_version: 1,
                })
                .collect(),
            total_length: u64::from(chunks) * 4,
            created_by: "u1".into(),
        }
    }

    #[test]
    fn versions_are_sequential() {
        let (_repo, store, id) = setup();
        let cancel = Cancellation::new();
        assert_eq!(store.append_version(&id, &set(1), &cancel).unwrap().version, 1);
        assert_eq!(store.append_version(&id, &set(3), &cancel).unwrap().version, 2);

        let history = store.version_history(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].chunk_count, 3);
        assert!(history.iter().all(|v| v.complete));
    }

    #[test]
    fn latest_skips_incomplete_sets() {
        let (repo, store, id) = setup();
        let cancel = Cancellation::new();
        store.append_version(&id, &set(2), &cancel).unwrap();

        // A version whose second chunk never landed.
        let mut partial = set(2).stamp(id, 2).unwrap();
        partial.pop();
        repo.append_version_records(&id, 1, &partial).unwrap();

        let latest = store.latest_version(&id).unwrap().unwrap();
        assert_eq!(latest[0].version, 1);
        assert!(!store.version_history(&id).unwrap()[1].complete);
    }

    #[test]
    fn version_by_id_returns_whole_set() {
        let (_repo, store, id) = setup();
        let handle = store
            .append_version(&id, &set(3), &Cancellation::new())
            .unwrap();
        let chunks = store.version_by_id(&handle.head_id).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(matches!(
            store.version(&id, 9),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_writers_get_distinct_versions() {
        let (_repo, store, id) = setup();
        let store = Arc::new(VersionStore::new(
            store.repo.clone(),
            AppendPolicy {
                max_retries: 200,
                base_backoff: Duration::from_micros(50),
            },
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .append_version(&id, &set(1), &Cancellation::new())
                        .unwrap()
                        .version
                })
            })
            .collect();

        let mut versions: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn unknown_node_is_not_found() {
        let (_repo, store, _id) = setup();
        let err = store
            .append_version(&NodeId::new(), &set(1), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }
}
