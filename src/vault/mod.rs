//! Vault module: secret nodes, versions and the engine that guards them.
//!
//! This module provides:
//! - `SecretNode`, `VersionRecord` and related types (`secret`)
//! - Splitting and reassembly of large plaintexts (`chunking`)
//! - The append-only, optimistically serialized version store (`versions`)
//! - The `SecretEngine` façade (`engine`)

pub mod chunking;
pub mod engine;
pub mod secret;
pub mod versions;

// Re-export the most commonly used items.
pub use engine::{EncryptionStatus, EngineConfig, SecretEngine};
pub use secret::{
    NewSecret, NodeId, NodeStatus, SecretNode, SecretScope, VersionHandle, VersionId,
    VersionMetadata, VersionRecord, VersionRecordMeta,
};
pub use versions::{AppendPolicy, VersionStore};
