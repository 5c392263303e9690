//! Key store: persistence for the KEK and the KEK-wrapped DEKs.
//!
//! This module provides:
//! - The `KeyStore` trait consumed by the key hierarchy manager
//! - `WrappedDek`, the only form in which a DEK is ever persisted
//! - An in-memory store (`memory`) and a file-backed keyring (`file`)
//!
//! Ownership and permissions of the underlying medium are the store's
//! concern; the hierarchy manager only sees this trait.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::keys::KeyEncryptionKey;
use crate::errors::Result;

pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;

/// A DEK encrypted under a KEK generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    /// Key version of the DEK (the tag stored on every secret version).
    pub version: u32,

    /// Version of the KEK this blob is wrapped under.
    pub kek_version: u32,

    /// AES-GCM nonce used for wrapping (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,

    /// Wrapped key bytes + auth tag (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

/// Storage of wrapped key material.
///
/// Implementations must be safe to share between threads.
pub trait KeyStore: Send + Sync {
    /// Load the current KEK, or `None` if the store is uninitialized.
    fn load_kek(&self) -> Result<Option<KeyEncryptionKey>>;

    /// Persist `kek` as the current KEK.
    fn store_kek(&self, kek: &KeyEncryptionKey) -> Result<()>;

    /// Load the wrapped DEK registered under `version`.
    fn load_wrapped(&self, version: u32) -> Result<Option<WrappedDek>>;

    /// Insert or replace a wrapped DEK.
    fn store_wrapped(&self, dek: &WrappedDek) -> Result<()>;

    /// All retained DEK versions in ascending order.
    fn wrapped_versions(&self) -> Result<Vec<u32>>;

    /// Replace the KEK and every re-wrapped DEK as one unit.
    ///
    /// The default implementation writes sequentially; stores that can
    /// do better (e.g. one atomic file write) should override it.
    fn commit_kek_rotation(&self, kek: &KeyEncryptionKey, rewrapped: &[WrappedDek]) -> Result<()> {
        for dek in rewrapped {
            self.store_wrapped(dek)?;
        }
        self.store_kek(kek)
    }

    /// Remove all key material.  Used only for forced re-initialization.
    fn clear(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
