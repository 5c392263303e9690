//! KEK/DEK hierarchy: generation, envelope wrap/unwrap and rotation.
//!
//! Only the KEK is held in memory for the lifetime of the manager.  DEKs
//! live in the key store wrapped under the KEK; every encrypt/decrypt call
//! unwraps the DEK it needs into a `DataKey` that is scrubbed on drop.
//!
//! Every historical DEK is retained, so a secret version written under
//! key version N stays readable after any number of DEK rotations.  KEK
//! rotation re-wraps the whole retained set eagerly and commits it with
//! the new KEK in one key-store call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::encryption::{decrypt_with_aad, encrypt_with_aad, KEY_LEN};
use super::keys::{DataKey, KeyEncryptionKey};
use crate::cancel::Cancellation;
use crate::errors::{Result, VaultError};
use crate::keystore::{KeyStore, WrappedDek};

/// Snapshot of the key hierarchy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub initialized: bool,
    pub kek_version: Option<u32>,
    pub current_key_version: Option<u32>,
    pub retained_deks: usize,
}

/// Which layer of the hierarchy to rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationScope {
    Dek,
    Kek,
}

impl std::str::FromStr for RotationScope {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dek" => Ok(Self::Dek),
            "kek" => Ok(Self::Kek),
            other => Err(VaultError::Validation(format!(
                "unknown rotation scope '{other}' (expected 'dek' or 'kek')"
            ))),
        }
    }
}

pub struct KeyHierarchy {
    store: Arc<dyn KeyStore>,
    kek: RwLock<Option<KeyEncryptionKey>>,
    /// 0 means no DEK exists yet.
    current_version: AtomicU32,
    /// At most one initialize/rotation in flight.
    rotation_lock: Mutex<()>,
}

impl KeyHierarchy {
    /// Attach to a key store, loading any existing key material.
    pub fn new(store: Arc<dyn KeyStore>) -> Result<Self> {
        let kek = store.load_kek()?;
        let current = store.wrapped_versions()?.last().copied().unwrap_or(0);

        if kek.is_none() && current > 0 {
            warn!("key store holds wrapped DEKs but no KEK");
        }

        Ok(Self {
            store,
            kek: RwLock::new(kek),
            current_version: AtomicU32::new(current),
            rotation_lock: Mutex::new(()),
        })
    }

    /// Create the KEK and the first DEK.
    ///
    /// Fails with `KeyInit` if key material exists and `force` is false.
    /// With `force`, all existing key material is destroyed first, which
    /// makes previously written versions unreadable.
    pub fn initialize(&self, force: bool) -> Result<KeyStatus> {
        let _rotation = self.rotation_lock.lock();

        let has_material =
            self.kek.read().is_some() || !self.store.wrapped_versions()?.is_empty();
        if has_material {
            if !force {
                return Err(VaultError::KeyInit(
                    "key material already exists (re-initialization not requested)".into(),
                ));
            }
            warn!("forced re-initialization: discarding existing key material");
            self.store.clear()?;
        }

        let kek = KeyEncryptionKey::generate(1);
        let dek = DataKey::generate(1);
        let wrapped = wrap_dek(&kek, &dek)?;

        self.store.store_kek(&kek)?;
        self.store.store_wrapped(&wrapped)?;

        *self.kek.write() = Some(kek);
        self.current_version.store(1, Ordering::SeqCst);

        info!(kek_version = 1, key_version = 1, "key hierarchy initialized");
        self.status()
    }

    pub fn is_initialized(&self) -> bool {
        self.kek.read().is_some() && self.current_version.load(Ordering::SeqCst) > 0
    }

    /// Unwrap the current DEK for one encrypt call.
    pub fn current_dek(&self) -> Result<DataKey> {
        let version = self.current_version.load(Ordering::SeqCst);
        if version == 0 {
            return Err(VaultError::KeyUnavailable(
                "no data-encryption key (run initialize first)".into(),
            ));
        }
        self.dek_for_version(version)
    }

    /// Unwrap the DEK that was current when key version `version` was active.
    pub fn dek_for_version(&self, version: u32) -> Result<DataKey> {
        let kek_guard = self.kek.read();
        let kek = kek_guard
            .as_ref()
            .ok_or_else(|| VaultError::KeyUnavailable("no key-encryption key loaded".into()))?;

        let wrapped = self
            .store
            .load_wrapped(version)?
            .ok_or_else(|| VaultError::KeyUnavailable(format!("key version {version}")))?;

        unwrap_dek(kek, &wrapped)
    }

    /// Generate a new DEK and make it current.
    ///
    /// Existing versions are not re-encrypted.
    pub fn rotate_dek(&self) -> Result<u32> {
        let _rotation = self.rotation_lock.lock();

        let next = self
            .store
            .wrapped_versions()?
            .last()
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| VaultError::KeyInit("key version overflow".into()))?;

        {
            let kek_guard = self.kek.read();
            let kek = kek_guard.as_ref().ok_or_else(|| {
                VaultError::KeyUnavailable("no key-encryption key loaded".into())
            })?;
            let dek = DataKey::generate(next);
            let wrapped = wrap_dek(kek, &dek)?;
            self.store.store_wrapped(&wrapped)?;
        }

        self.current_version.store(next, Ordering::SeqCst);
        info!(key_version = next, "data-encryption key rotated");
        Ok(next)
    }

    /// Generate a new KEK and re-wrap every retained DEK under it.
    ///
    /// All DEKs are unwrapped and re-wrapped in memory first; nothing is
    /// written unless every one succeeds.
    pub fn rotate_kek(&self, cancel: &Cancellation) -> Result<u32> {
        let _rotation = self.rotation_lock.lock();

        let (new_kek, rewrapped) = {
            let kek_guard = self.kek.read();
            let old_kek = kek_guard.as_ref().ok_or_else(|| {
                VaultError::KeyUnavailable("no key-encryption key loaded".into())
            })?;

            let new_version = old_kek
                .version()
                .checked_add(1)
                .ok_or_else(|| VaultError::KeyInit("KEK version overflow".into()))?;
            let new_kek = KeyEncryptionKey::generate(new_version);

            let versions = self.store.wrapped_versions()?;
            let mut rewrapped = Vec::with_capacity(versions.len());
            for version in versions {
                cancel.check()?;
                let wrapped = self
                    .store
                    .load_wrapped(version)?
                    .ok_or_else(|| VaultError::KeyUnavailable(format!("key version {version}")))?;
                let dek = unwrap_dek(old_kek, &wrapped)?;
                rewrapped.push(wrap_dek(&new_kek, &dek)?);
            }
            (new_kek, rewrapped)
        };

        // Readers hold the read lock across load + unwrap, so swapping under
        // the write lock keeps blob and KEK consistent for them.
        let mut kek_guard = self.kek.write();
        self.store.commit_kek_rotation(&new_kek, &rewrapped)?;
        let new_version = new_kek.version();
        *kek_guard = Some(new_kek);

        info!(
            kek_version = new_version,
            rewrapped = rewrapped.len(),
            "key-encryption key rotated"
        );
        Ok(new_version)
    }

    pub fn status(&self) -> Result<KeyStatus> {
        let kek_version = self.kek.read().as_ref().map(KeyEncryptionKey::version);
        let current = self.current_version.load(Ordering::SeqCst);
        let retained = self.store.wrapped_versions()?.len();
        Ok(KeyStatus {
            initialized: kek_version.is_some() && current > 0,
            kek_version,
            current_key_version: (current > 0).then_some(current),
            retained_deks: retained,
        })
    }
}

/// Associated data binding a wrapped blob to its DEK version.
fn wrap_aad(dek_version: u32) -> Vec<u8> {
    format!("sealvault-dek:v{dek_version}").into_bytes()
}

fn wrap_dek(kek: &KeyEncryptionKey, dek: &DataKey) -> Result<WrappedDek> {
    let mut wrapping_key = kek.wrapping_key()?;
    let sealed = encrypt_with_aad(&wrapping_key, dek.as_bytes(), &wrap_aad(dek.version()));
    wrapping_key.zeroize();
    let (ciphertext, nonce) = sealed?;

    debug!(
        key_version = dek.version(),
        kek_version = kek.version(),
        "DEK wrapped"
    );
    Ok(WrappedDek {
        version: dek.version(),
        kek_version: kek.version(),
        nonce: nonce.to_vec(),
        ciphertext,
        created_at: Utc::now(),
    })
}

fn unwrap_dek(kek: &KeyEncryptionKey, wrapped: &WrappedDek) -> Result<DataKey> {
    if wrapped.kek_version != kek.version() {
        return Err(VaultError::KeyIntegrity);
    }

    let mut wrapping_key = kek.wrapping_key()?;
    let plain = decrypt_with_aad(
        &wrapping_key,
        &wrapped.ciphertext,
        &wrapped.nonce,
        &wrap_aad(wrapped.version),
    );
    wrapping_key.zeroize();
    let plain = plain.map_err(|_| VaultError::KeyIntegrity)?;

    if plain.len() != KEY_LEN {
        return Err(VaultError::KeyIntegrity);
    }
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&plain);
    let dek = DataKey::new(wrapped.version, bytes);
    bytes.zeroize();
    Ok(dek)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    fn hierarchy() -> (Arc<MemoryKeyStore>, KeyHierarchy) {
        let store = Arc::new(MemoryKeyStore::new());
        let keys = KeyHierarchy::new(store.clone()).unwrap();
        (store, keys)
    }

    #[test]
    fn uninitialized_hierarchy_has_no_dek() {
        let (_store, keys) = hierarchy();
        assert!(!keys.is_initialized());
        assert!(matches!(
            keys.current_dek(),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn initialize_twice_requires_force() {
        let (_store, keys) = hierarchy();
        keys.initialize(false).unwrap();
        assert!(matches!(keys.initialize(false), Err(VaultError::KeyInit(_))));

        let status = keys.initialize(true).unwrap();
        assert_eq!(status.current_key_version, Some(1));
        assert_eq!(status.retained_deks, 1);
    }

    #[test]
    fn dek_rotation_keeps_history() {
        let (_store, keys) = hierarchy();
        keys.initialize(false).unwrap();
        let v1 = *keys.current_dek().unwrap().as_bytes();

        assert_eq!(keys.rotate_dek().unwrap(), 2);
        let current = keys.current_dek().unwrap();
        assert_eq!(current.version(), 2);
        assert_ne!(current.as_bytes(), &v1);
        assert_eq!(keys.dek_for_version(1).unwrap().as_bytes(), &v1);
    }

    #[test]
    fn kek_rotation_rewraps_every_dek() {
        let (store, keys) = hierarchy();
        keys.initialize(false).unwrap();
        keys.rotate_dek().unwrap();
        let v1 = *keys.dek_for_version(1).unwrap().as_bytes();
        let v2 = *keys.dek_for_version(2).unwrap().as_bytes();

        assert_eq!(keys.rotate_kek(&Cancellation::new()).unwrap(), 2);

        for version in [1, 2] {
            assert_eq!(store.load_wrapped(version).unwrap().unwrap().kek_version, 2);
        }
        assert_eq!(keys.dek_for_version(1).unwrap().as_bytes(), &v1);
        assert_eq!(keys.dek_for_version(2).unwrap().as_bytes(), &v2);
    }

    #[test]
    fn tampered_wrapped_dek_fails_integrity() {
        let (store, keys) = hierarchy();
        keys.initialize(false).unwrap();

        let mut wrapped = store.load_wrapped(1).unwrap().unwrap();
        wrapped.ciphertext[0] ^= 0x80;
        store.store_wrapped(&wrapped).unwrap();

        assert!(matches!(keys.current_dek(), Err(VaultError::KeyIntegrity)));
    }

    #[test]
    fn swapped_wrapped_blob_fails_integrity() {
        let (store, keys) = hierarchy();
        keys.initialize(false).unwrap();
        keys.rotate_dek().unwrap();

        let mut v1 = store.load_wrapped(1).unwrap().unwrap();
        v1.version = 2;
        store.store_wrapped(&v1).unwrap();

        assert!(matches!(
            keys.dek_for_version(2),
            Err(VaultError::KeyIntegrity)
        ));
    }

    #[test]
    fn reopen_loads_existing_material() {
        let (store, keys) = hierarchy();
        keys.initialize(false).unwrap();
        keys.rotate_dek().unwrap();
        let v2 = *keys.current_dek().unwrap().as_bytes();

        let reopened = KeyHierarchy::new(store).unwrap();
        assert!(reopened.is_initialized());
        assert_eq!(reopened.current_dek().unwrap().as_bytes(), &v2);
    }

    #[test]
    fn rotation_scope_parses() {
        assert_eq!("dek".parse::<RotationScope>().unwrap(), RotationScope::Dek);
        assert_eq!("KEK".parse::<RotationScope>().unwrap(), RotationScope::Kek);
        assert!("both".parse::<RotationScope>().is_err());
    }
}
