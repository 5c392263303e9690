//! In-memory key store for tests and embedded use.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::{KeyStore, WrappedDek};
use crate::crypto::encryption::KEY_LEN;
use crate::crypto::keys::KeyEncryptionKey;
use crate::errors::Result;

#[derive(Default)]
struct Inner {
    kek: Option<(u32, Zeroizing<[u8; KEY_LEN]>)>,
    deks: BTreeMap<u32, WrappedDek>,
}

/// Key material held in process memory only.
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: RwLock<Inner>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_kek(&self) -> Result<Option<KeyEncryptionKey>> {
        let inner = self.inner.read();
        Ok(inner
            .kek
            .as_ref()
            .map(|(version, bytes)| KeyEncryptionKey::new(*version, **bytes)))
    }

    fn store_kek(&self, kek: &KeyEncryptionKey) -> Result<()> {
        self.inner.write().kek = Some((kek.version(), Zeroizing::new(*kek.as_bytes())));
        Ok(())
    }

    fn load_wrapped(&self, version: u32) -> Result<Option<WrappedDek>> {
        Ok(self.inner.read().deks.get(&version).cloned())
    }

    fn store_wrapped(&self, dek: &WrappedDek) -> Result<()> {
        self.inner.write().deks.insert(dek.version, dek.clone());
        Ok(())
    }

    fn wrapped_versions(&self) -> Result<Vec<u32>> {
        Ok(self.inner.read().deks.keys().copied().collect())
    }

    fn commit_kek_rotation(&self, kek: &KeyEncryptionKey, rewrapped: &[WrappedDek]) -> Result<()> {
        let mut inner = self.inner.write();
        for dek in rewrapped {
            inner.deks.insert(dek.version, dek.clone());
        }
        inner.kek = Some((kek.version(), Zeroizing::new(*kek.as_bytes())));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.kek = None;
        inner.deks.clear();
        Ok(())
    }
}
