//! Key types and HKDF-SHA256 helpers for the key hierarchy.
//!
//! From a KEK we derive a dedicated **wrapping key** with HKDF so the raw
//! KEK bytes are never used directly as an AES key.  The KEK version is
//! part of the HKDF `info`, so every KEK generation wraps under its own
//! sub-key.
//!
//! Both `KeyEncryptionKey` and `DataKey` zero their memory on drop.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::encryption::KEY_LEN;
use crate::errors::{Result, VaultError};

/// Generate 32 cryptographically random bytes for a new KEK or DEK.
pub fn generate_key_bytes() -> [u8; KEY_LEN] {
    let mut bytes = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Derive the key that wraps DEKs under a given KEK generation.
///
/// `info` is `"sealvault-dek-wrap:v<kek_version>"`.
pub fn derive_wrapping_key(kek: &[u8], kek_version: u32) -> Result<[u8; KEY_LEN]> {
    let info = format!("sealvault-dek-wrap:v{kek_version}");
    hkdf_derive(kek, info.as_bytes())
}

/// Internal helper: run HKDF-SHA256 expand with the given `info`.
///
/// The input is already uniformly random, so no salt is used.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// The top-level key that wraps every DEK.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey {
    #[zeroize(skip)]
    version: u32,
    bytes: [u8; KEY_LEN],
}

impl KeyEncryptionKey {
    pub fn new(version: u32, bytes: [u8; KEY_LEN]) -> Self {
        Self { version, bytes }
    }

    /// Generate a fresh random KEK with the given version.
    pub fn generate(version: u32) -> Self {
        let mut bytes = generate_key_bytes();
        let kek = Self::new(version, bytes);
        bytes.zeroize();
        kek
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive the DEK-wrapping sub-key for this KEK.
    pub fn wrapping_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_wrapping_key(&self.bytes, self.version)
    }
}

/// An unwrapped data-encryption key.
///
/// Handed out for a single encrypt/decrypt call and scrubbed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    #[zeroize(skip)]
    version: u32,
    bytes: [u8; KEY_LEN],
}

impl DataKey {
    pub fn new(version: u32, bytes: [u8; KEY_LEN]) -> Self {
        Self { version, bytes }
    }

    pub fn generate(version: u32) -> Self {
        let mut bytes = generate_key_bytes();
        let dek = Self::new(version, bytes);
        bytes.zeroize();
        dek
    }

    /// The key version this DEK was registered under.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_keys_differ_per_kek_version() {
        let kek = [0x99u8; KEY_LEN];
        let k1 = derive_wrapping_key(&kek, 1).unwrap();
        let k2 = derive_wrapping_key(&kek, 2).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn wrapping_key_is_not_the_kek() {
        let kek = KeyEncryptionKey::new(1, [0x55u8; KEY_LEN]);
        assert_ne!(&kek.wrapping_key().unwrap(), kek.as_bytes());
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = DataKey::generate(1);
        let b = DataKey::generate(2);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_hides_key_bytes() {
        let dek = DataKey::new(3, [0xAB; KEY_LEN]);
        let shown = format!("{dek:?}");
        assert!(shown.contains("version: 3"));
        assert!(!shown.contains("171"));
    }
}
