//! File-backed keyring.
//!
//! A `.keyring` file has this layout:
//!
//! ```text
//! [SVKR: 4 bytes][version: 1 byte][body_len: 4 bytes LE][body JSON][SHA-256(body): 32 bytes]
//! ```
//!
//! - **Magic** (`SVKR`): identifies the file as a SealVault keyring.
//! - **Version**: format version (currently `1`).
//! - **Body JSON**: serialized `KeyringBody` (KEK record + wrapped DEKs).
//! - **Checksum**: detects truncation and accidental corruption.  Tampering
//!   with wrapped DEKs is caught by their own AES-GCM tags.
//!
//! When the store is opened with a passphrase the KEK is sealed with
//! AES-256-GCM under an Argon2id-derived key; otherwise it is stored as
//! plain base64 and protection relies on the file's `0600` permissions.
//!
//! Every mutation rewrites the whole file via temp file + rename, so a
//! reader never observes a half-written keyring.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use super::{base64_decode, base64_encode, KeyStore, WrappedDek};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad, KEY_LEN};
use crate::crypto::kdf::{derive_sealing_key, generate_salt, Argon2Params};
use crate::crypto::keys::KeyEncryptionKey;
use crate::errors::{Result, VaultError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"SVKR";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (body_len).
const PREFIX_LEN: usize = 9;

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Argon2id parameters and salt used to seal the KEK.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sealing {
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    salt: Vec<u8>,
    argon2: Argon2Params,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    nonce: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KekRecord {
    version: u32,
    /// Present when `material` is sealed under a passphrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sealing: Option<Sealing>,
    /// Raw KEK bytes, or sealed KEK + auth tag.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    material: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl Drop for KekRecord {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyringBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kek: Option<KekRecord>,
    #[serde(default)]
    deks: Vec<WrappedDek>,
}

// ---------------------------------------------------------------------------
// FileKeyStore
// ---------------------------------------------------------------------------

/// A keyring stored in a single file on disk.
pub struct FileKeyStore {
    path: PathBuf,
    passphrase: Option<Zeroizing<Vec<u8>>>,
    argon2: Argon2Params,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open (or prepare to create) a keyring at `path`.
    ///
    /// Pass `Some(passphrase)` to seal the KEK; the same passphrase must be
    /// supplied on every later open.
    pub fn new(path: &Path, passphrase: Option<&[u8]>, argon2: Argon2Params) -> Result<Self> {
        if passphrase.is_some() {
            argon2.validate()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_vec())),
            argon2,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the path to the keyring file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the keyring file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether the keyring at `path` holds a passphrase-sealed KEK.
    ///
    /// A missing file is reported as unsealed.
    pub fn is_sealed(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let body = decode_keyring(&fs::read(path)?)?;
        Ok(body.kek.as_ref().is_some_and(|k| k.sealing.is_some()))
    }

    fn read_body(&self) -> Result<KeyringBody> {
        if !self.path.exists() {
            return Ok(KeyringBody::default());
        }
        let data = fs::read(&self.path)?;
        decode_keyring(&data)
    }

    fn write_body(&self, body: &KeyringBody) -> Result<()> {
        let buf = encode_keyring(body)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        // The temp file lives next to the target so rename stays atomic.
        let parent = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = parent.join(format!(
            ".{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy()
        ));

        fs::write(&tmp_path, &buf)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut KeyringBody) -> Result<()>,
    {
        let _guard = self.write_lock.lock();
        let mut body = self.read_body()?;
        f(&mut body)?;
        self.write_body(&body)
    }

    fn seal_kek(&self, kek: &KeyEncryptionKey) -> Result<KekRecord> {
        let created_at = Utc::now();
        let Some(passphrase) = &self.passphrase else {
            return Ok(KekRecord {
                version: kek.version(),
                sealing: None,
                material: kek.as_bytes().to_vec(),
                created_at,
            });
        };

        let salt = generate_salt();
        let sealing_key = derive_sealing_key(passphrase, &salt, &self.argon2)?;
        let (material, nonce) =
            encrypt_with_aad(&sealing_key[..], kek.as_bytes(), &kek_aad(kek.version()))?;

        Ok(KekRecord {
            version: kek.version(),
            sealing: Some(Sealing {
                salt: salt.to_vec(),
                argon2: self.argon2,
                nonce: nonce.to_vec(),
            }),
            material,
            created_at,
        })
    }

    fn unseal_kek(&self, record: &KekRecord) -> Result<KeyEncryptionKey> {
        let mut bytes = [0u8; KEY_LEN];
        match &record.sealing {
            None => {
                if record.material.len() != KEY_LEN {
                    return Err(VaultError::KeyIntegrity);
                }
                bytes.copy_from_slice(&record.material);
            }
            Some(sealing) => {
                let passphrase = self.passphrase.as_ref().ok_or_else(|| {
                    VaultError::KeyUnavailable("keyring is passphrase-protected".into())
                })?;
                let sealing_key = derive_sealing_key(passphrase, &sealing.salt, &sealing.argon2)?;
                let plain = decrypt_with_aad(
                    &sealing_key[..],
                    &record.material,
                    &sealing.nonce,
                    &kek_aad(record.version),
                )
                .map_err(|_| VaultError::KeyIntegrity)?;
                if plain.len() != KEY_LEN {
                    return Err(VaultError::KeyIntegrity);
                }
                bytes.copy_from_slice(&plain);
            }
        }
        let kek = KeyEncryptionKey::new(record.version, bytes);
        bytes.zeroize();
        Ok(kek)
    }
}

impl KeyStore for FileKeyStore {
    fn load_kek(&self) -> Result<Option<KeyEncryptionKey>> {
        let body = self.read_body()?;
        body.kek.as_ref().map(|r| self.unseal_kek(r)).transpose()
    }

    fn store_kek(&self, kek: &KeyEncryptionKey) -> Result<()> {
        let record = self.seal_kek(kek)?;
        self.modify(|body| {
            body.kek = Some(record);
            Ok(())
        })
    }

    fn load_wrapped(&self, version: u32) -> Result<Option<WrappedDek>> {
        let body = self.read_body()?;
        Ok(body.deks.into_iter().find(|d| d.version == version))
    }

    fn store_wrapped(&self, dek: &WrappedDek) -> Result<()> {
        self.modify(|body| {
            upsert(&mut body.deks, dek.clone());
            Ok(())
        })
    }

    fn wrapped_versions(&self) -> Result<Vec<u32>> {
        let body = self.read_body()?;
        let mut versions: Vec<u32> = body.deks.iter().map(|d| d.version).collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn commit_kek_rotation(&self, kek: &KeyEncryptionKey, rewrapped: &[WrappedDek]) -> Result<()> {
        let record = self.seal_kek(kek)?;
        self.modify(|body| {
            for dek in rewrapped {
                upsert(&mut body.deks, dek.clone());
            }
            body.kek = Some(record);
            Ok(())
        })
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn upsert(deks: &mut Vec<WrappedDek>, dek: WrappedDek) {
    match deks.iter_mut().find(|d| d.version == dek.version) {
        Some(existing) => *existing = dek,
        None => {
            deks.push(dek);
            deks.sort_by_key(|d| d.version);
        }
    }
}

fn kek_aad(version: u32) -> Vec<u8> {
    format!("sealvault-kek:v{version}").into_bytes()
}

// ---------------------------------------------------------------------------
// Binary envelope
// ---------------------------------------------------------------------------

fn encode_keyring(body: &KeyringBody) -> Result<Vec<u8>> {
    let body_bytes = serde_json::to_vec(body)
        .map_err(|e| VaultError::Serialization(format!("keyring body: {e}")))?;
    let body_len = u32::try_from(body_bytes.len()).map_err(|_| {
        VaultError::Serialization(format!(
            "keyring body length {} exceeds u32::MAX",
            body_bytes.len()
        ))
    })?;

    let checksum = Sha256::digest(&body_bytes);

    let mut buf = Vec::with_capacity(PREFIX_LEN + body_bytes.len() + CHECKSUM_LEN);
    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(&body_bytes);
    buf.extend_from_slice(&checksum);
    Ok(buf)
}

fn decode_keyring(data: &[u8]) -> Result<KeyringBody> {
    if data.len() < PREFIX_LEN + CHECKSUM_LEN {
        return Err(VaultError::InvalidKeyringFormat(
            "file too small to be a valid keyring".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(VaultError::InvalidKeyringFormat(
            "missing SVKR magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(VaultError::InvalidKeyringFormat(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    let body_len = u32::from_le_bytes(
        data[5..9]
            .try_into()
            .map_err(|_| VaultError::InvalidKeyringFormat("bad body length".into()))?,
    ) as usize;

    let body_end = PREFIX_LEN + body_len;
    if body_end + CHECKSUM_LEN != data.len() {
        return Err(VaultError::InvalidKeyringFormat(
            "body length does not match file size".into(),
        ));
    }

    let body_bytes = &data[PREFIX_LEN..body_end];
    let stored = &data[body_end..];
    let actual = Sha256::digest(body_bytes);
    if !bool::from(actual.as_slice().ct_eq(stored)) {
        return Err(VaultError::KeyIntegrity);
    }

    serde_json::from_slice(body_bytes)
        .map_err(|e| VaultError::InvalidKeyringFormat(format!("body JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MIN_MEMORY_KIB;
    use tempfile::TempDir;

    fn fast() -> Argon2Params {
        Argon2Params {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn wrapped(version: u32) -> WrappedDek {
        WrappedDek {
            version,
            kek_version: 1,
            nonce: vec![7; 12],
            ciphertext: vec![9; 48],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plain_kek_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(&dir.path().join("k.keyring"), None, fast()).unwrap();
        let kek = KeyEncryptionKey::generate(1);
        store.store_kek(&kek).unwrap();

        let loaded = store.load_kek().unwrap().unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.as_bytes(), kek.as_bytes());
    }

    #[test]
    fn sealed_kek_needs_right_passphrase() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.keyring");
        let store = FileKeyStore::new(&path, Some("correct horse".as_bytes()), fast()).unwrap();
        let kek = KeyEncryptionKey::generate(4);
        store.store_kek(&kek).unwrap();

        let reopened = FileKeyStore::new(&path, Some("correct horse".as_bytes()), fast()).unwrap();
        assert_eq!(
            reopened.load_kek().unwrap().unwrap().as_bytes(),
            kek.as_bytes()
        );

        let wrong = FileKeyStore::new(&path, Some("wrong".as_bytes()), fast()).unwrap();
        assert!(matches!(wrong.load_kek(), Err(VaultError::KeyIntegrity)));

        let none = FileKeyStore::new(&path, None, fast()).unwrap();
        assert!(matches!(none.load_kek(), Err(VaultError::KeyUnavailable(_))));
    }

    #[test]
    fn is_sealed_reports_passphrase_protection() {
        let dir = TempDir::new().unwrap();
        let sealed = dir.path().join("sealed.keyring");
        let plain = dir.path().join("plain.keyring");

        assert!(!FileKeyStore::is_sealed(&sealed).unwrap());

        FileKeyStore::new(&sealed, Some("pass phrase".as_bytes()), fast())
            .unwrap()
            .store_kek(&KeyEncryptionKey::generate(1))
            .unwrap();
        FileKeyStore::new(&plain, None, fast())
            .unwrap()
            .store_kek(&KeyEncryptionKey::generate(1))
            .unwrap();

        assert!(FileKeyStore::is_sealed(&sealed).unwrap());
        assert!(!FileKeyStore::is_sealed(&plain).unwrap());
    }

    #[test]
    fn wrapped_deks_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.keyring");
        let store = FileKeyStore::new(&path, None, fast()).unwrap();
        store.store_wrapped(&wrapped(2)).unwrap();
        store.store_wrapped(&wrapped(1)).unwrap();

        let reopened = FileKeyStore::new(&path, None, fast()).unwrap();
        assert_eq!(reopened.wrapped_versions().unwrap(), vec![1, 2]);
        let loaded = reopened.load_wrapped(2).unwrap().unwrap();
        assert_eq!(loaded.kek_version, 1);
        assert_eq!(loaded.ciphertext, vec![9; 48]);
        assert!(reopened.load_wrapped(3).unwrap().is_none());
    }

    #[test]
    fn corrupted_body_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.keyring");
        let store = FileKeyStore::new(&path, None, fast()).unwrap();
        store.store_wrapped(&wrapped(1)).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[PREFIX_LEN + 3] ^= 0x01;
        fs::write(&path, &data).unwrap();

        assert!(store.wrapped_versions().is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.keyring");
        fs::write(&path, [0u8; 64]).unwrap();
        let store = FileKeyStore::new(&path, None, fast()).unwrap();
        assert!(matches!(
            store.load_kek(),
            Err(VaultError::InvalidKeyringFormat(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn keyring_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.keyring");
        let store = FileKeyStore::new(&path, None, fast()).unwrap();
        store.store_kek(&KeyEncryptionKey::generate(1)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
