//! AES-256-GCM authenticated encryption of single byte blocks.
//!
//! Each call to `encrypt` generates a fresh random 12-byte nonce from the
//! OS CSPRNG and returns it alongside the ciphertext.  The 16-byte auth
//! tag is appended to the ciphertext.  Nonces are never derived from a
//! counter, so concurrent writers in different processes cannot collide.
//!
//! Layout of a stored block:
//!   ciphertext = [ encrypted bytes | 16-byte auth tag ]
//!   nonce      = [ 12 bytes ]  (stored next to the ciphertext)

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::errors::{Result, VaultError};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the appended authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Size of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Encrypt `plaintext` with a 32-byte `key`.
///
/// Returns `(ciphertext, nonce)`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Encrypt `plaintext`, binding `aad` as associated data.
///
/// The same `aad` must be supplied to `decrypt_with_aad`.
pub fn encrypt_with_aad(
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| VaultError::EncryptionFailed(format!("encryption error: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    Ok((ciphertext, nonce_bytes))
}

/// Decrypt a block produced by `encrypt`.
pub fn decrypt(key: &[u8], ciphertext: &[u8], nonce: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    decrypt_with_aad(key, ciphertext, nonce, &[])
}

/// Decrypt a block produced by `encrypt_with_aad`.
///
/// Any failure (wrong key, wrong nonce, wrong aad, flipped bit, malformed
/// input) is reported as `CryptoAuth`; no partial plaintext is returned.
pub fn decrypt_with_aad(
    key: &[u8],
    ciphertext: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(VaultError::CryptoAuth);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::CryptoAuth)?;

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::CryptoAuth)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_mismatch_fails() {
        let key = [0x42u8; KEY_LEN];
        let (ct, nonce) = encrypt_with_aad(&key, b"value", b"node-a|0|1").unwrap();

        let ok = decrypt_with_aad(&key, &ct, &nonce, b"node-a|0|1").unwrap();
        assert_eq!(ok.as_slice(), b"value");

        let err = decrypt_with_aad(&key, &ct, &nonce, b"node-b|0|1");
        assert!(matches!(err, Err(VaultError::CryptoAuth)));
    }

    #[test]
    fn short_nonce_is_rejected() {
        let key = [0x42u8; KEY_LEN];
        let (ct, _) = encrypt(&key, b"value").unwrap();
        assert!(matches!(
            decrypt(&key, &ct, &[0u8; 8]),
            Err(VaultError::CryptoAuth)
        ));
    }

    #[test]
    fn ciphertext_carries_tag() {
        let key = [0x01u8; KEY_LEN];
        let (ct, _) = encrypt(&key, b"").unwrap();
        assert_eq!(ct.len(), TAG_LEN);
    }
}
