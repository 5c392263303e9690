//! Cryptographic primitives for SealVault.
//!
//! This module provides:
//! - AES-256-GCM block encryption and decryption (`encryption`)
//! - KEK/DEK key types and HKDF wrapping-key derivation (`keys`)
//! - The KEK/DEK hierarchy manager (`hierarchy`)
//! - Argon2id passphrase derivation for sealing the KEK at rest (`kdf`)

pub mod encryption;
pub mod hierarchy;
pub mod kdf;
pub mod keys;

pub use encryption::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, NONCE_LEN};
pub use hierarchy::{KeyHierarchy, KeyStatus, RotationScope};
pub use kdf::Argon2Params;
pub use keys::{DataKey, KeyEncryptionKey};
