use thiserror::Error;

/// All errors that can occur in SealVault.
///
/// Messages never carry plaintext or key material.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- Input errors ---
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    // --- Policy errors ---
    /// Deliberately carries no detail about which check failed.
    #[error("permission denied")]
    PermissionDenied,

    #[error("Secret has expired")]
    Expired,

    #[error("Read limit exceeded for this secret version")]
    ReadLimitExceeded,

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: authentication tag did not verify")]
    CryptoAuth,

    #[error("Key material failed integrity check: it may be corrupted or tampered")]
    KeyIntegrity,

    #[error("Key initialization failed: {0}")]
    KeyInit(String),

    #[error("Key material unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Chunking errors ---
    #[error("Chunk integrity error: {0}")]
    ChunkIntegrity(String),

    // --- Storage errors ---
    #[error("Concurrent write conflict: {0}")]
    Concurrency(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid keyring format: {0}")]
    InvalidKeyringFormat(String),

    // --- Operation control ---
    #[error("Operation cancelled")]
    Cancelled,

    // --- Config errors ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    Serialization(String),

    // --- Audit errors ---
    #[error("Audit error: {0}")]
    Audit(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Returns `true` for failures that are safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::Concurrency(_) | VaultError::StorageUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => VaultError::NotFound("record".into()),
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                VaultError::Concurrency(format!("constraint violation: {e}"))
            }
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                VaultError::StorageUnavailable(format!("database busy: {e}"))
            }
            other => VaultError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Convenience type alias for SealVault results.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_flagged() {
        assert!(VaultError::Concurrency("x".into()).is_transient());
        assert!(VaultError::StorageUnavailable("x".into()).is_transient());
        assert!(!VaultError::PermissionDenied.is_transient());
        assert!(!VaultError::CryptoAuth.is_transient());
    }

    #[test]
    fn permission_denied_reveals_nothing() {
        assert_eq!(VaultError::PermissionDenied.to_string(), "permission denied");
    }
}
