//! Error types for pgpkit operations.

use thiserror::Error;

/// Result type alias for pgpkit operations.
pub type Result<T> = std::result::Result<T, PgpkitError>;

/// Main error type for pgpkit operations.
///
/// The first groups of variants are the typed failures callers are expected to
/// branch on (construction, preconditions, decoding). The remaining variants
/// carry a message for the ambient failure classes.
#[derive(Error, Debug)]
pub enum PgpkitError {
    /// Requested key size is below the supported minimum
    #[error("Key size too small (minimum {min} bits)")]
    KeySizeTooSmall { min: usize },

    /// ElGamal keys can only be used as subkeys
    #[error("Master key must not be an ElGamal key")]
    MasterKeyMustNotBeElGamal,

    /// Algorithm is not one of the key generation choices
    #[error("Unknown algorithm choice")]
    UnknownAlgorithmChoice,

    /// A key ring must carry at least one user ID
    #[error("At least one user ID is required")]
    NoUserIds,

    /// Neither recipients nor a symmetric passphrase were given
    #[error("No encryption keys or passphrase given")]
    NoEncryptionKeysOrPassphrase,

    /// The requested signing key ring could not be found
    #[error("Signature key not found")]
    NoSignatureKey,

    /// The signing key is protected and no passphrase is available
    #[error("No passphrase for the signature key")]
    NoSignaturePassphrase,

    /// The signing key ring has no usable signing key
    #[error("Signature failed: no usable signing key")]
    SignatureFailed,

    /// The private key material could not be recovered
    #[error("Could not extract private key")]
    CouldNotExtractPrivateKey,

    /// A protected key needs a passphrase that neither caller nor cache supplied
    #[error("Passphrase required for key {key_id:016X}")]
    PassphraseRequired { key_id: u64 },

    /// External storage is not available
    #[error("External storage not ready")]
    ExternalStorageNotReady,

    /// None of the message recipients has a secret key in the store
    #[error("No secret key found for any recipient")]
    NoSecretKeyFound,

    /// Symmetric decryption requested but no passphrase packet present
    #[error("No symmetric encryption packet found")]
    NoSymmetricEncryptionPacket,

    /// The input is not valid OpenPGP data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The input is OpenPGP data that failed an integrity check
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Passphrase did not unlock the key or session
    #[error("Wrong passphrase")]
    WrongPassphrase,

    /// Operation cancelled through its cancel token
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Armor encoding/decoding errors
    #[error("Armor error: {0}")]
    Armor(String),

    /// Packet parsing or construction errors
    #[error("Packet error: {0}")]
    Packet(String),

    /// Primitive cryptographic failures
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Algorithm or feature not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Key store collaborator errors
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Key server collaborator errors
    #[error("Key server error: {0}")]
    KeyServer(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<std::io::Error> for PgpkitError {
    /// Streaming layers report engine failures through `io::Error`; unwrap
    /// those back into the original variant.
    fn from(err: std::io::Error) -> Self {
        if err
            .get_ref()
            .map(|inner| inner.is::<PgpkitError>())
            .unwrap_or(false)
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(engine) = inner.downcast::<PgpkitError>() {
                    return *engine;
                }
            }
            return Self::Io(std::io::Error::other("unrecoverable stream error"));
        }
        Self::Io(err)
    }
}

impl PgpkitError {
    /// Wraps the error so it can travel through `io::Read`/`io::Write` layers.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    /// Creates a new invalid data error.
    pub fn invalid_data<T: ToString>(msg: T) -> Self {
        Self::InvalidData(msg.to_string())
    }

    /// Creates a new corrupt data error.
    pub fn corrupt_data<T: ToString>(msg: T) -> Self {
        Self::CorruptData(msg.to_string())
    }

    /// Creates a new armor error.
    pub fn armor<T: ToString>(msg: T) -> Self {
        Self::Armor(msg.to_string())
    }

    /// Creates a new packet error.
    pub fn packet<T: ToString>(msg: T) -> Self {
        Self::Packet(msg.to_string())
    }

    /// Creates a new cryptographic error.
    pub fn crypto<T: ToString>(msg: T) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Creates a new unsupported feature error.
    pub fn unsupported<T: ToString>(msg: T) -> Self {
        Self::Unsupported(msg.to_string())
    }

    /// Creates a new key store error.
    pub fn key_store<T: ToString>(msg: T) -> Self {
        Self::KeyStore(msg.to_string())
    }

    /// Creates a new key server error.
    pub fn key_server<T: ToString>(msg: T) -> Self {
        Self::KeyServer(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Creates a new validation error.
    pub fn validation<T: ToString>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// True when the caller should prompt for a (different) passphrase.
    pub fn needs_passphrase(&self) -> bool {
        matches!(
            self,
            Self::WrongPassphrase | Self::PassphraseRequired { .. } | Self::NoSignaturePassphrase
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_round_trip_preserves_variant() {
        let io = PgpkitError::WrongPassphrase.into_io();
        assert!(matches!(PgpkitError::from(io), PgpkitError::WrongPassphrase));

        let io = PgpkitError::corrupt_data("bad mdc").into_io();
        assert!(matches!(PgpkitError::from(io), PgpkitError::CorruptData(_)));
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = PgpkitError::from(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ));
        assert!(matches!(err, PgpkitError::Io(_)));
    }

    #[test]
    fn test_needs_passphrase() {
        assert!(PgpkitError::WrongPassphrase.needs_passphrase());
        assert!(PgpkitError::PassphraseRequired { key_id: 1 }.needs_passphrase());
        assert!(!PgpkitError::NoSecretKeyFound.needs_passphrase());
    }
}
