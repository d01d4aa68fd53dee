//! Error types for the X3DH handshake and Double Ratchet sessions.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Signature over the signed prekey does not verify against the identity key
    #[error("invalid signature")]
    InvalidSignature,

    /// Public key bytes do not decode to a usable curve point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The identity key could not be read from or created in secure storage
    #[error("identity key unavailable")]
    IdentityKeyUnavailable,

    /// The identity capability refused or failed to produce a signature
    #[error("signing failed")]
    SigningFailed,

    /// The identity capability failed to perform key agreement
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// The remote bundle carries no one-time prekeys
    #[error("no one-time prekeys available")]
    MissingPrekeys,

    /// One-time prekey already consumed or never issued
    #[error("one-time prekey already used")]
    OneTimePrekeyConsumed,

    /// Encrypt was called with no sending chain and no way to derive one
    #[error("missing sending chain key")]
    MissingSendChainKey,

    /// Decrypt was called with no receiving chain and no way to derive one
    #[error("missing receiving chain key")]
    MissingRecvChainKey,

    /// A sending-side ratchet step needs a remote ephemeral key that is not known yet
    #[error("remote ephemeral key not available")]
    RemoteEphemeralNotAvailable,

    /// Ciphertext is shorter than the AEAD tag
    #[error("invalid ciphertext length {0}")]
    InvalidCiphertext(usize),

    /// AEAD open failed (wrong key, tampered ciphertext, nonce or header)
    #[error("decryption failed")]
    DecryptionFailed,

    /// AEAD seal failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Message key for this position was already consumed
    #[error("duplicate message")]
    DuplicateMessage,

    /// Skipped too many messages in chain
    #[error("too many skipped messages")]
    TooManySkippedMessages,

    /// Chain has used every message number and must be replaced by a ratchet step
    #[error("message chain exhausted")]
    ChainExhausted,

    /// Requested HKDF output exceeds 255 hash blocks
    #[error("invalid HKDF output length {0}")]
    InvalidKdfLength(usize),

    /// Invalid message format
    #[error("invalid message format")]
    InvalidMessageFormat,

    /// Encoded data carries a version this build does not understand
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// Serialization failed
    #[error("serialization error")]
    SerializationError,

    /// Deserialization failed
    #[error("deserialization error")]
    DeserializationError,

    /// Storage operation failed
    #[error("storage error")]
    StorageError,
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidSignature
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(_: bincode::error::EncodeError) -> Self {
        Error::SerializationError
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(_: bincode::error::DecodeError) -> Self {
        Error::DeserializationError
    }
}
