//! Cryptographic key types with memory safety guarantees.
//!
//! Key agreement uses X25519. Identity keys are Ed25519 signing keys; for
//! X3DH they are reinterpreted as X25519 keys through the Edwards-to-Montgomery
//! map, so one long-term key both signs prekeys and takes part in DH.

use crate::{
    crypto::KEY_SIZE_32,
    error::{Error, Result},
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

fn fingerprint(f: &mut std::fmt::Formatter<'_>, name: &str, bytes: &[u8]) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for byte in &bytes[..8] {
        write!(f, "{byte:02x}")?;
    }
    write!(f, "...)")
}

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE_32]);

impl PublicKey {
    /// Size in bytes
    pub const SIZE: usize = KEY_SIZE_32;

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fingerprint(f, "PublicKey", &self.0)
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(pk: X25519PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        PublicKey::from(X25519PublicKey::from(secret))
    }
}

/// X25519 secret key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Raw scalar bytes, for persisting session state.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE_32] {
        self.0.to_bytes()
    }

    /// Get the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.0)
    }

    /// Perform X25519 Diffie-Hellman.
    ///
    /// The output must go through a KDF before it is used as a key.
    #[must_use]
    pub fn diffie_hellman(&self, public: &PublicKey) -> DhOutput {
        let shared = self.0.diffie_hellman(&public.to_x25519());
        DhOutput(*shared.as_bytes())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Output of Diffie-Hellman operation (32 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_SIZE_32]);

impl DhOutput {
    /// Wraps a shared secret computed elsewhere, e.g. inside an [`IdentityVault`].
    ///
    /// [`IdentityVault`]: crate::vault::IdentityVault
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Returns a byte slice of the Diffie-Hellman operation output
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Ed25519 identity public key, as published in a key bundle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey([u8; KEY_SIZE_32]);

impl IdentityKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    /// Maps the Ed25519 point onto Curve25519 for use in X25519.
    ///
    /// Rejects encodings that are not points, and points outside the
    /// prime-order subgroup.
    pub fn to_key_agreement(&self) -> Result<PublicKey> {
        let point = CompressedEdwardsY(self.0)
            .decompress()
            .ok_or(Error::InvalidPublicKey)?;

        if !point.is_torsion_free() {
            return Err(Error::InvalidPublicKey);
        }

        Ok(PublicKey::from_bytes(point.to_montgomery().to_bytes()))
    }

    /// Verify an Ed25519 signature made by this identity.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| Error::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        verifying_key
            .verify(message, &sig)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fingerprint(f, "IdentityKey", &self.0)
    }
}

impl From<VerifyingKey> for IdentityKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fingerprint(f, "Signature", &self.0)
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(sig: ed25519_dalek::Signature) -> Self {
        Self(sig.to_bytes())
    }
}
