//! Cryptographic primitives for X3DH and Double Ratchet protocols.
//!
//! Provides the protocol's key derivations (built on [`crate::kdf`]),
//! ChaCha20-Poly1305 AEAD encryption/decryption and symmetric key handling
//! with automatic zeroization.

use crate::error::{Error, Result};
use crate::kdf::hkdf_into;
use crate::keys::DhOutput;

use rand_core::CryptoRngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

const X3DH_INFO: &[u8] = b"X3DH";
const ROOT_INFO: &[u8] = b"DoubleRatchet";
const MESSAGE_INFO: &[u8] = b"DoubleRatchetMessage";

pub const KEY_SIZE_32: usize = 32;
pub const KEY_SIZE_64: usize = 64;
pub const TAG_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;

/// 256-bit symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE_32]);

impl SymmetricKey {
    /// Creates a symmetric key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte array reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    fn split(okm: &[u8; KEY_SIZE_64]) -> (Self, Self) {
        let mut first = [0u8; KEY_SIZE_32];
        let mut second = [0u8; KEY_SIZE_32];
        first.copy_from_slice(&okm[..KEY_SIZE_32]);
        second.copy_from_slice(&okm[KEY_SIZE_32..]);
        (Self(first), Self(second))
    }
}

impl ConstantTimeEq for SymmetricKey {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// X3DH root key derivation.
///
/// Computes `SK = HKDF(DH1 || DH2 || DH3 [|| DH4], salt = "", info = "X3DH")`
/// with a 32-byte output. `DH4` is present only when a one-time prekey was
/// part of the handshake.
pub fn derive_x3dh_secret(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> Result<SymmetricKey> {
    let mut ikm = [0u8; KEY_SIZE_32 * 4];
    let mut len = 0;

    for dh in [Some(dh1), Some(dh2), Some(dh3), dh4].into_iter().flatten() {
        ikm[len..len + KEY_SIZE_32].copy_from_slice(dh.as_bytes());
        len += KEY_SIZE_32;
    }

    let mut output = [0u8; KEY_SIZE_32];
    let derived = hkdf_into(&ikm[..len], &[], X3DH_INFO, &mut output);
    ikm.zeroize();
    derived?;

    Ok(SymmetricKey(output))
}

/// Root KDF for a DH ratchet step.
///
/// Computes `RK' || CK = HKDF(ikm = RK, salt = DH_out, info = "DoubleRatchet")`
/// and returns `(RK', CK)`.
pub fn kdf_root(
    root_key: &SymmetricKey,
    dh_output: &DhOutput,
) -> Result<(SymmetricKey, SymmetricKey)> {
    let mut output = [0u8; KEY_SIZE_64];
    hkdf_into(root_key.as_bytes(), dh_output.as_bytes(), ROOT_INFO, &mut output)?;

    let keys = SymmetricKey::split(&output);
    output.zeroize();
    Ok(keys)
}

/// Chain KDF for the symmetric ratchet.
///
/// Computes `MK || CK' = HKDF(ikm = CK, salt = "", info = "DoubleRatchetMessage")`
/// and returns `(MK, CK')`: the message key first, then the next chain key.
pub fn kdf_chain(chain_key: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
    let mut output = [0u8; KEY_SIZE_64];
    hkdf_into(chain_key.as_bytes(), &[], MESSAGE_INFO, &mut output)?;

    let keys = SymmetricKey::split(&output);
    output.zeroize();
    Ok(keys)
}

/// Draws a fresh random 96-bit nonce.
///
/// Every message key is used exactly once, so a random nonce never repeats
/// under the same key.
pub fn generate_nonce<R: CryptoRngCore>(rng: &mut R) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a message using ChaCha20-Poly1305 AEAD.
///
/// Returns the ciphertext with the 16-byte authentication tag appended.
///
/// # Errors
/// Returns `Error::EncryptionFailed` if encryption fails (should not occur in practice).
pub fn encrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    use chacha20poly1305::{
        aead::{Aead, Payload},
        ChaCha20Poly1305, Key, KeyInit, Nonce,
    };

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: plaintext,
        aad: associated_data,
    };

    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::EncryptionFailed)
}

/// Decrypts a message using ChaCha20-Poly1305 AEAD.
///
/// Verifies the authentication tag in constant time before decryption.
///
/// # Errors
/// - `Error::InvalidCiphertext` if the input cannot even hold a tag
/// - `Error::DecryptionFailed` if authentication fails (wrong key, tampered
///   ciphertext or nonce, mismatched associated data)
pub fn decrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    use chacha20poly1305::{
        aead::{Aead, Payload},
        ChaCha20Poly1305, Key, KeyInit, Nonce,
    };

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::InvalidCiphertext(ciphertext.len()));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: ciphertext,
        aad: associated_data,
    };

    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::DecryptionFailed)
}
