//! HKDF-SHA256 extract-and-expand (RFC 5869).
//!
//! Every key in the protocol passes through here: the X3DH root key, each
//! root-ratchet step and each chain-key step. The functions are pure and
//! deterministic.

use crate::error::{Error, Result};

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Output size of the underlying HMAC-SHA256.
pub const HASH_LEN: usize = 32;

/// RFC 5869 limit on the expand output: 255 HMAC blocks.
pub const MAX_OUTPUT_LEN: usize = 255 * HASH_LEN;

/// Pseudorandom key produced by [`extract`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Prk([u8; HASH_LEN]);

impl Prk {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Prk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prk([REDACTED])")
    }
}

/// `PRK = HMAC(salt, IKM)`.
///
/// An empty salt is replaced by a block of zeros, which HMAC treats
/// identically to the empty key.
#[must_use]
pub fn extract(salt: &[u8], ikm: &[u8]) -> Prk {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
    Prk(prk.into())
}

/// `OKM = T(1) || T(2) || ...` truncated to `length`, where
/// `T(n) = HMAC(PRK, T(n-1) || info || n)`.
///
/// # Errors
/// Returns `Error::InvalidKdfLength` if `length` exceeds [`MAX_OUTPUT_LEN`].
pub fn expand(prk: &Prk, info: &[u8], length: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut okm = Zeroizing::new(vec![0u8; length]);
    expand_into(prk, info, &mut okm)?;
    Ok(okm)
}

/// Same as [`expand`] but writes into a caller-provided buffer.
pub fn expand_into(prk: &Prk, info: &[u8], okm: &mut [u8]) -> Result<()> {
    if okm.len() > MAX_OUTPUT_LEN {
        return Err(Error::InvalidKdfLength(okm.len()));
    }

    let hkdf = Hkdf::<Sha256>::from_prk(prk.as_bytes())
        .map_err(|_| Error::InvalidKdfLength(okm.len()))?;
    hkdf.expand(info, okm)
        .map_err(|_| Error::InvalidKdfLength(okm.len()))
}

/// Full HKDF: `expand(extract(salt, ikm), info, length)`.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Zeroizing<Vec<u8>>> {
    expand(&extract(salt, ikm), info, length)
}

/// Full HKDF into a fixed-size buffer.
pub fn hkdf_into(ikm: &[u8], salt: &[u8], info: &[u8], okm: &mut [u8]) -> Result<()> {
    expand_into(&extract(salt, ikm), info, okm)
}
