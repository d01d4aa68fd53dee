//! Identity key capability.
//!
//! The long-term identity private key never leaves the vault. Callers get
//! the public half, signatures, and the one DH operation X3DH needs
//! (`identity x remote`), nothing else. [`SoftwareVault`] implements the
//! capability in process over a pluggable [`SecretStorage`]; a hardware or
//! OS keystore backend implements [`IdentityVault`] directly.
//!
//! # Example
//! ```
//! # use x3dh_ratchet::vault::{IdentityVault, SoftwareVault};
//! let vault = SoftwareVault::in_memory();
//! let identity = vault.fetch_or_create_identity_key().unwrap();
//! assert_eq!(identity, vault.fetch_or_create_identity_key().unwrap());
//!
//! let keys = vault.create_user_keys().unwrap();
//! keys.public_bundle().verify_signature().unwrap();
//! ```

use crate::config::VaultConfig;
use crate::crypto::KEY_SIZE_32;
use crate::error::{Error, Result};
use crate::keys::{DhOutput, IdentityKey, PublicKey, SecretKey, Signature};
use crate::x3dh::{OneTimePrekey, UserKeys};

use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

const IDENTITY_LABEL: &str = "identity.ed25519";
const PREKEY_COUNTER_LABEL: &str = "prekey.next_id";

/// Operations on the long-term identity key.
///
/// Implementations must be safe to share between threads; every method takes
/// `&self`.
pub trait IdentityVault: Send + Sync {
    /// Returns the identity public key, creating and storing the private key
    /// on first use.
    ///
    /// # Errors
    /// `Error::IdentityKeyUnavailable` if the key can be neither read nor
    /// created.
    fn fetch_or_create_identity_key(&self) -> Result<IdentityKey>;

    /// Generates a signed prekey and a batch of one-time prekeys.
    ///
    /// # Errors
    /// `Error::SigningFailed` if the signed prekey cannot be signed.
    fn create_user_keys(&self) -> Result<UserKeys>;

    /// Signs `data` with the identity private key.
    ///
    /// # Errors
    /// `Error::SigningFailed`
    fn request_identity_signature(&self, data: &[u8]) -> Result<Signature>;

    /// X25519 between the identity private key and `remote`.
    ///
    /// # Errors
    /// `Error::KeyAgreementFailed` if the identity key is unavailable or the
    /// remote key yields a non-contributory result.
    fn compute_shared_secret_with_identity(&self, remote: &PublicKey) -> Result<DhOutput>;
}

/// Durable byte storage for the vault's secrets.
pub trait SecretStorage: Send + Sync {
    /// Reads the value stored under `label`, if any.
    fn load(&self, label: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Writes `value` under `label`, replacing any previous value.
    fn store(&self, label: &str, value: &[u8]) -> Result<()>;
}

/// Thread-safe in-memory secret storage. Clones share the same contents.
#[derive(Clone, Default)]
pub struct InMemorySecretStorage {
    entries: Arc<Mutex<HashMap<String, Zeroizing<Vec<u8>>>>>,
}

impl InMemorySecretStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStorage for InMemorySecretStorage {
    fn load(&self, label: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let entries = self.entries.lock().map_err(|_| Error::StorageError)?;
        Ok(entries.get(label).cloned())
    }

    fn store(&self, label: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::StorageError)?;
        entries.insert(label.to_owned(), Zeroizing::new(value.to_vec()));
        Ok(())
    }
}

impl std::fmt::Debug for InMemorySecretStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySecretStorage").finish_non_exhaustive()
    }
}

/// Software implementation of [`IdentityVault`].
pub struct SoftwareVault<S = InMemorySecretStorage> {
    storage: S,
    config: VaultConfig,
    // Serializes load-or-create so concurrent first calls agree on one key.
    lock: Mutex<()>,
}

impl SoftwareVault<InMemorySecretStorage> {
    /// A vault over fresh in-memory storage with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(InMemorySecretStorage::new(), VaultConfig::default())
    }
}

impl<S: SecretStorage> SoftwareVault<S> {
    pub fn new(storage: S, config: VaultConfig) -> Self {
        Self {
            storage,
            config,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let _guard = self.lock.lock().map_err(|_| Error::IdentityKeyUnavailable)?;

        let stored = self
            .storage
            .load(IDENTITY_LABEL)
            .map_err(|_| Error::IdentityKeyUnavailable)?;

        if let Some(bytes) = stored {
            let mut seed: [u8; KEY_SIZE_32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::IdentityKeyUnavailable)?;
            let key = SigningKey::from_bytes(&seed);
            seed.zeroize();
            return Ok(key);
        }

        let key = SigningKey::generate(&mut OsRng);
        self.storage
            .store(IDENTITY_LABEL, key.as_bytes())
            .map_err(|_| Error::IdentityKeyUnavailable)?;
        tracing::debug!(identity = ?IdentityKey::from(key.verifying_key()), "created identity key");
        Ok(key)
    }

    /// Reserves `count` consecutive prekey IDs and returns the first.
    fn reserve_prekey_ids(&self, count: u32) -> Result<u32> {
        let _guard = self.lock.lock().map_err(|_| Error::StorageError)?;

        let first = match self.storage.load(PREKEY_COUNTER_LABEL)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::StorageError)?;
                u32::from_le_bytes(raw)
            }
            None => 0,
        };

        let next = first.checked_add(count).ok_or(Error::StorageError)?;
        self.storage
            .store(PREKEY_COUNTER_LABEL, &next.to_le_bytes())?;
        Ok(first)
    }
}

impl<S: SecretStorage> IdentityVault for SoftwareVault<S> {
    fn fetch_or_create_identity_key(&self) -> Result<IdentityKey> {
        Ok(IdentityKey::from(self.signing_key()?.verifying_key()))
    }

    fn create_user_keys(&self) -> Result<UserKeys> {
        let identity_key = self.fetch_or_create_identity_key()?;

        let signed_prekey = SecretKey::generate(&mut OsRng);
        let signature = self.request_identity_signature(signed_prekey.public_key().as_bytes())?;

        let count = self.config.prekey_batch_size;
        let first_id = self.reserve_prekey_ids(count)?;
        let one_time_prekeys = (first_id..first_id + count)
            .map(|id| OneTimePrekey::new(id, SecretKey::generate(&mut OsRng)))
            .collect();

        tracing::debug!(first_id, count, "generated prekey batch");

        Ok(UserKeys {
            identity_key,
            signed_prekey,
            signed_prekey_signature: signature,
            one_time_prekeys,
        })
    }

    fn request_identity_signature(&self, data: &[u8]) -> Result<Signature> {
        let key = self.signing_key().map_err(|_| Error::SigningFailed)?;
        let signature = key.try_sign(data).map_err(|_| Error::SigningFailed)?;
        Ok(Signature::from(signature))
    }

    fn compute_shared_secret_with_identity(&self, remote: &PublicKey) -> Result<DhOutput> {
        let key = self.signing_key().map_err(|_| Error::KeyAgreementFailed)?;
        let secret = StaticSecret::from(key.to_scalar_bytes());

        let shared = secret.diffie_hellman(&remote.to_x25519());
        if !shared.was_contributory() {
            return Err(Error::KeyAgreementFailed);
        }
        Ok(DhOutput::from_bytes(*shared.as_bytes()))
    }
}

impl<S> std::fmt::Debug for SoftwareVault<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareVault")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
