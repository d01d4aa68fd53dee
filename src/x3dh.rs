//! X3DH (Extended Triple Diffie-Hellman) key agreement protocol.
//!
//! Implements Signal's asynchronous key agreement as specified in:
//! <https://signal.org/docs/specifications/x3dh/>
//!
//! ## Identity Keys
//!
//! The identity key is a single Ed25519 key pair held by an
//! [`IdentityVault`]. It signs the signed prekey and, mapped onto Curve25519,
//! takes part in DH1/DH2. The private half never leaves the vault, so every
//! DH involving the local identity key goes through
//! [`IdentityVault::compute_shared_secret_with_identity`].
//!
//! ## Protocol Flow
//!
//! 1. **Responder (Bob)** publishes a [`KeyBundle`]:
//!    - Identity key (Ed25519)
//!    - Signed prekey (X25519, medium-term)
//!    - Signature over the signed prekey by the identity key
//!    - Index-tagged one-time prekeys
//!
//! 2. **Initiator (Alice)** verifies the bundle and computes:
//!    - DH1 = `DH(IK_A, SPK_B)`   (in Alice's vault)
//!    - DH2 = `DH(EK_A, IK_B)`
//!    - DH3 = `DH(EK_A, SPK_B)`
//!    - DH4 = `DH(EK_A, OPK_B)` [if a one-time prekey was selected]
//!    - SK = HKDF(DH1 || DH2 || DH3 || DH4, info = "X3DH")
//!
//! 3. **Responder (Bob)** receives Alice's identity key, ephemeral key and the
//!    one-time prekey ID, and computes the same SK with the roles of DH1 and
//!    DH2 swapped (DH2 in Bob's vault).

use crate::crypto::{derive_x3dh_secret, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, PublicKey, SecretKey, Signature};
use crate::storage::{InMemoryPreKeyStore, PreKeyStore};
use crate::vault::IdentityVault;
use rand_core::CryptoRngCore;

/// Key bundle published by a user so others can start sessions with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    /// Long-term Ed25519 identity key
    pub identity_key: IdentityKey,

    /// Medium-term signed prekey (X25519)
    pub signed_prekey: PublicKey,

    /// Identity signature over the signed prekey bytes
    pub signed_prekey_signature: Signature,

    /// One-time prekeys, in the order they were issued
    pub prekeys: Vec<(u32, PublicKey)>,
}

impl KeyBundle {
    /// Verifies the identity signature on the signed prekey.
    ///
    /// # Returns
    /// - `Ok(())` if signature is valid
    /// - `Err(Error::InvalidSignature)` if verification fails
    /// - `Err(Error::InvalidPublicKey)` if the identity key is not a valid point
    pub fn verify_signature(&self) -> Result<()> {
        self.identity_key
            .verify(self.signed_prekey.as_bytes(), &self.signed_prekey_signature)
    }

    /// Looks up a published one-time prekey by index.
    #[must_use]
    pub fn prekey(&self, id: u32) -> Option<PublicKey> {
        self.prekeys
            .iter()
            .find(|(prekey_id, _)| *prekey_id == id)
            .map(|(_, key)| *key)
    }
}

/// A one-time prekey and the index it is published under.
pub struct OneTimePrekey {
    id: u32,
    secret: SecretKey,
}

impl OneTimePrekey {
    #[must_use]
    pub fn new(id: u32, secret: SecretKey) -> Self {
        Self { id, secret }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }
}

impl std::fmt::Debug for OneTimePrekey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimePrekey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Private prekey material produced by [`IdentityVault::create_user_keys`].
pub struct UserKeys {
    pub identity_key: IdentityKey,
    pub signed_prekey: SecretKey,
    pub signed_prekey_signature: Signature,
    pub one_time_prekeys: Vec<OneTimePrekey>,
}

impl UserKeys {
    /// The publishable half of these keys.
    #[must_use]
    pub fn public_bundle(&self) -> KeyBundle {
        KeyBundle {
            identity_key: self.identity_key,
            signed_prekey: self.signed_prekey.public_key(),
            signed_prekey_signature: self.signed_prekey_signature,
            prekeys: self
                .one_time_prekeys
                .iter()
                .map(|prekey| (prekey.id, prekey.public_key()))
                .collect(),
        }
    }

    /// Splits off the signed prekey and moves the one-time prekeys into a
    /// store, from which each can be consumed exactly once.
    pub fn into_prekey_store(self) -> Result<(SecretKey, InMemoryPreKeyStore)> {
        let mut store = InMemoryPreKeyStore::new();
        store.populate(
            self.one_time_prekeys
                .into_iter()
                .map(|prekey| (prekey.id, prekey.secret)),
        )?;
        Ok((self.signed_prekey, store))
    }
}

impl std::fmt::Debug for UserKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKeys")
            .field("identity_key", &self.identity_key)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .finish_non_exhaustive()
    }
}

/// Result of X3DH initiation by Alice.
#[derive(Debug)]
pub struct InitiatorResult {
    /// Shared root key
    pub root_key: SymmetricKey,

    /// Alice's ephemeral key. Its public half opens the first sending chain
    /// and tells Bob which ephemeral to use.
    pub ephemeral: SecretKey,

    /// Index of Bob's one-time prekey that was used, if any
    pub used_prekey_id: Option<u32>,

    /// Bob's signed prekey, the first remote ratchet key
    pub remote_signed_prekey: PublicKey,
}

/// Initiates X3DH key agreement (Alice's side).
///
/// Uses the one-time prekey with index `prekey_id`, or the first one the
/// bundle offers when `prekey_id` is `None`.
///
/// # Errors
/// - `Error::MissingPrekeys` if the bundle has no one-time prekeys, or none
///   with the requested index
/// - `Error::InvalidSignature` / `Error::InvalidPublicKey` if the bundle does
///   not verify
/// - `Error::KeyAgreementFailed` from the vault
pub fn initiate<R, V>(
    rng: &mut R,
    vault: &V,
    bundle: &KeyBundle,
    prekey_id: Option<u32>,
) -> Result<InitiatorResult>
where
    R: CryptoRngCore,
    V: IdentityVault + ?Sized,
{
    let one_time_prekey = match prekey_id {
        Some(id) => bundle.prekey(id).map(|key| (id, key)),
        None => bundle.prekeys.first().copied(),
    };

    let Some(one_time_prekey) = one_time_prekey else {
        tracing::warn!(requested = ?prekey_id, "bundle offers no usable one-time prekey");
        return Err(Error::MissingPrekeys);
    };

    agree(rng, vault, bundle, Some(one_time_prekey))
}

/// Initiates X3DH without a one-time prekey (three DH outputs only).
///
/// Forward secrecy of the first messages then rests on the signed prekey
/// alone; prefer [`initiate`] when the bundle offers one-time prekeys.
pub fn initiate_without_prekey<R, V>(
    rng: &mut R,
    vault: &V,
    bundle: &KeyBundle,
) -> Result<InitiatorResult>
where
    R: CryptoRngCore,
    V: IdentityVault + ?Sized,
{
    agree(rng, vault, bundle, None)
}

fn agree<R, V>(
    rng: &mut R,
    vault: &V,
    bundle: &KeyBundle,
    one_time_prekey: Option<(u32, PublicKey)>,
) -> Result<InitiatorResult>
where
    R: CryptoRngCore,
    V: IdentityVault + ?Sized,
{
    // Verify Bob's signature on the bundle
    bundle.verify_signature()?;

    let remote_identity = bundle.identity_key.to_key_agreement()?;
    let ephemeral = SecretKey::generate(rng);

    // DH1 = DH(IK_A, SPK_B)
    let dh1 = vault.compute_shared_secret_with_identity(&bundle.signed_prekey)?;

    // DH2 = DH(EK_A, IK_B)
    let dh2 = ephemeral.diffie_hellman(&remote_identity);

    // DH3 = DH(EK_A, SPK_B)
    let dh3 = ephemeral.diffie_hellman(&bundle.signed_prekey);

    // DH4 = DH(EK_A, OPK_B)
    let dh4 = one_time_prekey.map(|(_, key)| ephemeral.diffie_hellman(&key));

    let root_key = derive_x3dh_secret(&dh1, &dh2, &dh3, dh4.as_ref())?;
    let used_prekey_id = one_time_prekey.map(|(id, _)| id);

    tracing::debug!(
        remote = ?bundle.identity_key,
        prekey_id = ?used_prekey_id,
        "initiated X3DH"
    );

    Ok(InitiatorResult {
        root_key,
        ephemeral,
        used_prekey_id,
        remote_signed_prekey: bundle.signed_prekey,
    })
}

/// Passive X3DH (Bob's side).
///
/// # Arguments
/// * `vault` - Bob's identity vault
/// * `sender_identity` - Alice's identity key
/// * `sender_ephemeral` - Alice's ephemeral key (the first header's ratchet key)
/// * `signed_prekey` - Bob's signed prekey
/// * `one_time_prekey` - the one-time prekey Alice selected, if any
///
/// # Returns
/// The root key matching Alice's derivation
pub fn respond<V>(
    vault: &V,
    sender_identity: &IdentityKey,
    sender_ephemeral: &PublicKey,
    signed_prekey: &SecretKey,
    one_time_prekey: Option<&SecretKey>,
) -> Result<SymmetricKey>
where
    V: IdentityVault + ?Sized,
{
    let sender_identity_dh = sender_identity.to_key_agreement()?;

    // DH1 = DH(SPK_B, IK_A)
    let dh1 = signed_prekey.diffie_hellman(&sender_identity_dh);

    // DH2 = DH(IK_B, EK_A)
    let dh2 = vault.compute_shared_secret_with_identity(sender_ephemeral)?;

    // DH3 = DH(SPK_B, EK_A)
    let dh3 = signed_prekey.diffie_hellman(sender_ephemeral);

    // DH4 = DH(OPK_B, EK_A)
    let dh4 = one_time_prekey.map(|opk| opk.diffie_hellman(sender_ephemeral));

    let root_key = derive_x3dh_secret(&dh1, &dh2, &dh3, dh4.as_ref())?;
    tracing::debug!(remote = ?sender_identity, one_time = dh4.is_some(), "completed passive X3DH");
    Ok(root_key)
}

/// [`respond`], consuming the one-time prekey from `store`.
///
/// # Errors
/// `Error::OneTimePrekeyConsumed` if `one_time_prekey_id` is not in the store.
pub fn respond_from_store<V, S>(
    vault: &V,
    store: &mut S,
    sender_identity: &IdentityKey,
    sender_ephemeral: &PublicKey,
    signed_prekey: &SecretKey,
    one_time_prekey_id: Option<u32>,
) -> Result<SymmetricKey>
where
    V: IdentityVault + ?Sized,
    S: PreKeyStore + ?Sized,
{
    let one_time_prekey = match one_time_prekey_id {
        Some(id) => {
            let Some(key) = store.consume_one_time_prekey(id)? else {
                tracing::warn!(prekey_id = id, "one-time prekey missing or already consumed");
                return Err(Error::OneTimePrekeyConsumed);
            };
            Some(key)
        }
        None => None,
    };

    respond(
        vault,
        sender_identity,
        sender_ephemeral,
        signed_prekey,
        one_time_prekey.as_ref(),
    )
}
