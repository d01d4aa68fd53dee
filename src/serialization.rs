//! Versioned encodings for messages, sessions and key bundles.
//!
//! Every encoding starts with a one-byte format version; decoders reject
//! versions they do not know with `Error::UnsupportedVersion`.
//!
//! - **Message** (transport): `version || header || nonce(12) || ciphertext`,
//!   with the header laid out as in [`Header::to_bytes`].
//! - **Session** (persistence): `version || bincode(SessionStateV1)`. The
//!   snapshot types are separate from [`Session`] so the in-memory layout can
//!   change without breaking stored sessions.
//! - **Key bundle** (directory): `version || bincode(KeyBundleV1)`.

use crate::chain::{Chain, ChainState};
use crate::config::SessionConfig;
use crate::crypto::{SymmetricKey, KEY_SIZE_32, NONCE_SIZE};
use crate::double_ratchet::{Header, Message, Session};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, PublicKey, SecretKey, Signature, SIGNATURE_LENGTH};
use crate::storage::SkippedKeyCache;
use crate::x3dh::KeyBundle;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const MESSAGE_VERSION: u8 = 1;
pub const SESSION_VERSION: u8 = 1;
pub const BUNDLE_VERSION: u8 = 1;

/// Upper bound on what the bincode decoder will allocate for one value.
const MAX_ENCODED_LEN: usize = 16 * 1024 * 1024;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_ENCODED_LEN>()
}

fn split_version(bytes: &[u8], expected: u8) -> Result<&[u8]> {
    let (&version, body) = bytes.split_first().ok_or(Error::InvalidMessageFormat)?;
    if version != expected {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(body)
}

fn encode_versioned<T: Serialize>(version: u8, value: &T) -> Result<Vec<u8>> {
    let mut bytes = vec![version];
    bytes.extend(bincode::serde::encode_to_vec(value, bincode_config())?);
    Ok(bytes)
}

fn decode_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(body, bincode_config())?;
    if read != body.len() {
        return Err(Error::DeserializationError);
    }
    Ok(value)
}

impl Message {
    /// Wire encoding for the transport.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header.to_bytes();
        let mut bytes = Vec::with_capacity(1 + header.len() + NONCE_SIZE + self.ciphertext.len());
        bytes.push(MESSAGE_VERSION);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses the wire encoding. The ciphertext is not checked here; a short
    /// or forged one is rejected by [`Session::decrypt`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = split_version(bytes, MESSAGE_VERSION)?;
        let (header, header_len) = Header::decode(body)?;

        let rest = &body[header_len..];
        if rest.len() < NONCE_SIZE {
            return Err(Error::InvalidMessageFormat);
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        Ok(Self {
            header,
            nonce: nonce.try_into().map_err(|_| Error::InvalidMessageFormat)?,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

#[derive(Serialize, Deserialize, Zeroize)]
struct ChainV1 {
    key: [u8; KEY_SIZE_32],
    counter: u32,
}

#[derive(Serialize, Deserialize, Zeroize)]
struct SkippedKeyV1 {
    ephemeral: [u8; KEY_SIZE_32],
    message_number: u32,
    key: [u8; KEY_SIZE_32],
}

/// Version 1 session snapshot.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionStateV1 {
    root_key: [u8; KEY_SIZE_32],
    sending: Option<ChainV1>,
    receiving: Option<ChainV1>,
    previous_sending_length: u32,
    local_ephemeral: Option<[u8; KEY_SIZE_32]>,
    remote_ephemeral: Option<[u8; KEY_SIZE_32]>,
    sending_ratchet_pending: bool,
    /// Oldest first, so eviction order survives a restore.
    skipped: Vec<SkippedKeyV1>,
    pending_prekey_id: Option<u32>,
    max_skip: u32,
    max_cached_keys: u64,
}

fn chain_to_v1(state: &ChainState) -> Option<ChainV1> {
    state.established().map(|chain| ChainV1 {
        key: *chain.key().as_bytes(),
        counter: chain.counter(),
    })
}

fn chain_from_v1(chain: Option<&ChainV1>) -> ChainState {
    match chain {
        Some(chain) => ChainState::Established(Chain::new(
            SymmetricKey::from_bytes(chain.key),
            chain.counter,
        )),
        None => ChainState::Uninitialized,
    }
}

impl From<&Session> for SessionStateV1 {
    fn from(session: &Session) -> Self {
        Self {
            root_key: *session.root_key.as_bytes(),
            sending: chain_to_v1(&session.sending),
            receiving: chain_to_v1(&session.receiving),
            previous_sending_length: session.previous_sending_length,
            local_ephemeral: session.local_ephemeral.as_ref().map(SecretKey::to_bytes),
            remote_ephemeral: session.remote_ephemeral.map(|key| *key.as_bytes()),
            sending_ratchet_pending: session.sending_ratchet_pending,
            skipped: session
                .skipped
                .iter()
                .map(|(ephemeral, message_number, key)| SkippedKeyV1 {
                    ephemeral: *ephemeral.as_bytes(),
                    message_number,
                    key: *key.as_bytes(),
                })
                .collect(),
            pending_prekey_id: session.pending_prekey_id,
            max_skip: session.config.max_skip,
            max_cached_keys: session.config.max_cached_keys as u64,
        }
    }
}

impl TryFrom<&SessionStateV1> for Session {
    type Error = Error;

    fn try_from(state: &SessionStateV1) -> Result<Self> {
        let max_cached_keys =
            usize::try_from(state.max_cached_keys).map_err(|_| Error::DeserializationError)?;
        let config = SessionConfig {
            max_skip: state.max_skip,
            max_cached_keys,
        };

        let mut skipped = SkippedKeyCache::new(max_cached_keys);
        for entry in &state.skipped {
            skipped.insert(
                PublicKey::from_bytes(entry.ephemeral),
                entry.message_number,
                SymmetricKey::from_bytes(entry.key),
            );
        }

        Ok(Self {
            root_key: SymmetricKey::from_bytes(state.root_key),
            sending: chain_from_v1(state.sending.as_ref()),
            receiving: chain_from_v1(state.receiving.as_ref()),
            previous_sending_length: state.previous_sending_length,
            local_ephemeral: state.local_ephemeral.map(SecretKey::from_bytes),
            remote_ephemeral: state.remote_ephemeral.map(PublicKey::from_bytes),
            sending_ratchet_pending: state.sending_ratchet_pending,
            skipped,
            pending_prekey_id: state.pending_prekey_id,
            config,
        })
    }
}

/// A decoded session snapshot, tagged with its format version.
pub enum PersistedSession {
    V1(SessionStateV1),
}

impl PersistedSession {
    /// Parses a stored session.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = split_version(bytes, SESSION_VERSION)?;
        Ok(Self::V1(decode_body(body)?))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::V1(state) => encode_versioned(SESSION_VERSION, state),
        }
    }

    pub fn to_session(&self) -> Result<Session> {
        match self {
            Self::V1(state) => Session::try_from(state),
        }
    }
}

impl Session {
    /// Snapshot for persistence. Contains every secret in the session, so
    /// it must be stored encrypted at rest.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        PersistedSession::V1(SessionStateV1::from(self)).encode()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        PersistedSession::decode(bytes)?.to_session()
    }
}

/// Version 1 key bundle.
#[derive(Serialize, Deserialize)]
pub struct KeyBundleV1 {
    identity_key: [u8; KEY_SIZE_32],
    signed_prekey: [u8; KEY_SIZE_32],
    signed_prekey_signature: Vec<u8>,
    prekeys: Vec<(u32, [u8; KEY_SIZE_32])>,
}

/// A decoded key bundle, tagged with its format version.
pub enum KeyBundleWire {
    V1(KeyBundleV1),
}

impl KeyBundleWire {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = split_version(bytes, BUNDLE_VERSION)?;
        Ok(Self::V1(decode_body(body)?))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::V1(bundle) => encode_versioned(BUNDLE_VERSION, bundle),
        }
    }

    pub fn to_bundle(&self) -> Result<KeyBundle> {
        match self {
            Self::V1(wire) => {
                let signature: [u8; SIGNATURE_LENGTH] = wire
                    .signed_prekey_signature
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::DeserializationError)?;

                Ok(KeyBundle {
                    identity_key: IdentityKey::from_bytes(wire.identity_key),
                    signed_prekey: PublicKey::from_bytes(wire.signed_prekey),
                    signed_prekey_signature: Signature::from_bytes(signature),
                    prekeys: wire
                        .prekeys
                        .iter()
                        .map(|(id, key)| (*id, PublicKey::from_bytes(*key)))
                        .collect(),
                })
            }
        }
    }
}

impl From<&KeyBundle> for KeyBundleWire {
    fn from(bundle: &KeyBundle) -> Self {
        Self::V1(KeyBundleV1 {
            identity_key: *bundle.identity_key.as_bytes(),
            signed_prekey: *bundle.signed_prekey.as_bytes(),
            signed_prekey_signature: bundle.signed_prekey_signature.as_bytes().to_vec(),
            prekeys: bundle
                .prekeys
                .iter()
                .map(|(id, key)| (*id, *key.as_bytes()))
                .collect(),
        })
    }
}

impl KeyBundle {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        KeyBundleWire::from(self).encode()
    }

    /// Decodes a bundle. The signature is not checked here; call
    /// [`KeyBundle::verify_signature`] (or let `initiate` do it).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        KeyBundleWire::decode(bytes)?.to_bundle()
    }
}
