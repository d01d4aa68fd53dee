//! Double Ratchet protocol for forward-secure encryption
//!
//! Implements the Signal protocol's Double Ratchet algorithm providing:
//! - Forward secrecy: Past messages secure even if current keys compromised
//! - Post-compromise security: Security restored after key compromise
//! - Out-of-order message delivery
//!
//! ## Algorithm Overview
//!
//! The Double Ratchet combines:
//! 1. **Symmetric-key ratchet**: Derives new keys for each message
//! 2. **DH ratchet**: Periodically refreshes shared secret via new DH exchanges
//!
//! ## State
//!
//! Each party maintains:
//! - Root key (RK): Updated on DH ratchet step
//! - Sending chain (`CK_s`) and receiving chain (`CK_r`), see [`ChainState`]
//! - Local ephemeral key pair and the peer's current ephemeral public key
//! - A bounded cache of skipped receiving keys
//!
//! ## Ratchet Steps
//!
//! Receiving a new remote ephemeral derives the receiving chain from
//! `DH(local, remote)` right away. The matching sending half (fresh local
//! ephemeral, new sending chain) runs on the next [`Session::encrypt`], so the
//! peer can still reach us on our current ephemeral until we actually send.
//! [`Session::rotate_ephemeral`] forces a sending half on demand.
//!
//! A session is a single unit of mutable state: calls must be serialized by
//! the caller, and the state should be persisted (see
//! [`crate::serialization`]) after every successful `encrypt`/`decrypt`.

use crate::chain::ChainState;
use crate::config::SessionConfig;
use crate::crypto::{self, generate_nonce, kdf_root, SymmetricKey, NONCE_SIZE};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use crate::storage::SkippedKeyCache;
use crate::x3dh::InitiatorResult;
use rand_core::CryptoRngCore;

/// Message header: the sender's ratchet key and chain position.
///
/// The encoded header is the AEAD associated data, so every field is
/// authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender's current ephemeral (ratchet) public key
    pub ephemeral: PublicKey,

    /// Position in the sender's current sending chain, starting at 0
    pub message_number: u32,

    /// Length of the sender's previous sending chain
    pub previous_message_number: u32,

    /// One-time prekey consumed by the handshake; only on the first message
    pub one_time_prekey_id: Option<u32>,
}

impl Header {
    /// Encoded size without / with a one-time prekey ID.
    pub const MIN_SIZE: usize = PublicKey::SIZE + 4 + 4 + 1;
    pub const MAX_SIZE: usize = Self::MIN_SIZE + 4;

    /// `ephemeral(32) || message_number(LE) || previous_message_number(LE) ||
    /// has_prekey(1) [|| prekey_id(LE)]`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::MAX_SIZE);
        bytes.extend_from_slice(self.ephemeral.as_bytes());
        bytes.extend_from_slice(&self.message_number.to_le_bytes());
        bytes.extend_from_slice(&self.previous_message_number.to_le_bytes());
        match self.one_time_prekey_id {
            Some(id) => {
                bytes.push(1);
                bytes.extend_from_slice(&id.to_le_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// Decodes a header from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(Error::InvalidMessageFormat);
        }

        let ephemeral = PublicKey::from_bytes(read_array(bytes, 0)?);
        let message_number = u32::from_le_bytes(read_array(bytes, 32)?);
        let previous_message_number = u32::from_le_bytes(read_array(bytes, 36)?);

        let (one_time_prekey_id, len) = match bytes[40] {
            0 => (None, Self::MIN_SIZE),
            1 => (
                Some(u32::from_le_bytes(read_array(bytes, Self::MIN_SIZE)?)),
                Self::MAX_SIZE,
            ),
            _ => return Err(Error::InvalidMessageFormat),
        };

        Ok((
            Self {
                ephemeral,
                message_number,
                previous_message_number,
                one_time_prekey_id,
            },
            len,
        ))
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Error::InvalidMessageFormat)
}

/// Encrypted message: header, nonce, and ciphertext with the tag appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Double Ratchet session state.
#[derive(Clone)]
pub struct Session {
    pub(crate) root_key: SymmetricKey,
    pub(crate) sending: ChainState,
    pub(crate) receiving: ChainState,
    pub(crate) previous_sending_length: u32,
    pub(crate) local_ephemeral: Option<SecretKey>,
    pub(crate) remote_ephemeral: Option<PublicKey>,
    /// Set by a receiving ratchet step: the next sending chain needs a fresh
    /// local ephemeral.
    pub(crate) sending_ratchet_pending: bool,
    pub(crate) skipped: SkippedKeyCache,
    pub(crate) pending_prekey_id: Option<u32>,
    pub(crate) config: SessionConfig,
}

impl Session {
    /// A session with only a root key. The first remote ephemeral has to be
    /// supplied through [`Session::perform_dh_ratchet`] before sending.
    #[must_use]
    pub fn new(root_key: SymmetricKey, config: SessionConfig) -> Self {
        Self {
            root_key,
            sending: ChainState::Uninitialized,
            receiving: ChainState::Uninitialized,
            previous_sending_length: 0,
            local_ephemeral: None,
            remote_ephemeral: None,
            sending_ratchet_pending: false,
            skipped: SkippedKeyCache::new(config.max_cached_keys),
            pending_prekey_id: None,
            config,
        }
    }

    /// Initialize as initiator (after [`crate::x3dh::initiate`]).
    ///
    /// The handshake ephemeral becomes the first ratchet key and the peer's
    /// signed prekey the first remote ratchet key, so the first message
    /// carries everything the responder needs.
    #[must_use]
    pub fn initiator(handshake: InitiatorResult, config: SessionConfig) -> Self {
        let InitiatorResult {
            root_key,
            ephemeral,
            used_prekey_id,
            remote_signed_prekey,
        } = handshake;

        Self {
            local_ephemeral: Some(ephemeral),
            remote_ephemeral: Some(remote_signed_prekey),
            pending_prekey_id: used_prekey_id,
            ..Self::new(root_key, config)
        }
    }

    /// Initialize as responder (after [`crate::x3dh::respond`]).
    ///
    /// The signed prekey acts as the local ratchet key until the first
    /// ratchet step replaces it.
    #[must_use]
    pub fn responder(root_key: SymmetricKey, signed_prekey: SecretKey, config: SessionConfig) -> Self {
        Self {
            local_ephemeral: Some(signed_prekey),
            ..Self::new(root_key, config)
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current local ratchet public key, if one exists.
    #[must_use]
    pub fn local_ephemeral(&self) -> Option<PublicKey> {
        self.local_ephemeral.as_ref().map(SecretKey::public_key)
    }

    #[must_use]
    pub fn remote_ephemeral(&self) -> Option<PublicKey> {
        self.remote_ephemeral
    }

    /// Number of the next message this session will send.
    #[must_use]
    pub fn send_message_number(&self) -> u32 {
        self.sending.counter()
    }

    /// Number of the next message expected on the receiving chain.
    #[must_use]
    pub fn recv_message_number(&self) -> u32 {
        self.receiving.counter()
    }

    #[must_use]
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    #[must_use]
    pub fn pending_prekey_id(&self) -> Option<u32> {
        self.pending_prekey_id
    }

    /// Encrypt a message
    ///
    /// # Errors
    /// `Error::MissingSendChainKey` if no sending chain exists and no remote
    /// ephemeral is known to derive one from. `Error::ChainExhausted` once the
    /// sending chain has used every message number.
    pub fn encrypt<R: CryptoRngCore>(&mut self, rng: &mut R, plaintext: &[u8]) -> Result<Message> {
        if !self.sending.is_established() {
            self.bootstrap_sending(rng)?;
        }

        let ephemeral = self
            .local_ephemeral
            .as_ref()
            .ok_or(Error::MissingSendChainKey)?
            .public_key();
        let (message_number, message_key) = self
            .sending
            .established_mut()
            .ok_or(Error::MissingSendChainKey)?
            .advance()?;

        let header = Header {
            ephemeral,
            message_number,
            previous_message_number: self.previous_sending_length,
            one_time_prekey_id: self.pending_prekey_id.take(),
        };

        let nonce = generate_nonce(rng);
        let ciphertext = crypto::encrypt(&message_key, &nonce, plaintext, &header.to_bytes())?;

        tracing::trace!(message_number, "encrypted message");

        Ok(Message {
            header,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt a message
    ///
    /// All state changes (ratchet steps, skipped keys, counters) are applied
    /// only if the message authenticates; on any error the session is left
    /// exactly as it was.
    ///
    /// # Errors
    /// - `Error::DecryptionFailed` / `Error::InvalidCiphertext` if the message
    ///   does not authenticate
    /// - `Error::DuplicateMessage` if the message key was already used
    /// - `Error::TooManySkippedMessages` if more than `max_skip` keys would
    ///   have to be skipped, counting both chains of a ratchet step
    /// - `Error::MissingRecvChainKey` if no receiving chain can be derived
    pub fn decrypt(&mut self, message: &Message) -> Result<Vec<u8>> {
        let mut staged = self.clone();
        let plaintext = staged.decrypt_staged(message)?;
        *self = staged;
        Ok(plaintext)
    }

    fn decrypt_staged(&mut self, message: &Message) -> Result<Vec<u8>> {
        let header = &message.header;
        let associated_data = header.to_bytes();

        // Peer is sending on the ephemeral we already know, but we never
        // derived its chain.
        if !self.receiving.is_established() && self.remote_ephemeral == Some(header.ephemeral) {
            self.bootstrap_receiving()?;
        }

        if let Some(message_key) = self.skipped.take(&header.ephemeral, header.message_number) {
            tracing::trace!(
                message_number = header.message_number,
                "decrypting with skipped message key"
            );
            return crypto::decrypt(
                &message_key,
                &message.nonce,
                &message.ciphertext,
                &associated_data,
            );
        }

        let ratchets = self.remote_ephemeral != Some(header.ephemeral);
        self.check_skip_budget(header, ratchets)?;

        if ratchets {
            self.skip_receiving_keys(header.previous_message_number)?;
            self.perform_dh_ratchet(header.ephemeral)?;
        }

        self.skip_receiving_keys(header.message_number)?;

        let chain = self
            .receiving
            .established_mut()
            .ok_or(Error::MissingRecvChainKey)?;
        if header.message_number < chain.counter() {
            tracing::debug!(
                message_number = header.message_number,
                expected = chain.counter(),
                "rejecting already consumed message key"
            );
            return Err(Error::DuplicateMessage);
        }

        let (message_number, message_key) = chain.advance()?;
        tracing::trace!(message_number, "decrypting message");

        crypto::decrypt(
            &message_key,
            &message.nonce,
            &message.ciphertext,
            &associated_data,
        )
    }

    /// DH ratchet step towards a new remote ephemeral key.
    ///
    /// Derives the receiving chain from `DH(local, remote)` and schedules a
    /// fresh sending chain for the next `encrypt`. Without a local ephemeral
    /// the root key cannot move yet: the remote key is recorded and the
    /// sending chain is derived from it once one exists.
    pub fn perform_dh_ratchet(&mut self, remote: PublicKey) -> Result<()> {
        let Some(local) = self.local_ephemeral.as_ref() else {
            tracing::debug!(remote = ?remote, "no local ephemeral yet, deferring DH ratchet");
            self.remote_ephemeral = Some(remote);
            return Ok(());
        };

        let dh_output = local.diffie_hellman(&remote);
        let (root_key, receiving_key) = kdf_root(&self.root_key, &dh_output)?;

        self.root_key = root_key;
        self.receiving.bootstrap(receiving_key);
        self.remote_ephemeral = Some(remote);

        if self.sending.is_established() {
            self.previous_sending_length = self.sending.counter();
        }
        self.sending.reset();
        self.sending_ratchet_pending = true;

        tracing::debug!(
            remote = ?remote,
            previous_sending_length = self.previous_sending_length,
            "performed DH ratchet"
        );
        Ok(())
    }

    /// Forces a new local ephemeral and sending chain.
    ///
    /// The next message goes out under the new key; the peer ratchets when it
    /// sees it. Messages already sent stay decryptable through the peer's
    /// skipped-key cache once the peer has seen the current sending chain.
    /// Rotating while the peer has replies of its own in flight desynchronizes
    /// the root chain, and an initiator must send its first message (which
    /// carries the handshake ephemeral) before rotating.
    ///
    /// # Errors
    /// `Error::RemoteEphemeralNotAvailable` if no remote ephemeral is known.
    pub fn rotate_ephemeral<R: CryptoRngCore>(&mut self, rng: &mut R) -> Result<()> {
        let remote = self
            .remote_ephemeral
            .ok_or(Error::RemoteEphemeralNotAvailable)?;

        if self.sending.is_established() {
            self.previous_sending_length = self.sending.counter();
        }
        self.local_ephemeral = Some(SecretKey::generate(rng));
        self.sending_ratchet_pending = false;
        self.derive_sending_chain(&remote)?;

        tracing::debug!(
            previous_sending_length = self.previous_sending_length,
            "rotated local ephemeral"
        );
        Ok(())
    }

    fn bootstrap_sending<R: CryptoRngCore>(&mut self, rng: &mut R) -> Result<()> {
        let remote = self.remote_ephemeral.ok_or(Error::MissingSendChainKey)?;

        if self.local_ephemeral.is_none() || self.sending_ratchet_pending {
            self.local_ephemeral = Some(SecretKey::generate(rng));
            self.sending_ratchet_pending = false;
        }

        self.derive_sending_chain(&remote)?;
        tracing::debug!("bootstrapped sending chain");
        Ok(())
    }

    fn derive_sending_chain(&mut self, remote: &PublicKey) -> Result<()> {
        let local = self
            .local_ephemeral
            .as_ref()
            .ok_or(Error::MissingSendChainKey)?;
        let dh_output = local.diffie_hellman(remote);
        let (root_key, sending_key) = kdf_root(&self.root_key, &dh_output)?;

        self.root_key = root_key;
        self.sending.bootstrap(sending_key);
        Ok(())
    }

    fn bootstrap_receiving(&mut self) -> Result<()> {
        let (Some(local), Some(remote)) = (self.local_ephemeral.as_ref(), self.remote_ephemeral)
        else {
            return Err(Error::MissingRecvChainKey);
        };

        let dh_output = local.diffie_hellman(&remote);
        let (root_key, receiving_key) = kdf_root(&self.root_key, &dh_output)?;

        self.root_key = root_key;
        self.receiving.bootstrap(receiving_key);
        tracing::debug!("bootstrapped receiving chain");
        Ok(())
    }

    /// Rejects a header whose gaps add up to more than `max_skip` keys.
    ///
    /// A header on a new ephemeral skips the rest of the current receiving
    /// chain up to `previous_message_number` plus `message_number` keys on the
    /// chain the ratchet step derives. Both count against one budget, checked
    /// before any key is derived.
    fn check_skip_budget(&self, header: &Header, ratchets: bool) -> Result<()> {
        let (current_until, next_chain) = if ratchets {
            (header.previous_message_number, header.message_number)
        } else {
            (header.message_number, 0)
        };
        let current_chain = self
            .receiving
            .established()
            .map_or(0, |chain| current_until.saturating_sub(chain.counter()));

        let to_skip = u64::from(current_chain) + u64::from(next_chain);
        if to_skip > u64::from(self.config.max_skip) {
            tracing::warn!(
                to_skip,
                max_skip = self.config.max_skip,
                "refusing to skip message keys"
            );
            return Err(Error::TooManySkippedMessages);
        }
        Ok(())
    }

    /// Caches receiving keys up to `until` on the current receiving chain.
    fn skip_receiving_keys(&mut self, until: u32) -> Result<()> {
        let (Some(chain), Some(remote)) =
            (self.receiving.established_mut(), self.remote_ephemeral)
        else {
            return Ok(());
        };

        let to_skip = until.saturating_sub(chain.counter());
        if to_skip == 0 {
            return Ok(());
        }

        for (message_number, message_key) in chain.skip_to(until)? {
            self.skipped.insert(remote, message_number, message_key);
        }
        tracing::trace!(to_skip, cached = self.skipped.len(), "cached skipped message keys");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("send_message_number", &self.sending.counter())
            .field("recv_message_number", &self.receiving.counter())
            .field("previous_sending_length", &self.previous_sending_length)
            .field("remote_ephemeral", &self.remote_ephemeral)
            .field("skipped_keys", &self.skipped.len())
            .finish_non_exhaustive()
    }
}
