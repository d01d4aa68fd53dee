//! X3DH key agreement and Double Ratchet sessions for end-to-end encrypted
//! messaging, with the long-term identity key kept behind a capability.
//!
//! The crate implements the X3DH handshake and the Double Ratchet algorithm as
//! described by Signal. It provides forward secrecy, post-compromise security
//! and asynchronous session setup from published key bundles.
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Past messages remain confidential even if long-term identity keys are later
//! compromised. Each message key is derived once, used once, and dropped.
//!
//! ## Post-Compromise Security
//! If an attacker compromises session state, security is restored after an
//! honest round trip via DH ratcheting.
//!
//! ## Replay and Tamper Rejection
//! A message key is consumed when its message decrypts, so a replayed message
//! is rejected. The header is authenticated as AEAD associated data. A message
//! that fails to decrypt leaves the session untouched.
//!
//! ## Identity Key Isolation
//! The identity private key lives in an [`IdentityVault`]. The protocol only
//! asks it for the public key, signatures, and one DH operation.
//!
//! # Threat Model
//!
//! **Assumed adversary capabilities:**
//! - Active network attacker (inject, modify, reorder, replay, drop messages)
//! - Compromise of session state at some point in time
//!
//! **Security assumptions:**
//! - X25519 ECDH and Ed25519 provide computational security
//! - HKDF-SHA256 is a secure key derivation function
//! - ChaCha20-Poly1305 is a secure AEAD cipher
//! - Random number generator is cryptographically secure
//!
//! # Protocol Flow
//!
//! ```rust
//! use x3dh_ratchet::vault::{IdentityVault, SoftwareVault};
//! use x3dh_ratchet::{x3dh, Session, SessionConfig};
//! use rand_core::OsRng;
//!
//! // Bob publishes a bundle
//! let bob_vault = SoftwareVault::in_memory();
//! let bob_keys = bob_vault.create_user_keys().unwrap();
//! let bundle = bob_keys.public_bundle();
//! let (bob_signed_prekey, mut bob_prekeys) = bob_keys.into_prekey_store().unwrap();
//!
//! // Alice runs X3DH against it and sends the first message
//! let alice_vault = SoftwareVault::in_memory();
//! let handshake = x3dh::initiate(&mut OsRng, &alice_vault, &bundle, None).unwrap();
//! let mut alice = Session::initiator(handshake, SessionConfig::default());
//! let first = alice.encrypt(&mut OsRng, b"Hello Bob!").unwrap();
//!
//! // Bob completes X3DH from the first header and Alice's identity key
//! let root_key = x3dh::respond_from_store(
//!     &bob_vault,
//!     &mut bob_prekeys,
//!     &alice_vault.fetch_or_create_identity_key().unwrap(),
//!     &first.header.ephemeral,
//!     &bob_signed_prekey,
//!     first.header.one_time_prekey_id,
//! )
//! .unwrap();
//! let mut bob = Session::responder(root_key, bob_signed_prekey, SessionConfig::default());
//!
//! assert_eq!(bob.decrypt(&first).unwrap(), b"Hello Bob!");
//!
//! let reply = bob.encrypt(&mut OsRng, b"Hello Alice!").unwrap();
//! assert_eq!(alice.decrypt(&reply).unwrap(), b"Hello Alice!");
//! ```
//!
//! Persist each session with [`Session::to_bytes`] after every successful
//! `encrypt`/`decrypt`, and restore it with [`Session::from_bytes`].
//!
//! # Modules
//!
//! - [`x3dh`]: Extended Triple Diffie-Hellman key agreement protocol
//! - [`double_ratchet`]: Double Ratchet sessions
//! - [`chain`]: Per-direction symmetric chain state
//! - [`vault`]: Identity key capability and its software implementation
//! - [`kdf`]: HKDF-SHA256
//! - [`crypto`]: Protocol KDFs and AEAD encryption
//! - [`keys`]: Key types with automatic zeroization
//! - [`storage`]: One-time prekey storage and the skipped-key cache
//! - [`serialization`]: Versioned wire and persistence formats
//! - [`config`]: Session and vault settings
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug
)]

pub mod chain;
pub mod config;
pub mod crypto;
pub mod double_ratchet;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod serialization;
pub mod storage;
pub mod vault;
pub mod x3dh;

// Re-export main types
pub use config::{SessionConfig, VaultConfig};
pub use double_ratchet::{Header, Message, Session};
pub use error::{Error, Result};
pub use keys::{IdentityKey, PublicKey, SecretKey, Signature};
pub use vault::{IdentityVault, SoftwareVault};
pub use x3dh::{InitiatorResult, KeyBundle, UserKeys};
