//! Symmetric-key chain for one direction of a session.
//!
//! A chain is either not yet derived or established with a key and the number
//! of the next message it will produce. The transitions are:
//!
//! - `bootstrap`: install a fresh chain key from a root KDF step, counter 0
//! - `advance`: derive the message key for the current counter and step the chain
//! - `skip_to`: derive and hand back every key up to (not including) a target

use crate::crypto::{kdf_chain, SymmetricKey};
use crate::error::{Error, Result};

/// An established chain: the current chain key and the next message number.
#[derive(Clone)]
pub struct Chain {
    key: SymmetricKey,
    counter: u32,
}

impl Chain {
    #[must_use]
    pub fn new(key: SymmetricKey, counter: u32) -> Self {
        Self { key, counter }
    }

    #[must_use]
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Number of the next message on this chain.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Derives the key for message `counter` and moves the chain forward.
    ///
    /// Returns the message number together with its key.
    ///
    /// # Errors
    /// `Error::ChainExhausted` if the counter space is used up.
    pub fn advance(&mut self) -> Result<(u32, SymmetricKey)> {
        let number = self.counter;
        let next_counter = number.checked_add(1).ok_or(Error::ChainExhausted)?;

        let (message_key, next_key) = kdf_chain(&self.key)?;
        self.key = next_key;
        self.counter = next_counter;

        Ok((number, message_key))
    }

    /// Advances until `counter == target`, returning the skipped keys in order.
    ///
    /// Does nothing if the chain is already at or past `target`. Callers are
    /// responsible for bounding the distance.
    pub(crate) fn skip_to(&mut self, target: u32) -> Result<Vec<(u32, SymmetricKey)>> {
        let mut skipped = Vec::new();
        while self.counter < target {
            skipped.push(self.advance()?);
        }
        Ok(skipped)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Per-direction chain state.
#[derive(Clone, Debug, Default)]
pub enum ChainState {
    #[default]
    Uninitialized,
    Established(Chain),
}

impl ChainState {
    /// Replaces whatever chain was here with a new one starting at 0.
    pub fn bootstrap(&mut self, key: SymmetricKey) {
        *self = Self::Established(Chain::new(key, 0));
    }

    /// Drops the chain so the next use must derive a new one.
    pub fn reset(&mut self) {
        *self = Self::Uninitialized;
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established(_))
    }

    #[must_use]
    pub fn established(&self) -> Option<&Chain> {
        match self {
            Self::Established(chain) => Some(chain),
            Self::Uninitialized => None,
        }
    }

    pub fn established_mut(&mut self) -> Option<&mut Chain> {
        match self {
            Self::Established(chain) => Some(chain),
            Self::Uninitialized => None,
        }
    }

    /// Next message number, or 0 when no chain exists.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.established().map_or(0, Chain::counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_key() -> SymmetricKey {
        SymmetricKey::from_bytes([5u8; 32])
    }

    #[test]
    fn test_bootstrap_starts_at_zero() {
        let mut state = ChainState::default();
        assert!(!state.is_established());
        assert_eq!(state.counter(), 0);

        state.bootstrap(chain_key());
        assert!(state.is_established());
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn test_advance_matches_kdf_chain() {
        let mut chain = Chain::new(chain_key(), 0);
        let (expected_mk, expected_next) = kdf_chain(&chain_key()).unwrap();

        let (number, message_key) = chain.advance().unwrap();

        assert_eq!(number, 0);
        assert_eq!(message_key, expected_mk);
        assert_eq!(chain.key(), &expected_next);
        assert_eq!(chain.counter(), 1);
    }

    #[test]
    fn test_skip_to_yields_same_keys_as_advancing() {
        let mut skipping = Chain::new(chain_key(), 0);
        let mut stepping = Chain::new(chain_key(), 0);

        let skipped = skipping.skip_to(3).unwrap();
        assert_eq!(skipped.len(), 3);

        for (number, key) in skipped {
            let (expected_number, expected_key) = stepping.advance().unwrap();
            assert_eq!(number, expected_number);
            assert_eq!(key, expected_key);
        }
        assert_eq!(skipping.counter(), 3);
        assert_eq!(skipping.key(), stepping.key());
    }

    #[test]
    fn test_skip_to_behind_is_noop() {
        let mut chain = Chain::new(chain_key(), 5);
        assert!(chain.skip_to(2).unwrap().is_empty());
        assert_eq!(chain.counter(), 5);
    }

    #[test]
    fn test_exhausted_counter() {
        let mut chain = Chain::new(chain_key(), u32::MAX);
        assert_eq!(chain.advance().unwrap_err(), Error::ChainExhausted);
        assert_eq!(chain.counter(), u32::MAX);
    }

    #[test]
    fn test_skip_to_end_of_counter_space() {
        let mut chain = Chain::new(chain_key(), u32::MAX - 2);

        let skipped = chain.skip_to(u32::MAX).unwrap();
        let numbers: Vec<u32> = skipped.iter().map(|(number, _)| *number).collect();
        assert_eq!(numbers, [u32::MAX - 2, u32::MAX - 1]);
        assert_eq!(chain.counter(), u32::MAX);

        assert!(chain.skip_to(u32::MAX).unwrap().is_empty());
        assert_eq!(chain.advance().unwrap_err(), Error::ChainExhausted);
    }

    #[test]
    fn test_reset() {
        let mut state = ChainState::default();
        state.bootstrap(chain_key());
        state.reset();
        assert!(state.established_mut().is_none());
    }
}
