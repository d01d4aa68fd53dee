//! Storage abstractions for one-time prekeys and skipped message keys.
//!
//! Prekey storage is trait-based so the bundle owner can back it with a
//! database; the skipped-key cache is plain owned state that travels with a
//! [`Session`](crate::Session) and is persisted with it.

use crate::crypto::SymmetricKey;
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Storage backend for one-time prekeys.
///
/// Implementations must be thread-safe (`Send + Sync`). Keys are consumed
/// atomically when retrieved so an index can never be used twice.
pub trait PreKeyStore: Send + Sync {
    /// Stores a one-time prekey with the given ID.
    ///
    /// If a prekey with the same ID already exists, it is replaced.
    fn store_one_time_prekey(&mut self, id: u32, key: SecretKey) -> Result<()>;

    /// Retrieves and removes a one-time prekey by ID.
    ///
    /// Returns `None` if no prekey exists with the given ID.
    fn consume_one_time_prekey(&mut self, id: u32) -> Result<Option<SecretKey>>;

    /// Lists all available one-time prekey IDs in ascending order.
    fn list_one_time_prekeys(&self) -> Result<Vec<u32>>;

    /// Returns the number of one-time prekeys currently stored.
    fn one_time_prekey_count(&self) -> Result<usize>;
}

/// Thread-safe in-memory prekey storage.
///
/// # Example
/// ```
/// # use x3dh_ratchet::storage::{InMemoryPreKeyStore, PreKeyStore};
/// # use x3dh_ratchet::keys::SecretKey;
/// # use rand_core::OsRng;
/// let mut store = InMemoryPreKeyStore::new();
/// store.store_one_time_prekey(0, SecretKey::generate(&mut OsRng)).unwrap();
/// assert!(store.consume_one_time_prekey(0).unwrap().is_some());
/// assert!(store.consume_one_time_prekey(0).unwrap().is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreKeyStore {
    one_time_prekeys: Arc<Mutex<HashMap<u32, SecretKey>>>,
}

impl InMemoryPreKeyStore {
    /// Creates a new empty prekey store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-inserts prekeys. Existing IDs are replaced.
    ///
    /// # Errors
    /// Returns error if the internal mutex is poisoned.
    pub fn populate(&mut self, keys: impl IntoIterator<Item = (u32, SecretKey)>) -> Result<()> {
        let mut store = self
            .one_time_prekeys
            .lock()
            .map_err(|_| Error::StorageError)?;

        store.extend(keys);
        Ok(())
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn store_one_time_prekey(&mut self, id: u32, key: SecretKey) -> Result<()> {
        let mut store = self
            .one_time_prekeys
            .lock()
            .map_err(|_| Error::StorageError)?;
        store.insert(id, key);
        Ok(())
    }

    fn consume_one_time_prekey(&mut self, id: u32) -> Result<Option<SecretKey>> {
        let mut store = self
            .one_time_prekeys
            .lock()
            .map_err(|_| Error::StorageError)?;
        Ok(store.remove(&id))
    }

    fn list_one_time_prekeys(&self) -> Result<Vec<u32>> {
        let store = self
            .one_time_prekeys
            .lock()
            .map_err(|_| Error::StorageError)?;
        let mut ids: Vec<u32> = store.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn one_time_prekey_count(&self) -> Result<usize> {
        let store = self
            .one_time_prekeys
            .lock()
            .map_err(|_| Error::StorageError)?;
        Ok(store.len())
    }
}

type SkippedKeyId = (PublicKey, u32);

/// Bounded cache of derived-but-unused receiving message keys.
///
/// Keys are indexed by `(remote ephemeral, message number)` so that chains
/// never collide. Once `capacity` entries are held, inserting evicts the
/// oldest entry first. Taking a key removes it, which is what makes a
/// replayed message fail.
#[derive(Clone, Default)]
pub struct SkippedKeyCache {
    keys: HashMap<SkippedKeyId, SymmetricKey>,
    order: VecDeque<SkippedKeyId>,
    capacity: usize,
}

impl SkippedKeyCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Caches a key, returning how many older keys were evicted to fit it.
    pub fn insert(&mut self, ephemeral: PublicKey, message_number: u32, key: SymmetricKey) -> usize {
        let id = (ephemeral, message_number);
        if self.keys.insert(id, key).is_some() {
            return 0;
        }
        self.order.push_back(id);

        let mut evicted = 0;
        while self.keys.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.keys.remove(&oldest);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::warn!(evicted, capacity = self.capacity, "evicted skipped message keys");
        }
        evicted
    }

    /// Removes and returns the key for `(ephemeral, message_number)`.
    pub fn take(&mut self, ephemeral: &PublicKey, message_number: u32) -> Option<SymmetricKey> {
        let id = (*ephemeral, message_number);
        let key = self.keys.remove(&id)?;
        self.order.retain(|entry| *entry != id);
        Some(key)
    }

    #[must_use]
    pub fn contains(&self, ephemeral: &PublicKey, message_number: u32) -> bool {
        self.keys.contains_key(&(*ephemeral, message_number))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, u32, &SymmetricKey)> + '_ {
        self.order.iter().filter_map(move |id| {
            self.keys
                .get(id)
                .map(|key| (&id.0, id.1, key))
        })
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.order.clear();
    }
}

impl std::fmt::Debug for SkippedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeyCache")
            .field("len", &self.keys.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
