//! Tunables for sessions and the identity vault.

/// Limits applied by a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Most message keys a single decrypt may skip over, counting both the
    /// old and the new receiving chain of a ratchet step. A header that would
    /// skip more is rejected with `Error::TooManySkippedMessages`.
    pub max_skip: u32,

    /// Capacity of the skipped-key cache. When full, the oldest cached key is
    /// evicted to make room.
    pub max_cached_keys: usize,
}

impl SessionConfig {
    pub const DEFAULT_MAX_SKIP: u32 = 1000;
    pub const DEFAULT_MAX_CACHED_KEYS: usize = 2000;

    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    #[must_use]
    pub fn with_max_cached_keys(mut self, max_cached_keys: usize) -> Self {
        self.max_cached_keys = max_cached_keys;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skip: Self::DEFAULT_MAX_SKIP,
            max_cached_keys: Self::DEFAULT_MAX_CACHED_KEYS,
        }
    }
}

/// Settings for a [`SoftwareVault`](crate::vault::SoftwareVault).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultConfig {
    /// One-time prekeys generated per `create_user_keys` call.
    pub prekey_batch_size: u32,
}

impl VaultConfig {
    pub const DEFAULT_PREKEY_BATCH_SIZE: u32 = 10;
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            prekey_batch_size: Self::DEFAULT_PREKEY_BATCH_SIZE,
        }
    }
}
