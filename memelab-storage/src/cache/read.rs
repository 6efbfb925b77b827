//! Cache hits, carrying where they came from and when they expire.

use std::time::Duration;

use memelab_core::Timestamp;

/// Tier that served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Served from the in-process memory tier.
    Memory,
    /// Served from the persistent tier and promoted into memory.
    Persistent,
}

/// Result of a cache hit.
///
/// A miss is `None`; a `CacheRead` always holds a payload that was live at
/// the moment it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    expires_at: Timestamp,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    /// A hit served by the memory tier.
    pub fn from_memory(value: T, expires_at: Timestamp) -> Self {
        Self {
            value,
            expires_at,
            source: ReadSource::Memory,
        }
    }

    /// A hit served by the persistent tier.
    pub fn from_persistent(value: T, expires_at: Timestamp) -> Self {
        Self {
            value,
            expires_at,
            source: ReadSource::Persistent,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_memory_hit(&self) -> bool {
        self.source == ReadSource::Memory
    }

    pub fn was_promoted(&self) -> bool {
        self.source == ReadSource::Persistent
    }

    /// Time left before the entry expires, as seen from `now`.
    pub fn remaining_ttl(&self, now: Timestamp) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            expires_at: self.expires_at,
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
