//! Time-bounded cache of resolved access

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::Access;

/// Default time an access result stays valid
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    identity: String,
    credential: Vec<u8>,
}

#[derive(Debug, Clone)]
struct CachedAccess {
    access: Access,
    expires_at: Instant,
}

/// Access cache keyed by identity and credential
///
/// The credential is part of the key so that a rotated key for the same
/// identity never reuses an old grant. An expired entry is dropped when it is
/// read, and at most once per TTL a write sweeps out every expired entry, so
/// a stream of distinct wrong credentials cannot grow the cache without bound.
#[derive(Debug)]
pub struct AuthCache {
    entries: DashMap<CacheKey, CachedAccess>,
    ttl: Duration,
    next_purge: Mutex<Instant>,
}

impl AuthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            next_purge: Mutex::new(Instant::now() + ttl),
        }
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a cached access if present and not expired
    pub fn get(&self, identity: &str, credential: &[u8]) -> Option<Access> {
        let key = CacheKey {
            identity: identity.to_string(),
            credential: credential.to_vec(),
        };
        let now = Instant::now();
        match self.entries.get(&key) {
            Some(entry) if entry.expires_at > now => return Some(entry.access.clone()),
            Some(_) => {}
            None => return None,
        }

        self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Store an access, valid for the configured TTL from now
    pub fn set(&self, identity: &str, credential: &[u8], access: Access) {
        let now = Instant::now();
        self.entries.insert(
            CacheKey {
                identity: identity.to_string(),
                credential: credential.to_vec(),
            },
            CachedAccess {
                access,
                expires_at: now + self.ttl,
            },
        );
        self.maybe_purge(now);
    }

    fn maybe_purge(&self, now: Instant) {
        // Another writer is already sweeping
        let Some(mut next_purge) = self.next_purge.try_lock() else {
            return;
        };
        if now < *next_purge {
            return;
        }
        *next_purge = now + self.ttl;
        drop(next_purge);
        self.purge_expired();
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
