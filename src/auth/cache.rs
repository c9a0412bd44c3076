use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::AuthUser;

/// Upper bound on cached identities before expired entries are purged.
const MAX_ENTRIES: usize = 10_000;

/// Short-lived cache of remotely validated tokens.
///
/// Keyed by the SHA-256 of the token so raw bearer tokens never sit in memory
/// longer than the request that carried them.
pub struct TokenCache {
    entries: DashMap<String, (AuthUser, Instant)>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, token: &str) -> Option<AuthUser> {
        let key = cache_key(token);
        let hit = self.entries.get(&key).and_then(|entry| {
            let (user, inserted) = entry.value();
            (inserted.elapsed() < self.ttl).then(|| user.clone())
        });
        if hit.is_none() {
            self.entries.remove(&key);
        }
        hit
    }

    pub fn insert(&self, token: &str, user: AuthUser) {
        if self.ttl.is_zero() {
            return;
        }
        if self.entries.len() >= MAX_ENTRIES {
            let ttl = self.ttl;
            self.entries.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        }
        self.entries.insert(cache_key(token), (user, Instant::now()));
    }

    pub fn remove(&self, token: &str) {
        self.entries.remove(&cache_key(token));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cache_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
