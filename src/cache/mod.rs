use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Process-local key-value cache with optional per-entry expiry.
///
/// Stands in for browser-local storage: it is an accelerator only, scoped
/// to this process, last writer wins. Components receive it explicitly so
/// tests can inspect and clear it.
#[derive(Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a live value. Expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        let now = Utc::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn set_with_ttl(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        self.set_expiring_at(key, value, Utc::now() + ttl);
    }

    pub fn set_expiring_at(&self, key: &str, value: impl Into<String>, at: DateTime<Utc>) {
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.into(),
                expires_at: Some(at),
            },
        );
    }

    /// Set `key` with a TTL only if it holds no live value. Returns whether
    /// this call took it.
    pub fn claim(&self, key: &str, value: impl Into<String>, ttl: Duration) -> bool {
        let mut entries = self.lock();
        let now = Utc::now();
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return false;
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.into(),
                expires_at: Some(now + ttl),
            },
        );
        true
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
