//! In-process TTL cache for derived scheduler state.
//!
//! Payloads are stored serialized so cached values are snapshots. Expiry is
//! checked against the caller-supplied `now` (the engine clock), with a
//! small random jitter on each TTL to spread refreshes.

pub mod keys;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

const TTL_JITTER_RATIO: f64 = 0.1;

struct Entry {
    payload: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh value for `key`, or `None` if missing, expired or undecodable.
    pub fn get<T>(&self, key: &str, now: DateTime<Utc>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expires_at.is_some_and(|at| now >= at) {
            return None;
        }
        serde_json::from_str(&entry.payload).ok()
    }

    /// Store `value`; a zero `ttl` never expires.
    pub fn set<T>(&self, key: &str, value: &T, ttl: Duration, now: DateTime<Utc>)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, key, "failed to serialize cache entry");
                return;
            }
        };
        let expires_at = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(apply_ttl_jitter(ttl))
                .ok()
                .and_then(|d| now.checked_add_signed(d))
        };
        self.entries
            .write()
            .insert(key.to_string(), Entry { payload, expires_at });
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove every key starting with `prefix`.
    pub fn delete_prefix(&self, prefix: &str) {
        self.entries.write().retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop expired entries.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| now < at));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Never lengthens the TTL, so a cached value is not served past its stated
/// lifetime.
fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}
