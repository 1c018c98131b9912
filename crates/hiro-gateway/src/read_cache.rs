//! Per-user read-through cache for idempotent responses.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use hiro_types::ExecuteResponse;

/// Hard cap on resident entries; inserts past it evict by earliest expiry.
const MAX_ENTRIES: usize = 1_000;

struct CacheEntry {
    expires_at_ms: u64,
    snapshot: ExecuteResponse,
}

/// TTL-bounded response cache keyed by `user:operation:url`.
///
/// Keys embed the caller id, so one user's cached bodies are never served to
/// another. Entries expire on lookup and are swept on every insert.
pub struct ReadCache {
    ttl_ms: u64,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ReadCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Deep copy of a live entry; expired entries are removed on access.
    pub fn lookup(&self, key: &str) -> Option<ExecuteResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms() => Some(entry.snapshot.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a deep copy, sweeping expired entries first and evicting the
    /// earliest-expiring entries past the size cap.
    pub fn store(&self, key: String, response: &ExecuteResponse) {
        let now = now_ms();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at_ms > now);
        entries.insert(
            key,
            CacheEntry {
                expires_at_ms: now + self.ttl_ms,
                snapshot: response.clone(),
            },
        );
        if entries.len() > MAX_ENTRIES {
            let mut by_expiry: Vec<(String, u64)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.expires_at_ms))
                .collect();
            by_expiry.sort_by_key(|(_, expires)| *expires);
            let excess = entries.len() - MAX_ENTRIES;
            for (key, _) in by_expiry.into_iter().take(excess) {
                entries.remove(&key);
            }
            debug!(evicted = excess, "read cache over capacity");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, age_ms: u64) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expires_at_ms = now_ms().saturating_sub(age_ms);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_expires_in(&self, key: &str, ttl_ms: u64) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expires_at_ms = now_ms() + ttl_ms;
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiro_types::RequestEcho;
    use serde_json::json;

    fn response(marker: &str) -> ExecuteResponse {
        ExecuteResponse {
            request: RequestEcho {
                method: "GET".into(),
                url: format!("https://api.heroku.com/{marker}"),
                operation_id: "GET /apps".into(),
            },
            status: 200,
            headers: Default::default(),
            body: json!({"marker": marker}),
            request_id: None,
            warnings: None,
        }
    }

    #[test]
    fn hit_returns_a_deep_copy() {
        let cache = ReadCache::new(60_000);
        cache.store("u1:GET /apps:url".into(), &response("a"));
        let mut hit = cache.lookup("u1:GET /apps:url").unwrap();
        hit.body = json!({"mutated": true});
        // The stored snapshot is unaffected by mutation of the copy.
        assert_eq!(cache.lookup("u1:GET /apps:url").unwrap().body, json!({"marker": "a"}));
    }

    #[test]
    fn keys_are_scoped_per_user() {
        let cache = ReadCache::new(60_000);
        cache.store("u1:GET /apps:url".into(), &response("a"));
        assert!(cache.lookup("u2:GET /apps:url").is_none());
    }

    #[test]
    fn expired_entries_are_removed_on_access() {
        let cache = ReadCache::new(60_000);
        cache.store("k".into(), &response("a"));
        cache.backdate("k", 1);
        assert!(cache.lookup("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn inserts_sweep_expired_entries() {
        let cache = ReadCache::new(60_000);
        cache.store("old".into(), &response("a"));
        cache.backdate("old", 1);
        cache.store("new".into(), &response("b"));
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("new").is_some());
    }

    #[test]
    fn over_capacity_evicts_earliest_expiry_first() {
        let cache = ReadCache::new(3_600_000);
        for i in 0..MAX_ENTRIES {
            cache.store(format!("k{i}"), &response("x"));
        }
        cache.set_expires_in("k0", 1_000);
        cache.store("overflow".into(), &response("y"));
        assert_eq!(cache.len(), MAX_ENTRIES);
        assert!(cache.lookup("k0").is_none());
        assert!(cache.lookup("overflow").is_some());
        assert!(cache.lookup("k1").is_some());
    }
}
