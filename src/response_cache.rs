//! TTL response cache for the upstream proxy
//!
//! Entries are keyed by endpoint name plus query parameters sorted by name, so
//! the same logical request hits the same entry regardless of the order its
//! parameters were supplied in.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Default time-to-live for cached responses
pub const DEFAULT_TTL_MS: i64 = 20_000;

/// Entry count above which a `put` triggers a sweep of expired entries
pub const SWEEP_THRESHOLD: usize = 100;

/// A cached payload and its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// An entry is usable only strictly before its expiry
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Builds the canonical cache key `endpoint?a=1&b=2` with parameters sorted
/// by name (then value, for repeated names). `%`, `&` and `=` inside names and
/// values are percent-encoded so distinct parameter sets never share a key.
pub fn cache_key<I, K, V>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    pairs.sort();

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", endpoint, query)
}

fn escape_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Time-to-live keyed cache shared by all proxy requests
pub struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ResponseCache<T> {
    /// Creates a cache with the default TTL on the system clock
    pub fn new() -> Self {
        Self::with_clock(Duration::milliseconds(DEFAULT_TTL_MS), Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit TTL and clock
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        ResponseCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a fresh entry, dropping it if it has expired
    pub fn get<I, K, V>(&self, endpoint: &str, params: I) -> Option<T>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = cache_key(endpoint, params);
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(&key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.payload.clone()),
            Some(_) => {
                log::debug!("Evicting stale cache entry {}", key);
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Stores `value` until `now + ttl`, replacing any previous entry
    pub fn put<I, K, V>(&self, endpoint: &str, params: I, value: T)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = cache_key(endpoint, params);
        let now = self.clock.now();
        let len = {
            let mut entries = self.entries.lock();
            entries.insert(
                key,
                CacheEntry {
                    payload: value,
                    created_at: now,
                    expires_at: now + self.ttl,
                },
            );
            entries.len()
        };

        if len > SWEEP_THRESHOLD {
            self.sweep();
        }
    }

    /// Removes every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Number of physically stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T: Clone> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn manual_cache() -> (ResponseCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 8, 17, 0, 0).unwrap(),
        ));
        let cache =
            ResponseCache::with_clock(Duration::milliseconds(DEFAULT_TTL_MS), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_cache_key_ignores_parameter_order() {
        let a = cache_key("scoreboard", [("a", "1"), ("b", "2")]);
        let b = cache_key("scoreboard", [("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
        assert_eq!(a, "scoreboard?a=1&b=2");
    }

    #[test]
    fn test_cache_key_escapes_separators() {
        let smuggled = cache_key("scoreboard", [("a", "1&b=2")]);
        let split = cache_key("scoreboard", [("a", "1"), ("b", "2")]);
        assert_ne!(smuggled, split);
        assert_eq!(smuggled, "scoreboard?a=1%26b%3D2");
        assert_ne!(
            cache_key("scoreboard", [("a=1", "")]),
            cache_key("scoreboard", [("a", "1=")])
        );
        assert_eq!(cache_key("scoreboard", [("q", "100%")]), "scoreboard?q=100%25");
    }

    #[test]
    fn test_cache_key_without_params() {
        let empty: [(&str, &str); 0] = [];
        assert_eq!(cache_key("league", empty), "league?");
    }

    #[test]
    fn test_cache_key_distinguishes_endpoints() {
        assert_ne!(
            cache_key("scoreboard", [("week", "1")]),
            cache_key("standings", [("week", "1")])
        );
    }

    #[test]
    fn test_hit_regardless_of_insertion_order() {
        let (cache, _clock) = manual_cache();
        cache.put("scoreboard", [("a", "1"), ("b", "2")], "body".to_string());

        assert_eq!(
            cache.get("scoreboard", [("b", "2"), ("a", "1")]),
            Some("body".to_string())
        );
    }

    #[test]
    fn test_ttl_boundaries() {
        let (cache, clock) = manual_cache();
        cache.put("scoreboard", [("week", "3")], "body".to_string());

        clock.advance(Duration::milliseconds(DEFAULT_TTL_MS - 1));
        assert!(cache.get("scoreboard", [("week", "3")]).is_some());

        clock.advance(Duration::milliseconds(2));
        assert!(cache.get("scoreboard", [("week", "3")]).is_none());
    }

    #[test]
    fn test_exact_expiry_is_a_miss() {
        let (cache, clock) = manual_cache();
        cache.put("scoreboard", [("week", "3")], "body".to_string());

        clock.advance(Duration::milliseconds(DEFAULT_TTL_MS));
        assert!(cache.get("scoreboard", [("week", "3")]).is_none());
    }

    #[test]
    fn test_stale_get_evicts_entry() {
        let (cache, clock) = manual_cache();
        cache.put("scoreboard", [("week", "1")], "old".to_string());
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::seconds(30));
        assert!(cache.get("scoreboard", [("week", "1")]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites_and_renews() {
        let (cache, clock) = manual_cache();
        cache.put("scoreboard", [("week", "1")], "old".to_string());
        clock.advance(Duration::seconds(15));
        cache.put("scoreboard", [("week", "1")], "new".to_string());
        clock.advance(Duration::seconds(15));

        assert_eq!(cache.get("scoreboard", [("week", "1")]), Some("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (cache, clock) = manual_cache();
        cache.put("scoreboard", [("week", "1")], "a".to_string());
        clock.advance(Duration::seconds(15));
        cache.put("scoreboard", [("week", "2")], "b".to_string());
        clock.advance(Duration::seconds(10));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("scoreboard", [("week", "2")]).is_some());
    }

    #[test]
    fn test_put_past_threshold_sweeps() {
        let (cache, clock) = manual_cache();
        for week in 0..SWEEP_THRESHOLD {
            cache.put("scoreboard", [("week", week.to_string())], "x".to_string());
        }
        assert_eq!(cache.len(), SWEEP_THRESHOLD);

        clock.advance(Duration::seconds(21));
        cache.put("scoreboard", [("week", "fresh")], "y".to_string());

        assert_eq!(cache.len(), 1);
        assert!(cache.get("scoreboard", [("week", "fresh")]).is_some());
    }
}
