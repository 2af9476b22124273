// devdash - Caching API proxy for a weather, GitHub, and AI developer dashboard
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::clock::Clock;
use crate::metrics::DashboardMetrics;
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Kind of data held by a `ResponseCache`, which determines how long entries stay fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Search,
    RepoDetails,
    Trending,
    Weather,
    WeatherCombined,
}

impl CacheKind {
    pub fn ttl(self) -> Duration {
        match self {
            Self::Search => Duration::from_secs(5 * 60),
            Self::RepoDetails => Duration::from_secs(30 * 60),
            Self::Trending => Duration::from_secs(30 * 60),
            Self::Weather => Duration::from_secs(10 * 60),
            Self::WeatherCombined => Duration::from_secs(10 * 60),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::RepoDetails => "repo_details",
            Self::Trending => "trending",
            Self::Weather => "weather",
            Self::WeatherCombined => "weather_combined",
        }
    }
}

/// Build a cache key from an endpoint and its parameters.
///
/// Parameters are sorted by name before being joined so the order they were supplied
/// in doesn't matter. Names and values are percent encoded so that a value containing
/// `&` or `=` can't collide with a different set of parameters.
pub fn cache_key<I, K, V>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
        .collect();

    let query = sorted
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", endpoint, query)
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_millis: i64, ttl: Duration) -> bool {
        now_millis - self.timestamp < ttl.as_millis() as i64
    }
}

/// In-memory cache of upstream responses with a fixed TTL.
///
/// Entries are only checked for expiry when read and are never evicted otherwise. One
/// cache is created per kind of data when the server starts and shared by all requests.
pub struct ResponseCache<T> {
    kind: CacheKind,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    metrics: Option<DashboardMetrics>,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    inflight: Mutex<HashMap<String, InFlight>>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(kind: CacheKind, clock: Arc<dyn Clock>) -> Self {
        ResponseCache {
            kind,
            ttl: kind.ttl(),
            clock,
            metrics: None,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: DashboardMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Get a fresh entry for `key`, recording a hit or miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let found = self.peek(key);
        if let Some(m) = &self.metrics {
            m.cache(self.kind.name(), found.is_some());
        }

        found
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, value: T) {
        let entry = CacheEntry {
            data: value,
            timestamp: self.clock.now_millis(),
        };

        self.entries.lock().insert(key.to_owned(), entry);
    }

    /// Number of entries stored, including expired entries that have not been replaced.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a fresh entry for `key` or run `fetch` to populate it.
    ///
    /// Concurrent misses for the same key wait for a single in-flight `fetch` instead of
    /// each calling the upstream service. Errors are returned to the caller that ran the
    /// fetch and are never cached, so waiters will try again themselves.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }

        let flight = FlightGuard::join(&self.inflight, key);
        let _held = flight.lock.lock().await;

        if let Some(v) = self.peek(key) {
            tracing::debug!(message = "cache filled by concurrent request", kind = self.kind.name(), key = %key);
            return Ok(v);
        }

        let res = fetch().await;
        if let Ok(v) = &res {
            self.set(key, v.clone());
        }

        res
    }

    fn peek(&self, key: &str) -> Option<T> {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .get(key)
            .filter(|e| e.is_fresh(now, self.ttl))
            .map(|e| e.data.clone())
    }
}

/// Fetch lock for a key, shared by every caller currently waiting on or running it.
struct InFlight {
    lock: Arc<tokio::sync::Mutex<()>>,
    callers: usize,
}

/// Membership of one caller in the in-flight fetch for a key.
///
/// Dropping the guard leaves the flight, including when the caller's future is dropped
/// before the fetch completes. The last caller to leave removes the entry.
struct FlightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, InFlight>>,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> FlightGuard<'a> {
    fn join(inflight: &'a Mutex<HashMap<String, InFlight>>, key: &'a str) -> Self {
        let lock = {
            let mut flights = inflight.lock();
            let flight = flights.entry(key.to_owned()).or_insert_with(|| InFlight {
                lock: Arc::default(),
                callers: 0,
            });

            flight.callers += 1;
            flight.lock.clone()
        };

        FlightGuard { inflight, key, lock }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.inflight.lock();
        let last = match flights.get_mut(self.key) {
            Some(f) if Arc::ptr_eq(&f.lock, &self.lock) => {
                f.callers -= 1;
                f.callers == 0
            }
            _ => false,
        };

        if last {
            flights.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{cache_key, CacheKind, ResponseCache};
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cache_key_order_independent() {
        let a = cache_key("/api/github", [("a", "1"), ("b", "2")]);
        let b = cache_key("/api/github", [("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
        assert_eq!("/api/github?a=1&b=2", a);
    }

    #[test]
    fn test_cache_key_escapes_values() {
        let a = cache_key("/api/github/search", [("q", "a&b=c")]);
        let b = cache_key("/api/github/search", [("q", "a"), ("b", "c")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_key_different_endpoints() {
        let a = cache_key("/api/weather", [("city", "London")]);
        let b = cache_key("/api/weather/current", [("city", "London")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_servable_until_ttl() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ResponseCache::new(CacheKind::Search, clock.clone());
        let ttl = CacheKind::Search.ttl().as_millis() as i64;

        cache.set("k", 1);
        clock.advance(ttl - 1);
        assert_eq!(Some(1), cache.get("k"));

        clock.advance(2);
        assert_eq!(None, cache.get("k"));
    }

    #[test]
    fn test_set_overwrites() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(CacheKind::Weather, clock.clone());

        cache.set("k", "old");
        cache.set("k", "new");
        assert_eq!(Some("new"), cache.get("k"));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_ttls() {
        assert_eq!(Duration::from_secs(300), CacheKind::Search.ttl());
        assert_eq!(Duration::from_secs(1800), CacheKind::RepoDetails.ttl());
        assert_eq!(Duration::from_secs(1800), CacheKind::Trending.ttl());
        assert_eq!(Duration::from_secs(600), CacheKind::Weather.ttl());
        assert_eq!(Duration::from_secs(600), CacheKind::WeatherCombined.ttl());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_fetch() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(CacheKind::RepoDetails, clock);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ()>(42)
        };

        let (a, b) = tokio::join!(cache.get_or_try_fetch("k", fetch), cache.get_or_try_fetch("k", fetch));
        assert_eq!(Ok(42), a);
        assert_eq!(Ok(42), b);
        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(cache.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_key() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: ResponseCache<u32> = ResponseCache::new(CacheKind::Search, clock);

        for i in 0..20 {
            let key = format!("k{}", i);
            let fetch = cache.get_or_try_fetch(&key, || std::future::pending::<Result<u32, ()>>());
            assert!(tokio::time::timeout(Duration::from_millis(1), fetch).await.is_err());
        }

        assert!(cache.inflight.lock().is_empty());
        assert!(cache.is_empty());

        // A cancelled caller does not block the next one for the same key
        let res = cache.get_or_try_fetch("k0", || async { Ok::<_, ()>(5) }).await;
        assert_eq!(Ok(5), res);
    }

    #[tokio::test]
    async fn test_failed_fetch_waiter_retries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: ResponseCache<u32> = ResponseCache::new(CacheKind::Trending, clock);

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<u32, &str>("boom")
        };
        let succeeding = || async { Ok::<_, &str>(9) };

        let (a, b) = tokio::join!(
            cache.get_or_try_fetch("k", failing),
            cache.get_or_try_fetch("k", succeeding)
        );
        assert_eq!(Err("boom"), a);
        assert_eq!(Ok(9), b);
        assert!(cache.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: ResponseCache<u32> = ResponseCache::new(CacheKind::Trending, clock);

        let res = cache.get_or_try_fetch("k", || async { Err("boom") }).await;
        assert_eq!(Err("boom"), res);
        assert!(cache.is_empty());

        let res = cache.get_or_try_fetch("k", || async { Ok::<_, &str>(7) }).await;
        assert_eq!(Ok(7), res);
        assert_eq!(Some(7), cache.get("k"));
    }
}
