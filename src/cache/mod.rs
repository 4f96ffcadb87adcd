// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Content-addressed artifact cache
//!
//! [`CacheStore::get_or_compute`] runs at most one computation per key at a
//! time. Callers arriving while a computation is in flight wait for it and
//! receive the same result, success or failure. Only successes are kept.

mod hash;

pub use hash::ContentHasher;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Opaque cache key; the store never interprets the bytes
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if hex.len() > 16 {
            write!(f, "{}…", &hex[..16])
        } else {
            write!(f, "{}", hex)
        }
    }
}

/// A retained artifact
#[derive(Debug, Clone)]
pub struct CacheEntry<A> {
    pub key: CacheKey,
    pub artifact: A,
    pub computed_at: SystemTime,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of retained artifacts
    pub entries: usize,
    /// Computations currently running
    pub in_flight: usize,
    /// Requests answered from a retained artifact
    pub hits: u64,
    /// Requests that started a computation
    pub misses: u64,
    /// Requests that joined a computation already in flight
    pub waits: u64,
    /// Computations that failed
    pub failures: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
}

type Flight<A, E> = watch::Receiver<Option<Result<A, E>>>;

enum Slot<A, E> {
    Ready(CacheEntry<A>),
    Pending { id: u64, rx: Flight<A, E> },
}

struct State<A, E> {
    slots: HashMap<CacheKey, Slot<A, E>>,
    next_flight: u64,
    hits: u64,
    misses: u64,
    waits: u64,
    failures: u64,
}

enum Role<A, E> {
    Hit(A),
    Wait(Flight<A, E>),
    Lead(u64, watch::Sender<Option<Result<A, E>>>),
}

/// In-memory single-flight store
pub struct CacheStore<A, E> {
    state: Mutex<State<A, E>>,
}

impl<A, E> CacheStore<A, E>
where
    A: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                next_flight: 0,
                hits: 0,
                misses: 0,
                waits: 0,
                failures: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<A, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the artifact for `key`, computing it with `compute` if needed
    ///
    /// A concurrent caller for the same key awaits the running computation
    /// instead of invoking its own `compute`. If the computing caller is
    /// dropped before finishing, a waiter takes over the computation.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<A, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<A, E>>,
    {
        let (id, tx) = loop {
            let role = self.claim(key);

            match role {
                Role::Hit(artifact) => {
                    trace!(%key, "cache hit");
                    return Ok(artifact);
                }
                Role::Wait(mut rx) => {
                    debug!(%key, "waiting for in-flight computation");
                    let outcome = rx.wait_for(Option::is_some).await.map(|v| v.clone());
                    match outcome {
                        Ok(Some(result)) => return result,
                        // The computing caller went away; try again.
                        Ok(None) | Err(_) => continue,
                    }
                }
                Role::Lead(id, tx) => break (id, tx),
            }
        };

        let mut guard = FlightGuard {
            store: self,
            key,
            id,
            armed: true,
        };

        debug!(%key, "computing artifact");
        let result = compute().await;

        self.settle(key, id, &result);
        guard.armed = false;

        // Waiters may all have gone; nothing to do then.
        let _ = tx.send(Some(result.clone()));

        result
    }

    fn claim(&self, key: &CacheKey) -> Role<A, E> {
        let mut state = self.lock();

        match state.slots.get(key) {
            Some(Slot::Ready(entry)) => {
                let artifact = entry.artifact.clone();
                state.hits += 1;
                Role::Hit(artifact)
            }
            Some(Slot::Pending { rx, .. }) => {
                let rx = rx.clone();
                state.waits += 1;
                Role::Wait(rx)
            }
            None => {
                state.misses += 1;
                state.next_flight += 1;
                let id = state.next_flight;
                let (tx, rx) = watch::channel(None);
                state.slots.insert(key.clone(), Slot::Pending { id, rx });
                Role::Lead(id, tx)
            }
        }
    }

    fn settle(&self, key: &CacheKey, id: u64, result: &Result<A, E>) {
        let mut state = self.lock();

        if result.is_err() {
            state.failures += 1;
        }

        // The slot may have been invalidated (or replaced) mid-flight.
        let ours = matches!(state.slots.get(key), Some(Slot::Pending { id: current, .. }) if *current == id);
        if !ours {
            return;
        }

        match result {
            Ok(artifact) => {
                state.slots.insert(
                    key.clone(),
                    Slot::Ready(CacheEntry {
                        key: key.clone(),
                        artifact: artifact.clone(),
                        computed_at: SystemTime::now(),
                    }),
                );
            }
            Err(_) => {
                state.slots.remove(key);
            }
        }
    }

    fn abandon(&self, key: &CacheKey, id: u64) {
        let mut state = self.lock();
        if matches!(state.slots.get(key), Some(Slot::Pending { id: current, .. }) if *current == id) {
            state.slots.remove(key);
        }
    }

    /// Peek at a retained artifact without computing
    pub fn get(&self, key: &CacheKey) -> Option<A> {
        match self.lock().slots.get(key) {
            Some(Slot::Ready(entry)) => Some(entry.artifact.clone()),
            _ => None,
        }
    }

    /// Look up the full entry for a retained artifact
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry<A>> {
        match self.lock().slots.get(key) {
            Some(Slot::Ready(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Remove the retained artifact for one key; returns whether anything was removed
    ///
    /// A computation in flight for `key` is left alone, so the key never has
    /// two computations running at once.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.invalidate_if(key, |_| true)
    }

    /// Remove the retained artifact for `key` if `stale` says so
    ///
    /// The check and the removal happen under one lock.
    pub fn invalidate_if<F>(&self, key: &CacheKey, stale: F) -> bool
    where
        F: FnOnce(&CacheEntry<A>) -> bool,
    {
        let mut state = self.lock();

        let remove = match state.slots.get(key) {
            Some(Slot::Ready(entry)) => stale(entry),
            _ => false,
        };
        if remove {
            state.slots.remove(key);
        }
        remove
    }

    /// Remove every retained artifact; computations in flight finish normally
    pub fn clear(&self) {
        self.lock()
            .slots
            .retain(|_, slot| matches!(slot, Slot::Pending { .. }));
    }

    /// Number of retained artifacts
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();

        let mut stats = CacheStats {
            hits: state.hits,
            misses: state.misses,
            waits: state.waits,
            failures: state.failures,
            ..CacheStats::default()
        };

        for slot in state.slots.values() {
            match slot {
                Slot::Ready(entry) => {
                    stats.entries += 1;
                    let at = entry.computed_at;
                    if stats.oldest_entry.map_or(true, |oldest| at < oldest) {
                        stats.oldest_entry = Some(at);
                    }
                    if stats.newest_entry.map_or(true, |newest| at > newest) {
                        stats.newest_entry = Some(at);
                    }
                }
                Slot::Pending { .. } => stats.in_flight += 1,
            }
        }

        stats
    }
}

impl<A, E> Default for CacheStore<A, E>
where
    A: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a pending slot if the computing future is dropped early
struct FlightGuard<'a, A, E>
where
    A: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    store: &'a CacheStore<A, E>,
    key: &'a CacheKey,
    id: u64,
    armed: bool,
}

impl<A, E> Drop for FlightGuard<'_, A, E>
where
    A: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn drop(&mut self) {
        if self.armed {
            self.store.abandon(self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Store = CacheStore<String, String>;

    #[tokio::test]
    async fn test_second_call_uses_retained_artifact() {
        let store = Store::new();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::from("logo.png");

        for _ in 0..2 {
            let artifact = store
                .get_or_compute(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("compressed".to_string())
                })
                .await
                .unwrap();
            assert_eq!(artifact, "compressed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let store = Arc::new(Store::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from("bundle.js");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .get_or_compute(&key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, String>("transpiled".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "transpiled");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_all_waiters_and_is_not_retained() {
        let store = Arc::new(Store::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from("main.scss");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .get_or_compute(&key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<String, _>("syntax error".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap_err(), "syntax error");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());

        // Next request retries.
        let artifact = store
            .get_or_compute(&key, || async { Ok::<_, String>("main.css".to_string()) })
            .await
            .unwrap();
        assert_eq!(artifact, "main.css");
        assert_eq!(store.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_force_recompute() {
        let store = Store::new();
        let calls = AtomicUsize::new(0);
        let a = CacheKey::from("a");
        let b = CacheKey::from("b");

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("x".to_string())
        };

        store.get_or_compute(&a, compute).await.unwrap();
        store.get_or_compute(&b, compute).await.unwrap();
        assert_eq!(store.len(), 2);

        assert!(store.invalidate(&a));
        assert!(!store.invalidate(&a));
        store.get_or_compute(&a, compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        store.clear();
        assert!(store.get(&b).is_none());
        store.get_or_compute(&b, compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_leader_hands_over_to_waiter() {
        let store = Arc::new(Store::new());
        let key = CacheKey::from("slow");

        let leader = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .get_or_compute(&key, || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok::<_, String>("never".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.stats().in_flight, 1);

        let waiter = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .get_or_compute(&key, || async { Ok::<_, String>("fresh".to_string()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        assert_eq!(waiter.await.unwrap().unwrap(), "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_mid_flight_never_starts_second_computation() {
        let store = Arc::new(Store::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from("dist/app.js");

        let mut handles = Vec::new();
        for delay in [0, 10] {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                store.invalidate(&key);
                store
                    .get_or_compute(&key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>("bundled".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "bundled");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&key).as_deref(), Some("bundled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_mid_flight_keeps_the_running_computation() {
        let store = Arc::new(Store::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from("logo.webp");

        let compute = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>("webp".to_string())
        };

        let leader = {
            let (store, key, calls) = (Arc::clone(&store), key.clone(), Arc::clone(&calls));
            tokio::spawn(async move { store.get_or_compute(&key, || compute(calls)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.clear();
        assert_eq!(store.stats().in_flight, 1);

        let follower = store.get_or_compute(&key, || compute(Arc::clone(&calls))).await;
        assert_eq!(follower.unwrap(), "webp");
        assert_eq!(leader.await.unwrap().unwrap(), "webp");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_if_checks_the_entry() {
        let store = Store::new();
        let key = CacheKey::from("fonts");
        assert!(!store.invalidate_if(&key, |_| true));

        store
            .get_or_compute(&key, || async { Ok::<_, String>("woff2".to_string()) })
            .await
            .unwrap();

        assert!(!store.invalidate_if(&key, |entry| entry.artifact != "woff2"));
        assert_eq!(store.len(), 1);
        assert!(store.invalidate_if(&key, |entry| entry.artifact == "woff2"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_key_display_is_shortened_hex() {
        let key = CacheKey::new(vec![0xab; 32]);
        assert_eq!(key.to_hex().len(), 64);
        assert_eq!(key.to_string(), "abababababababab…");
    }
}
