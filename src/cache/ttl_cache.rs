//! Bounded LRU cache with per-entry expiration and single-flight loads.
//!
//! Every key has at most one load in flight. Callers that miss while a load is
//! running wait on that load's [`Flight`] and observe its value or its error.
//! Loads for different keys run in parallel: the map lock is only held for
//! bookkeeping, never across a load.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::helpers::time::{Clock, SystemClock};
use crate::observability::metrics;
use crate::resilience::transient::{is_transient, SharedError};

pub const DEFAULT_CAPACITY: usize = 1024;

/// Result of one load, shared by every caller that waited on it.
type Flight<V> = OnceCell<std::result::Result<V, SharedError>>;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    /// `None` never expires.
    expires_at: Option<DateTime<Utc>>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// A load in progress and the number of callers running or awaiting it.
struct Pending<V> {
    flight: Arc<Flight<V>>,
    callers: usize,
}

struct State<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    flights: HashMap<K, Pending<V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> State<K, V> {
    /// Clone of the live value for `key`, touching it for LRU purposes.
    /// An expired entry is dropped.
    fn live(&mut self, key: &K, now: DateTime<Utc>) -> Option<V> {
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }
        self.entries.pop(key);
        None
    }

    /// Stores an entry, returning whether another key was evicted for it.
    fn store(&mut self, key: K, value: V, expires_at: Option<DateTime<Utc>>) -> bool {
        let inserted = key.clone();
        matches!(
            self.entries.push(key, Entry { value, expires_at }),
            Some((evicted, _)) if evicted != inserted
        )
    }
}

/// Process-wide cache shared by cloning.
pub struct TtlCache<K: Hash + Eq, V> {
    name: Arc<str>,
    state: Arc<Mutex<State<K, V>>>,
    clock: Arc<dyn Clock>,
}

impl<K: Hash + Eq, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), state: self.state.clone(), clock: self.clock.clone() }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    /// A zero capacity falls back to [`DEFAULT_CAPACITY`].
    pub fn new(name: &str, capacity: usize) -> Self {
        Self::with_clock(name, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(name: &str, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(State {
                entries: LruCache::new(capacity),
                flights: HashMap::new(),
            })),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`, without ever waiting on a load.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let value = self.lock().live(key, now);
        match value {
            Some(_) => metrics::record_hit(&self.name),
            None => metrics::record_miss(&self.name),
        }
        value
    }

    /// Stores `value` directly. A `ttl` of `None` never expires; a zero or
    /// negative one removes the key instead.
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let mut state = self.lock();
        match ttl {
            Some(ttl) if ttl <= Duration::zero() => {
                state.entries.pop(&key);
            }
            ttl => {
                // an unrepresentable deadline never expires
                if state.store(key, value, ttl.and_then(|ttl| now.checked_add_signed(ttl))) {
                    metrics::record_eviction(&self.name);
                }
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.pop(key).map(|entry| entry.value)
    }

    /// Number of stored entries, including ones that expired but were not
    /// looked up since.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live value for `key`, or runs `loader` once for every
    /// caller concurrently missing the same key.
    ///
    /// `loader` yields the value and how long to keep it; a zero or negative
    /// TTL hands the value to the waiters without storing it. A failed load
    /// stores nothing, so the next caller retries.
    pub async fn get_or_create<F, Fut>(&self, key: K, loader: F) -> std::result::Result<V, SharedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration)>>,
    {
        self.get_or_create_if(key, |_| true, loader).await
    }

    /// Like [`get_or_create`](Self::get_or_create), but a live value is only
    /// returned when `accept` approves it; otherwise it is replaced by a new
    /// load, shared with whoever else is loading the key.
    pub async fn get_or_create_if<A, F, Fut>(
        &self,
        key: K,
        accept: A,
        loader: F,
    ) -> std::result::Result<V, SharedError>
    where
        A: FnOnce(&V) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration)>>,
    {
        let flight = {
            let now = self.clock.now();
            let mut state = self.lock();
            if let Some(value) = state.live(&key, now) {
                if accept(&value) {
                    metrics::record_hit(&self.name);
                    return Ok(value);
                }
            }
            metrics::record_miss(&self.name);
            match state.flights.get_mut(&key) {
                Some(pending) => {
                    debug!(cache = %self.name, key = ?key, "joining load in flight");
                    metrics::record_flight_join(&self.name);
                    pending.callers += 1;
                    pending.flight.clone()
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    state.flights.insert(key.clone(), Pending { flight: flight.clone(), callers: 1 });
                    flight
                }
            }
        };

        let caller = FlightCaller { state: &self.state, key: &key, flight };
        let outcome = caller
            .flight
            .get_or_init(|| self.run_flight(&key, &caller.flight, loader))
            .await
            .clone();
        outcome
    }

    /// Runs one load and publishes its outcome. Only the caller that wins the
    /// flight gets here; if it is cancelled, the next waiter runs its own loader.
    async fn run_flight<F, Fut>(
        &self,
        key: &K,
        flight: &Arc<Flight<V>>,
        loader: F,
    ) -> std::result::Result<V, SharedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration)>>,
    {
        debug!(cache = %self.name, key = ?key, "loading");
        let start = Instant::now();
        let outcome = loader().await;
        let elapsed = start.elapsed().as_secs_f64();

        let now = self.clock.now();
        let mut state = self.lock();
        if state.flights.get(key).is_some_and(|current| Arc::ptr_eq(&current.flight, flight)) {
            state.flights.remove(key);
        }

        match outcome {
            Ok((value, ttl)) => {
                metrics::record_load(&self.name, elapsed, None);
                if ttl > Duration::zero() {
                    if state.store(key.clone(), value.clone(), now.checked_add_signed(ttl)) {
                        debug!(cache = %self.name, "evicted least recently used entry");
                        metrics::record_eviction(&self.name);
                    }
                } else {
                    state.entries.pop(key);
                }
                Ok(value)
            }
            Err(err) => {
                let kind = if is_transient(&err) { "transient" } else { "permanent" };
                metrics::record_load(&self.name, elapsed, Some(kind));
                warn!(cache = %self.name, key = ?key, kind, "load failed: {err:#}");
                Err(SharedError::from(err))
            }
        }
    }
}

/// Releases one caller's interest in a flight, dropping the flight from the
/// map when the last caller leaves before it was published.
struct FlightCaller<'a, K: Hash + Eq, V> {
    state: &'a Mutex<State<K, V>>,
    key: &'a K,
    flight: Arc<Flight<V>>,
}

impl<K: Hash + Eq, V> Drop for FlightCaller<'_, K, V> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let abandoned = match state.flights.get_mut(self.key) {
            Some(pending) if Arc::ptr_eq(&pending.flight, &self.flight) => {
                pending.callers = pending.callers.saturating_sub(1);
                pending.callers == 0
            }
            _ => false,
        };
        if abandoned {
            state.flights.remove(self.key);
        }
    }
}
