//! Bounded, thread-safe cache of loaded book records.
//!
//! Each id moves through `absent → loading → resident → (evicted | absent)`.
//! Loads run outside the cache lock; concurrent callers for the same id wait on
//! a shared [`Flight`] and all observe its single outcome.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::document::{BookId, BookRecord};
use crate::error::LoadError;

/// A record produced by a loader, with the digest of the bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedBook {
    pub record: BookRecord,
    pub digest: String,
}

/// Source of records on a cache miss.
pub trait BookLoader: Send + Sync {
    fn load(&self, id: &BookId) -> Result<LoadedBook, LoadError>;
}

impl<F> BookLoader for F
where
    F: Fn(&BookId) -> Result<LoadedBook, LoadError> + Send + Sync,
{
    fn load(&self, id: &BookId) -> Result<LoadedBook, LoadError> {
        self(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub resident: usize,
    pub loading: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
}

type Outcome = Result<Arc<BookRecord>, LoadError>;

#[derive(Debug, Default)]
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Flight {
    fn publish(&self, outcome: Outcome) {
        let mut slot = lock(&self.outcome);
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut slot = lock(&self.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug)]
enum Slot {
    Loading(Arc<Flight>),
    Resident {
        record: Arc<BookRecord>,
        digest: String,
        last_access: u64,
        created: u64,
    },
}

#[derive(Debug, Default)]
struct CacheState {
    slots: HashMap<BookId, Slot>,
    /// Records alive anywhere in the process, by content digest.
    by_digest: HashMap<String, Weak<BookRecord>>,
    tick: u64,
    hits: u64,
    misses: u64,
    loads: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn resident_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Resident { .. }))
            .count()
    }

    /// Evict least-recently-used residents until at most `capacity` remain.
    fn evict_over(&mut self, capacity: usize) {
        while self.resident_count() > capacity {
            let victim = self
                .slots
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Resident {
                        last_access,
                        created,
                        ..
                    } => Some(((*last_access, *created), id)),
                    Slot::Loading(_) => None,
                })
                .min_by_key(|(key, _)| *key)
                .map(|(_, id)| id.clone());
            let Some(id) = victim else {
                break;
            };
            self.slots.remove(&id);
            self.evictions += 1;
            tracing::debug!("Evicted {} from book cache", id);
        }
        self.by_digest.retain(|_, weak| weak.strong_count() > 0);
    }
}

pub struct BookCache {
    capacity: usize,
    loader: Box<dyn BookLoader>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for BookCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes `Aborted` and clears the slot if the loader unwinds.
struct FlightGuard<'a> {
    cache: &'a BookCache,
    id: &'a BookId,
    flight: &'a Arc<Flight>,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = lock(&self.cache.state);
            if matches!(state.slots.get(self.id), Some(Slot::Loading(f)) if Arc::ptr_eq(f, self.flight))
            {
                state.slots.remove(self.id);
            }
        }
        self.flight
            .publish(Err(LoadError::Aborted(self.id.to_string())));
    }
}

impl BookCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, loader: impl BookLoader + 'static) -> Self {
        Self {
            capacity: capacity.max(1),
            loader: Box::new(loader),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, id: &BookId) -> Result<Arc<BookRecord>, LoadError> {
        let flight = {
            let mut state = lock(&self.state);
            let tick = state.next_tick();
            match state.slots.get_mut(id) {
                Some(Slot::Resident {
                    record,
                    last_access,
                    ..
                }) => {
                    *last_access = tick;
                    let record = Arc::clone(record);
                    state.hits += 1;
                    return Ok(record);
                }
                Some(Slot::Loading(flight)) => {
                    let flight = Arc::clone(flight);
                    state.hits += 1;
                    drop(state);
                    tracing::debug!("Waiting on in-flight load of {}", id);
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::default());
                    state.slots.insert(id.clone(), Slot::Loading(Arc::clone(&flight)));
                    state.misses += 1;
                    state.loads += 1;
                    flight
                }
            }
        };

        self.run_load(id, &flight)
    }

    fn run_load(&self, id: &BookId, flight: &Arc<Flight>) -> Outcome {
        let mut guard = FlightGuard {
            cache: self,
            id,
            flight,
            armed: true,
        };
        tracing::debug!("Loading {} into book cache", id);
        let loaded = self.loader.load(id);
        guard.armed = false;

        let outcome = match loaded {
            Ok(book) => Ok(self.install(id, flight, book)),
            Err(e) => {
                let mut state = lock(&self.state);
                if matches!(state.slots.get(id), Some(Slot::Loading(f)) if Arc::ptr_eq(f, flight)) {
                    state.slots.remove(id);
                }
                drop(state);
                tracing::debug!("Load of {} failed: {}", id, e);
                Err(e)
            }
        };
        flight.publish(outcome.clone());
        outcome
    }

    fn install(&self, id: &BookId, flight: &Arc<Flight>, book: LoadedBook) -> Arc<BookRecord> {
        let mut state = lock(&self.state);

        let record = match state.by_digest.get(&book.digest).and_then(Weak::upgrade) {
            Some(existing) if *existing == book.record => existing,
            _ => {
                let record = Arc::new(book.record);
                state
                    .by_digest
                    .insert(book.digest.clone(), Arc::downgrade(&record));
                record
            }
        };

        let still_ours =
            matches!(state.slots.get(id), Some(Slot::Loading(f)) if Arc::ptr_eq(f, flight));
        if !still_ours {
            // invalidated while loading: hand the record to our callers only
            return record;
        }

        let tick = state.next_tick();
        state.slots.insert(
            id.clone(),
            Slot::Resident {
                record: Arc::clone(&record),
                digest: book.digest,
                last_access: tick,
                created: tick,
            },
        );
        let capacity = self.capacity;
        state.evict_over(capacity);
        record
    }

    /// Drop a resident or loading entry. A load already running completes for
    /// its callers but is not installed.
    pub fn invalidate(&self, id: &BookId) {
        let removed = lock(&self.state).slots.remove(id);
        if removed.is_some() {
            tracing::debug!("Invalidated {} in book cache", id);
        }
    }

    /// A resident record, without counting a hit or refreshing its recency.
    pub fn peek(&self, id: &BookId) -> Option<Arc<BookRecord>> {
        match lock(&self.state).slots.get(id) {
            Some(Slot::Resident { record, .. }) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    pub fn contains(&self, id: &BookId) -> bool {
        matches!(lock(&self.state).slots.get(id), Some(Slot::Resident { .. }))
    }

    /// Ids of resident entries, most recently used first.
    pub fn resident_ids(&self) -> Vec<BookId> {
        let state = lock(&self.state);
        let mut ids: Vec<(u64, BookId)> = state
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Resident { last_access, .. } => Some((*last_access, id.clone())),
                Slot::Loading(_) => None,
            })
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Digest of the bytes a resident record was loaded from.
    pub fn digest_of(&self, id: &BookId) -> Option<String> {
        match lock(&self.state).slots.get(id) {
            Some(Slot::Resident { digest, .. }) => Some(digest.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).resident_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        let resident = state.resident_count();
        CacheStats {
            resident,
            loading: state.slots.len() - resident,
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            loads: state.loads,
            evictions: state.evictions,
        }
    }
}
