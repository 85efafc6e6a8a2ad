// Holding pen for events whose prerequisite entity has not been cached yet.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, trace};

/// Entity kind a parked event is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Member,
    Guild,
    Channel,
    Role,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Member => "member",
            CacheKind::Guild => "guild",
            CacheKind::Channel => "channel",
            CacheKind::Role => "role",
        };
        f.write_str(name)
    }
}

/// A deferred dispatch: enough to re-run the event through the handler table.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEvent {
    pub seq: u64,
    pub event_type: String,
    pub payload: Value,
}

impl CachedEvent {
    pub fn new(seq: u64, event_type: &str, payload: Value) -> Self {
        Self {
            seq,
            event_type: event_type.to_string(),
            payload,
        }
    }
}

/// Keyed by `(kind, id)`, each key holding events in arrival order.
///
/// The lock is held only while the map is mutated. Replay is done by the
/// caller on the entries returned from [`EventCache::take`], so a replayed
/// handler can park new events without deadlocking.
#[derive(Default)]
pub struct EventCache {
    entries: Mutex<HashMap<(CacheKind, i64), Vec<CachedEvent>>>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(CacheKind, i64), Vec<CachedEvent>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn cache(&self, kind: CacheKind, id: i64, event: CachedEvent) {
        trace!(%kind, id, seq = event.seq, event_type = %event.event_type, "caching event");
        self.lock().entry((kind, id)).or_default().push(event);
    }

    /// Remove and return every event parked on the key, oldest first.
    pub fn take(&self, kind: CacheKind, id: i64) -> Vec<CachedEvent> {
        let items = self.lock().remove(&(kind, id)).unwrap_or_default();
        if !items.is_empty() {
            debug!(%kind, id, count = items.len(), "replaying events from the event cache");
        }
        items
    }

    /// Drop entries recorded more than `threshold` sequence numbers before `current_seq`.
    pub fn evict_older_than(&self, current_seq: u64, threshold: u64) -> usize {
        let mut removed = 0;
        let mut entries = self.lock();
        entries.retain(|(kind, id), events| {
            events.retain(|event| {
                let stale = current_seq.saturating_sub(event.seq) > threshold;
                if stale {
                    removed += 1;
                    trace!(%kind, id, seq = event.seq, "evicting stale cached event");
                }
                !stale
            });
            !events.is_empty()
        });
        if removed > 0 {
            debug!(removed, current_seq, "removed events too old to be replayed");
        }
        removed
    }

    pub fn clear(&self, kind: CacheKind, id: i64) {
        if let Some(events) = self.lock().remove(&(kind, id)) {
            debug!(%kind, id, count = events.len(), "clearing event cache entry");
        }
    }

    /// Drop the entries on the key that match `pred`, keeping the rest in order.
    pub fn clear_where(
        &self,
        kind: CacheKind,
        id: i64,
        mut pred: impl FnMut(&CachedEvent) -> bool,
    ) -> usize {
        let mut entries = self.lock();
        let Some(events) = entries.get_mut(&(kind, id)) else {
            return 0;
        };
        let before = events.len();
        events.retain(|event| !pred(event));
        let removed = before - events.len();
        if events.is_empty() {
            entries.remove(&(kind, id));
        }
        if removed > 0 {
            debug!(%kind, id, count = removed, "clearing event cache entries");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, kind: CacheKind, id: i64) -> bool {
        self.lock().contains_key(&(kind, id))
    }

    /// Total number of parked events.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
