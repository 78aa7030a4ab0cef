//! Per-server cache of pending command lists.
//!
//! Shields the store from agents polling every second or so. Entries are
//! bounded by a TTL and a capacity with least-recently-used eviction. Every
//! mutation that affects a server invalidates its entry before it is
//! acknowledged; the TTL is only a safety net.
//!
//! A poll that misses takes a [`FillTicket`] *before* querying the store and
//! hands it back with the result. Any invalidation in between bumps the cache
//! epoch, and the stale fill is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rconq_core::{Clock, Command};

pub const DEFAULT_TTL_MS: u64 = 1_000;
pub const DEFAULT_CAPACITY: usize = 200;

/// Proof of the cache epoch observed before a store read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

#[derive(Debug)]
struct Entry {
    commands: Vec<Command>,
    filled_at: DateTime<Utc>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    epoch: u64,
    tick: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

pub struct PendingCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PendingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl PendingCache {
    pub fn new(ttl_ms: u64, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl: Duration::milliseconds(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
            capacity: capacity.max(1),
            clock,
        }
    }

    // The cache holds no invariant a panicking holder could break halfway.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Unexpired cached list for `server_id`, if any.
    pub fn get(&self, server_id: &str) -> Option<Vec<Command>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let tick = inner.touch();

        let entry = inner.entries.get_mut(server_id)?;
        if now - entry.filled_at < self.ttl {
            entry.last_used = tick;
            return Some(entry.commands.clone());
        }
        inner.entries.remove(server_id);
        None
    }

    /// Take a ticket before reading the store on a miss.
    pub fn ticket(&self) -> FillTicket {
        FillTicket(self.lock().epoch)
    }

    /// Store a freshly read list. Returns `false` when an invalidation
    /// happened after `ticket` was taken and the list was discarded.
    pub fn fill(&self, server_id: &str, ticket: FillTicket, commands: Vec<Command>) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.epoch != ticket.0 {
            return false;
        }

        if !inner.entries.contains_key(server_id) && inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }
        let last_used = inner.touch();
        inner.entries.insert(
            server_id.to_string(),
            Entry {
                commands,
                filled_at: now,
                last_used,
            },
        );
        true
    }

    /// Drop the entry for one server.
    pub fn invalidate(&self, server_id: &str) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.entries.remove(server_id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rconq_core::{ExecutionType, ManualClock, NewCommand};

    fn setup(ttl_ms: u64, capacity: usize) -> (Arc<ManualClock>, PendingCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap(),
        ));
        let cache = PendingCache::new(ttl_ms, capacity, clock.clone());
        (clock, cache)
    }

    fn pending(server: &str) -> Vec<Command> {
        vec![
            NewCommand {
                server_id: server.to_string(),
                game_mode: None,
                command_text: "say hi".to_string(),
                player: None,
                execution_type: ExecutionType::Instant,
                expiry_hours: None,
            }
            .into_command(Utc::now(), 24, None),
        ]
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (clock, cache) = setup(1_000, 10);
        let t = cache.ticket();
        assert!(cache.fill("lobby", t, pending("lobby")));

        clock.advance(Duration::milliseconds(999));
        assert!(cache.get("lobby").is_some());

        clock.advance(Duration::milliseconds(1));
        assert!(cache.get("lobby").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let (_clock, cache) = setup(1_000, 2);
        cache.fill("a", cache.ticket(), pending("a"));
        cache.fill("b", cache.ticket(), pending("b"));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.fill("c", cache.ticket(), pending("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn refill_of_existing_key_does_not_evict() {
        let (_clock, cache) = setup(1_000, 2);
        cache.fill("a", cache.ticket(), pending("a"));
        cache.fill("b", cache.ticket(), pending("b"));
        cache.fill("a", cache.ticket(), Vec::new());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(Vec::new()));
    }

    #[test]
    fn fill_started_before_invalidation_is_discarded() {
        let (_clock, cache) = setup(1_000, 10);
        let stale = cache.ticket();
        cache.invalidate("lobby");
        assert!(!cache.fill("lobby", stale, pending("lobby")));
        assert!(cache.get("lobby").is_none());

        let fresh = cache.ticket();
        assert!(cache.fill("lobby", fresh, Vec::new()));
    }

    #[test]
    fn invalidate_and_clear() {
        let (_clock, cache) = setup(1_000, 10);
        cache.fill("a", cache.ticket(), pending("a"));
        cache.fill("b", cache.ticket(), pending("b"));

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
