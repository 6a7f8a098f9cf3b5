use super::types::{CounterEntry, CounterHit, Policy};
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use tracing::debug;

/// Counter storage behind the rate limiter.
///
/// `hit` must be atomic per key: concurrent hits on the same key never lose
/// an increment and never push `count` past `policy.max_requests`. The
/// in-process [`MemoryStore`] is the only implementation today; a shared
/// store with atomic increment and expiry can implement the same trait for
/// multi-instance deployments.
pub trait CounterStore: Send + Sync + Debug {
    /// Read-or-create the entry for `key`, then count one request against it.
    ///
    /// Fails with `InvalidPolicy` if the policy has a zero quota or window.
    fn hit(&self, key: &str, policy: &Policy, now_ms: u64) -> Result<CounterHit>;

    /// Delete every entry whose window closed before `now_ms`, returning how many were removed
    fn sweep(&self, now_ms: u64) -> usize;

    /// Number of entries currently held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    fn clear(&self);
}

/// In-memory counter store
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry for `key` (for monitoring and tests)
    pub fn get(&self, key: &str) -> Option<CounterEntry> {
        self.counters.get(key).map(|entry| *entry.value())
    }
}

impl CounterStore for MemoryStore {
    fn hit(&self, key: &str, policy: &Policy, now_ms: u64) -> Result<CounterHit> {
        // `Policy` fields are public, so a zero quota or window can arrive unvalidated
        policy.validate()?;

        // The entry guard holds the shard lock for the whole read-modify-write
        let hit = match self.counters.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                debug!(key = %key, "Opening counter window");
                let entry = CounterEntry::open(policy, now_ms);
                vacant.insert(entry);
                CounterHit {
                    entry,
                    counted: true,
                }
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if current.is_expired(now_ms) {
                    // Dead windows are replaced, never reused
                    let entry = CounterEntry::open(policy, now_ms);
                    occupied.insert(entry);
                    CounterHit {
                        entry,
                        counted: true,
                    }
                } else if current.count < policy.max_requests {
                    let entry = occupied.get_mut();
                    entry.count += 1;
                    CounterHit {
                        entry: *entry,
                        counted: true,
                    }
                } else {
                    CounterHit {
                        entry: current,
                        counted: false,
                    }
                }
            }
        };

        Ok(hit)
    }

    fn sweep(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, entry| {
            let expired = entry.is_expired(now_ms);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }

    fn len(&self) -> usize {
        self.counters.len()
    }

    fn clear(&self) {
        self.counters.clear();
    }
}
