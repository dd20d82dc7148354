//! Duplicate suppression for retransmitted readings.
//!
//! Gateways retransmit the same sample several times. [`DedupGuard`] remembers
//! each `(sensor_id, timestamp)` pair for a fixed TTL and reports repeats.
//!
//! Entries live in a small number of independently locked shards. Expired
//! entries are ignored on lookup and evicted by one background sweep task
//! (see [`DedupGuard::spawn_sweeper`]) rather than by per-key timers.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SHARD_COUNT: usize = 16;

type DedupKey = (String, OffsetDateTime);
type Shard = HashMap<DedupKey, Instant>;

/// Time-bounded set of recently seen readings.
pub struct DedupGuard {
    ttl: Duration,
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
}

impl DedupGuard {
    /// Suppression window used when none is configured.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    /// Create a guard that suppresses repeats for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn shard(&self, key: &DedupKey) -> MutexGuard<'_, Shard> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        // A panic while holding a shard cannot leave a half-written entry
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `(sensor_id, timestamp)` and report whether it was already
    /// present.
    ///
    /// The first call for a key returns `false`; any call within the TTL of
    /// that first call returns `true`. Once the TTL has elapsed the key is
    /// treated as new again. Keys are compared exactly as given.
    pub fn seen(&self, sensor_id: &str, timestamp: OffsetDateTime) -> bool {
        let now = Instant::now();
        let key = (sensor_id.to_string(), timestamp);
        let mut shard = self.shard(&key);

        match shard.get(&key) {
            Some(expires_at) if *expires_at > now => true,
            _ => {
                shard.insert(key, now + self.ttl);
                false
            }
        }
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for shard in self.shards.iter() {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = shard.len();
            shard.retain(|_, expires_at| *expires_at > now);
            removed += before - shard.len();
        }

        removed
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `every` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        let removed = guard.sweep();
                        if removed > 0 {
                            debug!("Evicted {} expired dedup key(s)", removed);
                        }
                    }
                }
            }

            debug!("Dedup sweeper stopped");
        })
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
