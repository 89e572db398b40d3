//! Per-session outbound audio queue.
//!
//! Many producers (audio chunk calls from the client connection) and one
//! consumer (the audio pump). The queue is bounded; a full queue never blocks
//! the producer and instead drops a fragment according to `OverflowPolicy`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Default number of fragments held per session.
pub const DEFAULT_AUDIO_QUEUE_CAPACITY: usize = 512;

/// What to drop when a fragment arrives at a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued fragment to make room
    #[default]
    DropOldest,
    /// Reject the incoming fragment
    DropNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop_oldest"),
            OverflowPolicy::DropNewest => write!(f, "drop_newest"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "drop_oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(format!(
                "Invalid audio queue overflow policy '{other}'. Expected 'drop_oldest' or 'drop_newest'"
            )),
        }
    }
}

/// Bounded FIFO of base64 audio fragments.
#[derive(Debug)]
pub struct AudioQueue {
    fragments: Mutex<VecDeque<String>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_QUEUE_CAPACITY, OverflowPolicy::default())
    }
}

impl AudioQueue {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            fragments: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a fragment. Returns `false` if a fragment was dropped to honor
    /// the capacity.
    pub fn push(&self, fragment: String) -> bool {
        let mut fragments = self.fragments.lock();
        if fragments.len() < self.capacity {
            fragments.push_back(fragment);
            return true;
        }

        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        match self.policy {
            OverflowPolicy::DropOldest => {
                fragments.pop_front();
                fragments.push_back(fragment);
            }
            OverflowPolicy::DropNewest => {}
        }
        drop(fragments);

        // first drop, then every 100th
        if dropped == 1 || dropped % 100 == 0 {
            warn!(
                capacity = self.capacity,
                policy = %self.policy,
                dropped,
                "Audio queue full, dropping fragment"
            );
        }
        false
    }

    /// Dequeue the oldest fragment, if any.
    pub fn pop(&self) -> Option<String> {
        self.fragments.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.fragments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total fragments dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drop everything still queued.
    pub fn clear(&self) {
        self.fragments.lock().clear();
    }
}
