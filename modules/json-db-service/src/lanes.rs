//! Document Lane Serialization
//!
//! Read-modify-write cycles on the same document must not overlap, otherwise
//! two concurrent updates both read the old content and the second write
//! silently discards the first. Each document name gets a one-permit semaphore;
//! holding its guard grants exclusive access to that document. Different
//! documents never contend.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Holding a lane longer than this is logged as suspicious.
const LANE_HOLD_WARNING_SECS: u64 = 10;

/// Guard that releases the document lane when dropped
pub struct DocumentLaneGuard {
    name: String,
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl DocumentLaneGuard {
    pub fn held_duration(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for DocumentLaneGuard {
    fn drop(&mut self) {
        let held = self.held_duration();
        if held.as_secs() > LANE_HOLD_WARNING_SECS {
            log::warn!(
                "[JSON_DB] Lane for {} held for {} seconds (unusually long)",
                self.name,
                held.as_secs()
            );
        }
    }
}

/// Per-document mutual exclusion
#[derive(Default)]
pub struct DocumentLanes {
    lanes: DashMap<String, Arc<Semaphore>>,
}

impl DocumentLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lane for `name` is free and take it.
    pub async fn acquire(&self, name: &str) -> DocumentLaneGuard {
        let semaphore = self.get_or_create_lane(name);
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("Lane semaphores are never closed");

        DocumentLaneGuard {
            name: name.to_string(),
            _permit: permit,
            acquired_at: Instant::now(),
        }
    }

    pub fn stats(&self) -> LaneStats {
        let active_lanes = self
            .lanes
            .iter()
            .filter(|entry| entry.available_permits() == 0)
            .count();
        LaneStats {
            total_lanes: self.lanes.len(),
            active_lanes,
        }
    }

    /// Forget the lane of a deleted document, unless someone is still using it.
    pub fn release(&self, name: &str) {
        self.lanes
            .remove_if(name, |_, s| Arc::strong_count(s) == 1 && s.available_permits() > 0);
    }

    fn get_or_create_lane(&self, name: &str) -> Arc<Semaphore> {
        self.lanes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneStats {
    pub total_lanes: usize,
    pub active_lanes: usize,
}
