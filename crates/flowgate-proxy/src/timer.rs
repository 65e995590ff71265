//! Per-flow request timing.
//!
//! Flows run concurrently on the multi-threaded tokio runtime that drives
//! the engine, so the start times live behind a mutex. The lock is never
//! held across an await point.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::flow::FlowId;

/// Tracks when each in-flight flow was first seen.
///
/// Every entry is consumed by [`FlowTimer::on_response`] or
/// [`FlowTimer::evict`]; with no flows in flight the map is empty.
#[derive(Debug, Default)]
pub struct FlowTimer {
    started: Mutex<HashMap<FlowId, Instant>>,
}

impl FlowTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the request time for a flow. A repeated call overwrites.
    pub fn on_request(&self, id: FlowId) {
        self.on_request_at(id, Instant::now());
    }

    /// Records an explicit request time for a flow.
    pub fn on_request_at(&self, id: FlowId, at: Instant) {
        self.started.lock().insert(id, at);
    }

    /// Removes the flow's entry and returns how long it has been in flight.
    ///
    /// Returns `None` when the flow was never recorded or was already
    /// consumed.
    pub fn on_response(&self, id: FlowId) -> Option<Duration> {
        let started = self.started.lock().remove(&id)?;
        Some(started.elapsed())
    }

    /// Drops a flow's entry without measuring it.
    pub fn evict(&self, id: FlowId) -> bool {
        self.started.lock().remove(&id).is_some()
    }

    /// Number of flows currently in flight.
    pub fn len(&self) -> usize {
        self.started.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.started.lock().is_empty()
    }

    pub fn contains(&self, id: FlowId) -> bool {
        self.started.lock().contains_key(&id)
    }
}
