//! Process-wide bookkeeping of in-flight, handled and rejected requests.
//!
//! Diagnostic state only; task outcomes never depend on it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshot of a response the upstream site rejected
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRequest {
    pub url: String,
    pub status: u16,
    pub at: DateTime<Utc>,
}

impl RejectedRequest {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self { url: url.into(), status, at: Utc::now() }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    in_flight: Vec<String>,
    handled: Vec<String>,
    rejected: Vec<RejectedRequest>,
}

/// Shared ledger handed to every task run.
///
/// Cloning is cheap; all clones share one mutex-guarded state.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task as executing, keyed by its registry key
    pub async fn mark_started(&self, key: impl Into<String>) {
        self.state.lock().await.in_flight.push(key.into());
    }

    /// Record one page or detail request as fully handled
    pub async fn mark_handled(&self, key: impl Into<String>) {
        self.state.lock().await.handled.push(key.into());
    }

    /// Record a response the upstream site refused to serve
    pub async fn mark_rejected(&self, rejected: RejectedRequest) {
        self.state.lock().await.rejected.push(rejected);
    }

    /// Remove a completed task's own in-flight entry.
    ///
    /// Keyed removal rather than popping the oldest entry, so
    /// concurrent tasks never evict each other.
    pub async fn finish(&self, key: &str) {
        self.state.lock().await.in_flight.retain(|entry| entry != key);
    }

    pub async fn in_flight(&self) -> Vec<String> {
        self.state.lock().await.in_flight.clone()
    }

    pub async fn handled(&self) -> Vec<String> {
        self.state.lock().await.handled.clone()
    }

    pub async fn rejected(&self) -> Vec<RejectedRequest> {
        self.state.lock().await.rejected.clone()
    }

    /// Counts for end-of-run summaries
    pub async fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        (state.in_flight.len(), state.handled.len(), state.rejected.len())
    }
}
