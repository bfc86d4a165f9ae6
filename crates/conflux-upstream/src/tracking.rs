//! Bounded store of routed tool calls
//!
//! Every call gets a tracker that moves from `pending` to `in_progress` and
//! then to `completed` or `failed`. The store keeps trackers in insertion
//! order and evicts on every insert, first by age and then, oldest first,
//! by count. Reads never reorder entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use conflux_config::TrackingConfig;
use conflux_core::CallContext;
use indexmap::IndexMap;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Lifecycle state of a tracked call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RequestStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::InProgress, Self::Completed, Self::Failed];

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Record of one routed call
#[derive(Debug, Clone, Serialize)]
pub struct RequestTracker {
    pub request_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub status: RequestStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
    pub client_ip: Option<String>,
    pub session_id: Option<String>,
}

impl RequestTracker {
    /// Close the tracker, computing the duration when it was started
    fn finish(&mut self, status: RequestStatus, now: Timestamp) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| now.duration_since(started).as_secs_f64() * 1000.0);
    }
}

/// Aggregate view over the stored trackers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_requests: usize,
    pub by_status: BTreeMap<RequestStatus, usize>,
    pub by_server: BTreeMap<String, usize>,
    /// Mean duration of completed calls, failed calls excluded
    pub average_duration_ms: f64,
    /// Number of completed calls with a recorded duration
    pub completed_requests: usize,
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Insertion-ordered, size and age bounded tracker store
pub struct TrackingStore {
    requests: RwLock<IndexMap<String, RequestTracker>>,
    max_size: usize,
    retention: SignedDuration,
    clock: Arc<dyn Clock>,
}

impl TrackingStore {
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Store reading time from the given clock
    pub fn with_clock(config: &TrackingConfig, clock: Arc<dyn Clock>) -> Self {
        let retention = SignedDuration::try_from(config.retention()).unwrap_or(SignedDuration::MAX);

        Self {
            requests: RwLock::new(IndexMap::new()),
            max_size: config.max_size,
            retention,
            clock,
        }
    }

    /// Insert a pending tracker and run housekeeping; returns its id
    pub async fn create(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Map<String, Value>,
        context: &CallContext,
    ) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        let tracker = RequestTracker {
            request_id: request_id.clone(),
            server_name: server_name.to_owned(),
            tool_name: tool_name.to_owned(),
            arguments,
            status: RequestStatus::Pending,
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            duration_ms: None,
            client_ip: context.client_ip.clone(),
            session_id: context.session_id.clone(),
        };

        let mut requests = self.requests.write().await;
        requests.insert(request_id.clone(), tracker);
        self.evict(&mut requests);
        drop(requests);

        tracing::info!(request_id, server = server_name, tool = tool_name, "created request");
        request_id
    }

    /// Mark a pending tracker as in progress
    pub async fn start(&self, request_id: &str) {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        if let Some(tracker) = requests.get_mut(request_id)
            && tracker.status == RequestStatus::Pending
        {
            tracker.status = RequestStatus::InProgress;
            tracker.started_at = Some(now);
            tracing::debug!(request_id, "started request");
        }
    }

    /// Mark a tracker as completed with its result
    pub async fn complete(&self, request_id: &str, result: Option<Value>) {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        if let Some(tracker) = requests.get_mut(request_id)
            && !tracker.status.is_terminal()
        {
            tracker.result = result;
            tracker.finish(RequestStatus::Completed, now);
            tracing::info!(request_id, duration_ms = tracker.duration_ms, "completed request");
        }
    }

    /// Mark a tracker as failed with an error message
    pub async fn fail(&self, request_id: &str, error: impl Into<String>) {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        if let Some(tracker) = requests.get_mut(request_id)
            && !tracker.status.is_terminal()
        {
            let error = error.into();
            tracing::error!(request_id, error = %error, "failed request");
            tracker.error = Some(error);
            tracker.finish(RequestStatus::Failed, now);
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<RequestTracker> {
        self.requests.read().await.get(request_id).cloned()
    }

    /// Most recent trackers first, filtered then truncated to `limit`
    pub async fn list(
        &self,
        limit: usize,
        status: Option<RequestStatus>,
        server_name: Option<&str>,
    ) -> Vec<RequestTracker> {
        self.requests
            .read()
            .await
            .values()
            .rev()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| server_name.is_none_or(|s| t.server_name == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn statistics(&self) -> Statistics {
        let requests = self.requests.read().await;

        let mut by_status: BTreeMap<RequestStatus, usize> = RequestStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_server: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_duration = 0.0;
        let mut completed_requests = 0;

        for tracker in requests.values() {
            *by_status.entry(tracker.status).or_default() += 1;
            *by_server.entry(tracker.server_name.clone()).or_default() += 1;

            if tracker.status == RequestStatus::Completed
                && let Some(duration) = tracker.duration_ms
            {
                total_duration += duration;
                completed_requests += 1;
            }
        }

        let average_duration_ms = if completed_requests == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let average = total_duration / completed_requests as f64;
            (average * 100.0).round() / 100.0
        };

        Statistics {
            total_requests: requests.len(),
            by_status,
            by_server,
            average_duration_ms,
            completed_requests,
        }
    }

    /// Drop expired trackers, then the oldest ones while over capacity
    fn evict(&self, requests: &mut IndexMap<String, RequestTracker>) {
        let before = requests.len();

        if let Ok(cutoff) = self.clock.now().checked_sub(self.retention) {
            requests.retain(|_, tracker| tracker.created_at >= cutoff);
        }
        let expired = before - requests.len();

        while requests.len() > self.max_size {
            requests.shift_remove_index(0);
        }

        if expired > 0 {
            tracing::info!(count = expired, "evicted expired requests");
        }
    }
}
