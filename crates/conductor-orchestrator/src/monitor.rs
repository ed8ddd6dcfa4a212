use crate::config::MonitorConfig;
use crate::todo_list::{TodoList, TodoStatistics};
use crate::types::RunOutcome;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Lifecycle of a query as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    /// Waiting for the initial plan.
    Planning,
    /// Dispatching tasks.
    Running,
    /// Waiting for a revised plan.
    Replanning,
    /// Ended with the given outcome.
    Done(RunOutcome),
}

/// Read-only view of one query's progress.
#[derive(Debug, Clone, Serialize)]
pub struct QueryState {
    /// Id of the query.
    pub request_id: String,
    /// The originating query.
    pub query: String,
    /// Where the query is.
    pub phase: QueryPhase,
    /// Task counts at the last observation.
    pub statistics: TodoStatistics,
    /// Task currently dispatched, with its agent.
    pub current_task: Option<(String, String)>,
    /// When the query started.
    pub started_at: DateTime<Utc>,
    /// Last observation.
    pub updated_at: DateTime<Utc>,
}

/// Tracks every query the orchestrator is running or has run.
///
/// Statistics are a diagnostic surface only; nothing in the scheduling loop
/// reads them back.
///
/// At most `retain_finished` finished queries are kept; finishing one more
/// evicts the least recently updated finished query.
pub struct QueryMonitor {
    queries: Arc<RwLock<HashMap<String, QueryState>>>,
    retain_finished: usize,
}

impl QueryMonitor {
    /// Monitor keeping the default number of finished queries.
    pub fn new() -> Self {
        Self::with_retention(MonitorConfig::default().retain_finished)
    }

    /// Monitor keeping at most `retain_finished` finished queries.
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            queries: Arc::new(RwLock::new(HashMap::new())),
            retain_finished,
        }
    }

    /// Register a new query in the planning phase.
    ///
    /// Fails if a query with the same id is still running. A finished entry
    /// with that id is replaced.
    pub async fn start(&self, request_id: &str, query: &str) -> ConductorResult<()> {
        let now = Utc::now();
        let mut queries = self.queries.write().await;
        if queries
            .get(request_id)
            .is_some_and(|s| !matches!(s.phase, QueryPhase::Done(_)))
        {
            return Err(ConductorError::Orchestrator(format!(
                "query '{request_id}' is already running"
            )));
        }
        queries.insert(
            request_id.to_string(),
            QueryState {
                request_id: request_id.to_string(),
                query: query.to_string(),
                phase: QueryPhase::Planning,
                statistics: TodoStatistics::default(),
                current_task: None,
                started_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    /// Refresh statistics and the in-flight task from the list.
    pub async fn observe(&self, request_id: &str, phase: QueryPhase, todo: &TodoList) {
        let mut queries = self.queries.write().await;
        if let Some(state) = queries.get_mut(request_id) {
            state.phase = phase;
            state.statistics = todo.statistics();
            state.current_task = todo
                .in_progress()
                .map(|t| (t.id.clone(), t.assigned_agent.clone()));
            state.updated_at = Utc::now();
        }
    }

    /// Mark a query done and evict finished queries beyond the retention.
    pub async fn finish(&self, request_id: &str, outcome: RunOutcome, todo: &TodoList) {
        self.observe(request_id, QueryPhase::Done(outcome), todo).await;

        let mut queries = self.queries.write().await;
        let mut finished: Vec<(DateTime<Utc>, String)> = queries
            .values()
            .filter(|s| matches!(s.phase, QueryPhase::Done(_)))
            .map(|s| (s.updated_at, s.request_id.clone()))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.retain_finished;
        for (_, id) in finished.into_iter().take(excess) {
            queries.remove(&id);
        }
        debug!(evicted = excess, "Finished queries evicted from monitor");
    }

    /// Whether a query with this id has started and not yet finished.
    pub async fn is_active(&self, request_id: &str) -> bool {
        self.queries
            .read()
            .await
            .get(request_id)
            .is_some_and(|s| !matches!(s.phase, QueryPhase::Done(_)))
    }

    /// State of one query, if still tracked.
    pub async fn get(&self, request_id: &str) -> Option<QueryState> {
        self.queries.read().await.get(request_id).cloned()
    }

    /// All queries, oldest first.
    pub async fn snapshot(&self) -> Vec<QueryState> {
        let mut states: Vec<_> = self.queries.read().await.values().cloned().collect();
        states.sort_by_key(|s| s.started_at);
        states
    }

    /// Queries that have not reached a final phase.
    pub async fn active_count(&self) -> usize {
        self.queries
            .read()
            .await
            .values()
            .filter(|s| !matches!(s.phase, QueryPhase::Done(_)))
            .count()
    }

    /// Forget finished queries. Returns how many were removed.
    pub async fn prune_finished(&self) -> usize {
        let mut queries = self.queries.write().await;
        let before = queries.len();
        queries.retain(|_, s| !matches!(s.phase, QueryPhase::Done(_)));
        before - queries.len()
    }

    /// Sum of task counts across all queries.
    pub async fn aggregate(&self) -> TodoStatistics {
        let queries = self.queries.read().await;
        let mut total = TodoStatistics::default();
        for state in queries.values() {
            let s = state.statistics;
            total.total += s.total;
            total.pending += s.pending;
            total.in_progress += s.in_progress;
            total.completed += s.completed;
            total.failed += s.failed;
            total.with_failures += s.with_failures;
        }
        total
    }

    /// Serialize the current state as JSON (for dashboards).
    pub async fn to_json(&self) -> serde_json::Value {
        let queries = self.snapshot().await;
        let aggregate = self.aggregate().await;
        serde_json::json!({
            "queries": queries,
            "aggregate": aggregate,
        })
    }
}

impl Default for QueryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
