#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Whole-query runs against scripted in-process agents and a scripted planner.

use async_trait::async_trait;
use conductor_a2a::{
    AgentConnection, AgentDescriptor, AgentExecutor, AgentRegistry, LocalConnection, TaskEvent,
    TaskEventKind, TaskRequest, TaskResult, TaskState, TaskSubscription,
};
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use conductor_orchestrator::*;
use conductor_tools::{ToolDescriptor, ToolRegistry};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

enum Reply {
    Ok(&'static str),
    Fail(&'static str),
    Transport(&'static str),
    Malformed,
}

/// Plays back a fixed list of replies, then answers "done".
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<TaskRequest>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    fn sharing_counters(
        replies: Vec<Reply>,
        in_flight: &Arc<AtomicUsize>,
        max: &Arc<AtomicUsize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            in_flight: Arc::clone(in_flight),
            max_in_flight: Arc::clone(max),
        })
    }

    fn requests(&self) -> Vec<TaskRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for Scripted {
    async fn execute(&self, request: &TaskRequest) -> ConductorResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        let reply = self.replies.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            None => Ok("done".into()),
            Some(Reply::Ok(text)) => Ok(text.into()),
            Some(Reply::Fail(reason)) => Err(ConductorError::AgentFailure(reason.into())),
            Some(Reply::Transport(msg)) => Err(ConductorError::Transport(msg.into())),
            Some(Reply::Malformed) => Err(ConductorError::MalformedResult("no status".into())),
        }
    }
}

/// Never answers; records whether it was told to cancel.
struct Hanging {
    started: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl AgentConnection for Hanging {
    fn endpoint(&self) -> &str {
        "test://hanging"
    }

    async fn send(&self, _request: &TaskRequest) -> ConductorResult<TaskResult> {
        self.started.notify_one();
        std::future::pending().await
    }

    async fn subscribe(&self, _request: &TaskRequest) -> ConductorResult<TaskSubscription> {
        Err(ConductorError::Transport("streaming not supported".into()))
    }

    async fn cancel(&self, _task_id: &str) -> ConductorResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a stream, reports `working` once, then goes quiet with the stream open.
#[derive(Default)]
struct Stalling {
    subscriptions: AtomicUsize,
}

#[async_trait]
impl AgentConnection for Stalling {
    fn endpoint(&self) -> &str {
        "test://stalling"
    }

    async fn send(&self, _request: &TaskRequest) -> ConductorResult<TaskResult> {
        std::future::pending().await
    }

    async fn subscribe(&self, request: &TaskRequest) -> ConductorResult<TaskSubscription> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        let task_id = request.task_id.clone();
        let producer = tokio::spawn(async move {
            let _ = tx
                .send(TaskEvent::new(
                    task_id,
                    "quiet",
                    TaskEventKind::Status {
                        state: TaskState::Working,
                        message: None,
                    },
                ))
                .await;
            std::future::pending::<()>().await;
        });
        Ok(TaskSubscription::new(request.task_id.clone(), "quiet", rx, producer))
    }
}

async fn registry(agents: Vec<(&str, Arc<Scripted>, bool)>) -> Arc<AgentRegistry> {
    let registry = AgentRegistry::new();
    for (name, executor, streaming) in agents {
        let descriptor =
            AgentDescriptor::new(name, format!("local://{name}")).with_streaming(streaming);
        registry
            .register(descriptor, Arc::new(LocalConnection::new(name, executor)))
            .await
            .unwrap();
    }
    Arc::new(registry)
}

fn config(max_failures: u32) -> ConductorConfig {
    ConductorConfig::from_toml_str(&format!("[scheduler]\nmax_failures = {max_failures}\n"))
        .unwrap()
}

fn orchestrator(
    config: &ConductorConfig,
    registry: Arc<AgentRegistry>,
    planner: StaticPlanner,
) -> Orchestrator {
    Orchestrator::new(config, registry, Arc::new(ToolRegistry::new()), Arc::new(planner))
}

fn planned(id: &str, agent: &str, description: &str) -> PlannedTask {
    PlannedTask {
        id: Some(id.into()),
        description: description.into(),
        agent: agent.into(),
    }
}

// ---------------------------------------------------------------------------
// 1. Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_tasks_dispatch_in_order_then_finish() {
    let flights = Scripted::new(vec![Reply::Ok("3 flights found")]);
    let hotels = Scripted::new(vec![Reply::Ok("hotel booked")]);
    let writer = Scripted::new(vec![Reply::Ok("itinerary written")]);
    let registry = registry(vec![
        ("flights", Arc::clone(&flights), false),
        ("hotels", Arc::clone(&hotels), false),
        ("writer", Arc::clone(&writer), false),
    ])
    .await;
    let planner = StaticPlanner::new(vec![
        planned("t1", "flights", "Find flights"),
        planned("t2", "hotels", "Book a hotel"),
        planned("t3", "writer", "Write the itinerary"),
    ]);

    let report = orchestrator(&config(3), registry, planner)
        .run(RunRequest::new("Plan a trip to Lisbon", "alice").with_session("s-1"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert!(report.summary.starts_with("3/3 tasks completed, 0 failed"));
    assert_eq!(report.decisions.len(), 4);
    let targets: Vec<_> = report
        .decisions
        .iter()
        .filter_map(|d| d.dispatch_target())
        .collect();
    assert_eq!(targets, vec!["flights", "hotels", "writer"]);
    assert!(report.decisions[3].is_finish());

    let last = &writer.requests()[0];
    assert_eq!(last.task_id, "t3");
    assert_eq!(last.session_id.as_deref(), Some("s-1"));
    assert_eq!(
        last.context,
        "[t1] flights: 3 flights found\n[t2] hotels: hotel booked"
    );
    assert!(report.todo_list.is_exhausted());
}

// ---------------------------------------------------------------------------
// 2. Retry, permanent failure and replan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_threshold_triggers_replan() {
    let flaky = Scripted::new(vec![Reply::Transport("timeout"), Reply::Fail("no data")]);
    let backup = Scripted::new(vec![Reply::Ok("data from backup")]);
    let registry = registry(vec![
        ("flaky", Arc::clone(&flaky), false),
        ("backup", Arc::clone(&backup), false),
    ])
    .await;
    let planner = StaticPlanner::new(vec![planned("t1", "flaky", "Fetch data")])
        .then_replan(vec![planned("t2", "backup", "Fetch data elsewhere")]);

    let report = orchestrator(&config(2), registry, planner)
        .run(RunRequest::new("analyse", "bob"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert_eq!(flaky.requests().len(), 2);

    let d = &report.decisions;
    assert_eq!(d.len(), 5);
    // Retry: same task, back to pending with one failure.
    let retry = d[1].task_update().unwrap();
    assert_eq!((retry.status, retry.failure_count), (TaskStatus::Pending, 1));
    assert_eq!(d[1].next_action().unwrap().task_id.as_deref(), Some("t1"));
    // Threshold reached: failed and replan requested.
    assert!(d[2].is_replan());
    let failed = d[2].task_update().unwrap();
    assert_eq!((failed.status, failed.failure_count), (TaskStatus::Failed, 2));
    assert!(d[2].next_action().unwrap().context.contains("no data"));
    assert_eq!(d[3].dispatch_target(), Some("backup"));

    let t1 = report.todo_list.get("t1").unwrap();
    assert_eq!(t1.last_failure_kind, Some(FailureKind::AgentReported));
    assert_eq!(report.todo_list.replan_count(), 1);
    assert!(report.summary.starts_with("1/2 tasks completed, 1 failed"));
}

#[tokio::test]
async fn malformed_replies_count_as_failures() {
    let garbled = Scripted::new(vec![Reply::Malformed, Reply::Ok("fine now")]);
    let registry = registry(vec![("garbled", Arc::clone(&garbled), false)]).await;
    let planner = StaticPlanner::new(vec![planned("t1", "garbled", "Parse")]);

    let report = orchestrator(&config(3), registry, planner)
        .run(RunRequest::new("q", "carol"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    let t1 = report.todo_list.get("t1").unwrap();
    assert_eq!(t1.status, TaskStatus::Completed);
    assert_eq!(t1.failure_count, 1);
    assert_eq!(t1.last_failure_kind, Some(FailureKind::Malformed));
}

#[tokio::test]
async fn replan_budget_exhausted_finishes_with_report() {
    let broken = Scripted::new(vec![Reply::Fail("down"), Reply::Fail("down")]);
    let registry = registry(vec![("broken", Arc::clone(&broken), false)]).await;
    let planner = StaticPlanner::new(vec![
        planned("t1", "broken", "Try"),
        planned("t2", "broken", "Never reached"),
    ])
    .then_replan(vec![planned("t3", "broken", "Try again")]);
    let mut config = config(1);
    config.scheduler.max_replans = 1;

    let report = orchestrator(&config, registry, planner)
        .run(RunRequest::new("q", "dave"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert!(report
        .summary
        .starts_with("Replan limit reached after 1 replans; task t3 could not be completed."));
    let ids: Vec<_> = report.todo_list.tasks().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t3"]);
}

#[tokio::test]
async fn empty_replan_finishes_with_what_it_has() {
    let ok = Scripted::new(vec![Reply::Ok("part one")]);
    let broken = Scripted::new(vec![Reply::Fail("down")]);
    let registry = registry(vec![
        ("ok", Arc::clone(&ok), false),
        ("broken", Arc::clone(&broken), false),
    ])
    .await;
    let planner = StaticPlanner::new(vec![
        planned("t1", "ok", "One"),
        planned("t2", "broken", "Two"),
        planned("t3", "ok", "Three"),
    ]);

    let report = orchestrator(&config(1), registry, planner)
        .run(RunRequest::new("q", "erin"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert!(report.summary.starts_with("1/2 tasks completed, 1 failed"));
    assert!(report.todo_list.get("t3").is_none());
}

// ---------------------------------------------------------------------------
// 3. Fatal errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_agent_aborts_without_retry() {
    let registry = registry(vec![]).await;
    let planner = StaticPlanner::new(vec![planned("t1", "ghost", "Haunt")]);

    let report = orchestrator(&config(3), registry, planner)
        .run(RunRequest::new("q", "frank"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert!(report.summary.starts_with("Aborted: Not found: agent 'ghost'"));
    assert_eq!(report.decisions.len(), 2);
    let t1 = report.todo_list.get("t1").unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    assert_eq!(t1.failure_count, 0);
    assert!(matches!(
        report.into_result(),
        Err(ConductorError::Orchestrator(_))
    ));
}

// ---------------------------------------------------------------------------
// 4. Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_queries_keep_counts_monotonic() {
    let a = Scripted::new(vec![Reply::Fail("x"), Reply::Ok("a")]);
    let b = Scripted::new(vec![Reply::Transport("y"), Reply::Transport("y"), Reply::Ok("b")]);
    let registry = registry(vec![("a", a, false), ("b", b, false)]).await;
    let planner = StaticPlanner::new(vec![
        planned("t1", "a", "one"),
        planned("t2", "b", "two"),
        planned("t3", "a", "three"),
    ]);

    let orch = Arc::new(orchestrator(&config(5), registry, planner));
    let handles: Vec<_> = (0..4)
        .map(|i| orch.spawn(RunRequest::new("q", format!("user-{i}"))))
        .collect();
    for handle in handles {
        let report = handle.join().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.todo_list.statistics().completed, 3);

        let mut last: HashMap<String, u32> = HashMap::new();
        for update in report.decisions.iter().filter_map(|d| d.task_update()) {
            let prev = last.insert(update.task_id.clone(), update.failure_count);
            assert!(prev.unwrap_or(0) <= update.failure_count);
        }
    }
    assert_eq!(orch.monitor().active_count().await, 0);
}

#[tokio::test]
async fn single_query_never_overlaps_dispatches() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max = Arc::new(AtomicUsize::new(0));
    let a = Scripted::sharing_counters(vec![], &in_flight, &max);
    let b = Scripted::sharing_counters(vec![], &in_flight, &max);
    let registry = registry(vec![("a", a, false), ("b", b, false)]).await;
    let planner = StaticPlanner::new(
        (0..6)
            .map(|i| planned(&format!("t{i}"), if i % 2 == 0 { "a" } else { "b" }, "step"))
            .collect(),
    );

    let report = orchestrator(&config(2), registry, planner)
        .run(RunRequest::new("q", "gina"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert_eq!(max.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// 5. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_drops_in_flight_call_and_notifies_agent() {
    let started = Arc::new(Notify::new());
    let cancelled = Arc::new(AtomicBool::new(false));
    let registry = AgentRegistry::new();
    registry
        .register(
            AgentDescriptor::new("slow", "test://hanging"),
            Arc::new(Hanging {
                started: Arc::clone(&started),
                cancelled: Arc::clone(&cancelled),
            }),
        )
        .await
        .unwrap();
    let planner = StaticPlanner::new(vec![planned("t1", "slow", "Take forever")]);
    let orch = Arc::new(orchestrator(&config(3), Arc::new(registry), planner));

    let handle = orch.spawn(RunRequest::new("q", "hank").with_request_id("r-cancel"));
    started.notified().await;
    handle.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("cancelled run should end promptly")
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.summary.starts_with("Cancelled."));
    // Nothing was applied for the abandoned attempt.
    let t1 = report.todo_list.get("t1").unwrap();
    assert_eq!(t1.status, TaskStatus::InProgress);
    assert_eq!(t1.failure_count, 0);

    for _ in 0..50 {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cancelled.load(Ordering::SeqCst));

    let state = orch.monitor().get("r-cancel").await.unwrap();
    assert_eq!(state.phase, QueryPhase::Done(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_retry_backoff() {
    let flaky = Scripted::new(vec![Reply::Transport("refused")]);
    let registry = registry(vec![("flaky", Arc::clone(&flaky), false)]).await;
    let planner = StaticPlanner::new(vec![planned("t1", "flaky", "Try")]);
    let mut config = config(3);
    config.scheduler = config.scheduler.with_backoff(60_000, 60_000);
    let orch = Arc::new(orchestrator(&config, registry, planner));

    let handle = orch.spawn(RunRequest::new("q", "ivy"));
    while flaky.requests().is_empty() {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel();
    let report = handle.join().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(flaky.requests().len(), 1);
    assert_eq!(report.todo_list.get("t1").unwrap().failure_count, 1);
}

// ---------------------------------------------------------------------------
// 6. Tools and progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_tools_reach_agents_and_are_invalidated() {
    let agent = Scripted::new(vec![]);
    let registry = registry(vec![("agent", Arc::clone(&agent), false)]).await;
    let tools = Arc::new(ToolRegistry::with_system_tools(vec![ToolDescriptor::new(
        "web_search",
    )]));
    let planner = StaticPlanner::new(vec![planned("t1", "agent", "Use tools")]);
    let orch = Orchestrator::new(&config(3), registry, Arc::clone(&tools), Arc::new(planner));

    let request = RunRequest::new("q", "jack")
        .with_request_id("r-tools")
        .with_tools(vec![ToolDescriptor::new("calendar")]);
    let report = orch.run(request).await;

    assert_eq!(report.outcome, RunOutcome::Finished);
    let names: Vec<_> = agent.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(names, vec!["calendar", "web_search"]);
    assert!(tools.cached_scopes().await.is_empty());
}

#[tokio::test]
async fn streaming_agents_report_progress() {
    let agent = Scripted::new(vec![Reply::Ok("streamed answer")]);
    let registry = registry(vec![("streamer", Arc::clone(&agent), true)]).await;
    let planner = StaticPlanner::new(vec![planned("t1", "streamer", "Stream it")]);
    let mut config = config(3);
    config.transport.prefer_streaming = true;
    let (tx, mut rx) = mpsc::channel::<TaskEvent>(32);
    let orch = orchestrator(&config, registry, planner).with_progress(tx);

    let report = orch.run(RunRequest::new("q", "kim")).await;
    drop(orch);

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert_eq!(
        report.todo_list.get("t1").unwrap().result.as_deref(),
        Some("streamed answer")
    );

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events.iter().all(|e| e.task_id == "t1" && e.agent == "streamer"));
    assert!(events
        .iter()
        .any(|e| matches!(&e.kind, TaskEventKind::ArtifactChunk { text, .. } if text == "streamed answer")));
    assert!(matches!(
        events.last().unwrap().kind,
        TaskEventKind::Completed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn silent_stream_times_out_and_is_retried() {
    let quiet = Arc::new(Stalling::default());
    let registry = AgentRegistry::new();
    registry
        .register(
            AgentDescriptor::new("quiet", "test://stalling").with_streaming(true),
            Arc::clone(&quiet) as Arc<dyn AgentConnection>,
        )
        .await
        .unwrap();
    let planner = StaticPlanner::new(vec![planned("t1", "quiet", "Think quietly")]);
    let mut config = config(2);
    config.transport.request_timeout_secs = 5;
    config.transport.prefer_streaming = true;
    let orch = orchestrator(&config, Arc::new(registry), planner);

    let report = tokio::time::timeout(
        Duration::from_secs(3600),
        orch.run(RunRequest::new("q", "lena")),
    )
    .await
    .expect("an idle stream must not stall the query");

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert_eq!(quiet.subscriptions.load(Ordering::SeqCst), 2);
    let t1 = report.todo_list.get("t1").unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    assert_eq!(t1.failure_count, 2);
    assert_eq!(t1.last_failure_kind, Some(FailureKind::Transport));
}
