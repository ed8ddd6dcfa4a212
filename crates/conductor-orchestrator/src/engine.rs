use crate::config::ConductorConfig;
use crate::monitor::{QueryMonitor, QueryPhase};
use crate::planner::{Planner, PlanningInput};
use crate::scheduler::Scheduler;
use crate::todo_list::TodoList;
use crate::types::{
    NextTarget, PlannedTask, RunOutcome, RunReport, RunRequest, SchedulerDecision, TaskOutcome,
};
use conductor_a2a::{AgentHandle, AgentRegistry, TaskEvent, TaskRequest, TaskResult, TaskTransport};
use conductor_core::{ConductorError, ConductorResult};
use conductor_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs queries: plan, then loop scheduler decisions until FINISH.
///
/// One `Orchestrator` serves any number of concurrent queries. Each run owns
/// its [`TodoList`]; the agent and tool registries are shared.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    planner: Arc<dyn Planner>,
    scheduler: Scheduler,
    transport: TaskTransport,
    prefer_streaming: bool,
    progress: Option<mpsc::Sender<TaskEvent>>,
    monitor: Arc<QueryMonitor>,
}

/// Mutable state of one query run.
struct QueryRun {
    todo: TodoList,
    decisions: Vec<SchedulerDecision>,
}

/// How a run loop stopped.
enum Stop {
    Finished(String),
    Aborted(String),
    Cancelled,
}

impl Orchestrator {
    /// Orchestrator over shared registries, configured from `config`.
    pub fn new(
        config: &ConductorConfig,
        registry: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        planner: Arc<dyn Planner>,
    ) -> Self {
        Self {
            registry,
            tools,
            planner,
            scheduler: Scheduler::new(config.scheduler.clone()),
            transport: TaskTransport::new(config.transport.request_timeout()),
            prefer_streaming: config.transport.prefer_streaming,
            progress: None,
            monitor: Arc::new(QueryMonitor::with_retention(config.monitor.retain_finished)),
        }
    }

    /// Forward streaming events of every dispatched task to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<TaskEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Share a monitor across several orchestrators.
    pub fn with_monitor(mut self, monitor: Arc<QueryMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Statistics of queries run by this orchestrator.
    pub fn monitor(&self) -> &Arc<QueryMonitor> {
        &self.monitor
    }

    /// The decision function used by every run.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run one query to completion.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let (_keep_open, cancel) = watch::channel(false);
        self.run_with_cancel(request, cancel).await
    }

    /// Run one query on a background task.
    pub fn spawn(self: &Arc<Self>, request: RunRequest) -> QueryHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let request_id = request.request_id.clone();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run_with_cancel(request, cancel_rx).await });
        QueryHandle {
            request_id,
            cancel: CancelToken(Arc::new(cancel_tx)),
            task,
        }
    }

    /// Run one query until FINISH, a fatal error, or `cancel` turning true.
    ///
    /// Tools supplied with the request are visible to its tasks and
    /// invalidated when the run ends, whatever the outcome.
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> RunReport {
        let start = Instant::now();
        info!(
            request_id = %request.request_id,
            username = %request.username,
            query = %request.query,
            "Query started"
        );
        let mut run = QueryRun {
            todo: TodoList::new(request.query.clone()),
            decisions: Vec::new(),
        };
        // A second run under a live request id would share its tool scope.
        if let Err(e) = self.monitor.start(&request.request_id, &request.query).await {
            warn!(request_id = %request.request_id, error = %e, "Duplicate request id refused");
            let summary = self.terminate(&mut run, &e);
            return RunReport {
                request_id: request.request_id,
                outcome: RunOutcome::Aborted,
                summary,
                todo_list: run.todo,
                decisions: run.decisions,
            };
        }
        let stop = self.drive(&request, &mut run, &mut cancel).await;

        if !request.tools.is_empty() {
            self.tools
                .invalidate(&request.username, &request.request_id)
                .await;
        }

        let (outcome, summary) = match stop {
            Stop::Finished(summary) => (RunOutcome::Finished, summary),
            Stop::Aborted(summary) => (RunOutcome::Aborted, summary),
            Stop::Cancelled => {
                let summary = self.scheduler.summarize(&run.todo, Some("Cancelled."));
                (RunOutcome::Cancelled, summary)
            }
        };
        self.monitor
            .finish(&request.request_id, outcome, &run.todo)
            .await;
        info!(
            request_id = %request.request_id,
            outcome = ?outcome,
            statistics = %run.todo.statistics(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query finished"
        );

        RunReport {
            request_id: request.request_id,
            outcome,
            summary,
            todo_list: run.todo,
            decisions: run.decisions,
        }
    }

    async fn drive(
        &self,
        request: &RunRequest,
        run: &mut QueryRun,
        cancel: &mut watch::Receiver<bool>,
    ) -> Stop {
        if !request.tools.is_empty() {
            if let Err(e) = self
                .tools
                .load(request.tools.clone(), &request.username, &request.request_id)
                .await
            {
                return self.abort(run, &e);
            }
        }

        // Initial plan
        let input = PlanningInput {
            original_query: request.query.clone(),
            todo_list: Vec::new(),
            replan_reason: None,
        };
        let planned = tokio::select! {
            _ = cancelled(cancel) => return Stop::Cancelled,
            planned = self.planner.plan(&input) => planned,
        };
        let planned = match planned {
            Ok(tasks) if tasks.is_empty() => {
                return self.abort(run, &ConductorError::Planning("planner returned no tasks".into()))
            }
            Ok(tasks) => tasks,
            Err(e) => return self.abort(run, &e),
        };
        for task in planned {
            if let Err(e) = run.todo.add_task(task.into_task()) {
                return self.abort(run, &e);
            }
        }
        info!(
            request_id = %request.request_id,
            task_count = run.todo.len(),
            "Plan ready"
        );

        let mut outcome: Option<TaskOutcome> = None;
        loop {
            let decision = match self.scheduler.decide(&mut run.todo, outcome.take().as_ref()) {
                Ok(decision) => decision,
                Err(e) => return self.abort(run, &e),
            };
            run.decisions.push(decision.clone());

            if let Some(summary) = decision.summary() {
                return Stop::Finished(summary.to_string());
            }
            let Some(action) = decision.next_action() else {
                let e = ConductorError::Orchestrator("decision without action or summary".into());
                return self.abort(run, &e);
            };

            match &action.next {
                NextTarget::Replan => {
                    self.monitor
                        .observe(&request.request_id, QueryPhase::Replanning, &run.todo)
                        .await;
                    let input = PlanningInput {
                        original_query: request.query.clone(),
                        todo_list: run.todo.compact(),
                        replan_reason: Some(action.context.clone()),
                    };
                    let replanned = tokio::select! {
                        _ = cancelled(cancel) => return Stop::Cancelled,
                        replanned = self.planner.replan(&input) => replanned,
                    };
                    let tasks = match replanned {
                        Ok(tasks) => tasks,
                        Err(e) => return self.abort(run, &e),
                    };
                    let count = tasks.len();
                    let new_tasks = tasks.into_iter().map(PlannedTask::into_task).collect();
                    match run.todo.replace_pending(new_tasks) {
                        Ok(dropped) => info!(
                            request_id = %request.request_id,
                            added = count,
                            dropped,
                            replans = run.todo.replan_count(),
                            "Task list replanned"
                        ),
                        Err(e) => return self.abort(run, &e),
                    }
                }
                NextTarget::Agent(agent) => {
                    let Some(task_id) = action.task_id.clone() else {
                        let e = ConductorError::Orchestrator(format!(
                            "dispatch to '{agent}' without a task id"
                        ));
                        return self.abort(run, &e);
                    };
                    self.monitor
                        .observe(&request.request_id, QueryPhase::Running, &run.todo)
                        .await;

                    let failures = run.todo.get(&task_id).map_or(0, |t| t.failure_count);
                    let delay = self.scheduler.config().retry_delay(failures);
                    if !delay.is_zero() {
                        debug!(task_id = %task_id, delay_ms = delay.as_millis() as u64, "Backing off");
                        tokio::select! {
                            _ = cancelled(cancel) => return Stop::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }

                    let handle = match self.registry.resolve(agent).await {
                        Ok(handle) => handle,
                        Err(e) => return self.abort(run, &e),
                    };
                    let tools = self
                        .tools
                        .lookup(&request.username, &request.request_id)
                        .await;
                    let mut task_request =
                        TaskRequest::new(task_id.clone(), action.task_description.clone())
                            .with_context(action.context.clone())
                            .with_tools(tools);
                    if let Some(session) = &request.session_id {
                        task_request = task_request.with_session(session.clone());
                    }

                    let result = tokio::select! {
                        _ = cancelled(cancel) => {
                            notify_cancel(&handle, &task_id);
                            return Stop::Cancelled;
                        }
                        result = self.dispatch(&handle, &task_request) => result,
                    };
                    outcome = match TaskOutcome::from_result(&task_id, result) {
                        Ok(outcome) => Some(outcome),
                        Err(e) => return self.abort(run, &e),
                    };
                }
            }
        }
    }

    async fn dispatch(
        &self,
        handle: &AgentHandle,
        request: &TaskRequest,
    ) -> ConductorResult<TaskResult> {
        if self.prefer_streaming && handle.supports_streaming() {
            self.transport
                .stream_to_result(handle, request, self.progress.as_ref())
                .await
        } else {
            self.transport.send_sync(handle, request).await
        }
    }

    fn abort(&self, run: &mut QueryRun, error: &ConductorError) -> Stop {
        Stop::Aborted(self.terminate(run, error))
    }

    /// Record the terminal decision for a fatal error and return its summary.
    fn terminate(&self, run: &mut QueryRun, error: &ConductorError) -> String {
        let decision = self.scheduler.terminate(&mut run.todo, error);
        let summary = decision.summary().unwrap_or_default().to_string();
        run.decisions.push(decision);
        summary
    }
}

/// Tell the agent we gave up, without waiting for it.
fn notify_cancel(handle: &AgentHandle, task_id: &str) {
    let connection = Arc::clone(handle.connection());
    let agent = handle.name().to_string();
    warn!(task_id = %task_id, agent = %agent, "In-flight task abandoned");
    let task_id = task_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.cancel(&task_id).await {
            debug!(task_id = %task_id, agent = %agent, error = %e, "Cancel notification failed");
        }
    });
}

/// Resolves once the flag turns true. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A query running on a background task.
pub struct QueryHandle {
    request_id: String,
    cancel: CancelToken,
    task: JoinHandle<RunReport>,
}

/// Cancels one query; cheap to clone and hand to another task.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl CancelToken {
    /// Signal the query to stop. Idempotent.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl QueryHandle {
    /// Id of the running query.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Stop the query. The in-flight call is dropped and its result, if it
    /// ever arrives, is not applied.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this query from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the run has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the report.
    pub async fn join(self) -> ConductorResult<RunReport> {
        self.task
            .await
            .map_err(|e| ConductorError::Orchestrator(format!("query task failed: {e}")))
    }
}
