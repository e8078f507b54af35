use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::checks::{CheckExecutorRegistry, CheckGate, TaskCheckRegistry};
use crate::driver::DriverRegistry;
use crate::executors::{ExecutionContext, ExecutorOutcome, ExecutorRegistry, TaskExecutor};
use crate::models::{
    CoreError, CoreErrorKind, PipelineFind, PipelineId, PipelineStatus, SYSTEM_BOT, Stage,
    StageFind, StageId, Task, TaskCheckRun, TaskCheckRunFind, TaskCheckRunId, TaskCheckRunStatus,
    TaskFind, TaskId, TaskStatus, TaskStatusPatch, TaskType, internal_error, not_found,
};
use crate::orchestration::planner::{PipelineStep, next_step};
use crate::orchestration::{OrchestrationResult, SchedulerConfig, ShutdownToken, TickReport};
use crate::persistence::ControlPlaneStore;

/// Polls the store for runnable work and drives tasks and check runs to a verdict.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn ControlPlaneStore>,
    checks: TaskCheckRegistry,
    executors: ExecutorRegistry,
    check_executors: CheckExecutorRegistry,
    context: ExecutionContext,
    config: SchedulerConfig,
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
    /// Running tasks whose open TaskRun was opened for an attempt that has not
    /// been dispatched yet.
    prepared_runs: Mutex<HashSet<TaskId>>,
    workers: AsyncMutex<JoinSet<()>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum InFlightKey {
    Task(TaskId),
    Check(TaskCheckRunId),
}

/// Holds a task or check run as in flight until dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.key);
    }
}

#[derive(Default)]
struct TickPlan {
    report: TickReport,
    tasks: Vec<(Task, InFlightGuard)>,
    check_runs: Vec<(TaskCheckRun, InFlightGuard)>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        drivers: Arc<DriverRegistry>,
        executors: ExecutorRegistry,
        check_executors: CheckExecutorRegistry,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                checks: TaskCheckRegistry::new(store.clone()),
                context: ExecutionContext::new(store.clone(), drivers),
                store,
                executors,
                check_executors,
                config,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                prepared_runs: Mutex::new(HashSet::new()),
                workers: AsyncMutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn with_defaults(store: Arc<dyn ControlPlaneStore>, config: SchedulerConfig) -> Self {
        Self::new(
            store,
            Arc::new(DriverRegistry::with_defaults()),
            ExecutorRegistry::with_defaults(),
            CheckExecutorRegistry::with_defaults(),
            config,
        )
    }

    /// Runs one planning pass and dispatches what it found. Dispatched work
    /// keeps running after this returns; `drain` waits for it.
    pub async fn tick(&self) -> OrchestrationResult<TickReport> {
        let mut workers = self.inner.workers.lock().await;
        while let Some(joined) = workers.try_join_next() {
            log_worker_exit(joined);
        }

        let inner = self.inner.clone();
        let plan = tokio::task::spawn_blocking(move || inner.plan_tick())
            .await
            .map_err(|join_error| {
                internal_error(format!("scheduler planning join failure: {join_error}"))
            })??;

        let TickPlan {
            mut report,
            tasks,
            check_runs,
        } = plan;
        for (run, guard) in check_runs {
            report.dispatched_checks += 1;
            workers.spawn(run_check(self.inner.clone(), run, guard));
        }
        for (task, guard) in tasks {
            report.dispatched_tasks += 1;
            workers.spawn(run_task(self.inner.clone(), task, guard));
        }
        Ok(report)
    }

    /// Waits for every dispatched task and check run to finish.
    pub async fn drain(&self) {
        let mut workers = self.inner.workers.lock().await;
        while let Some(joined) = workers.join_next().await {
            log_worker_exit(joined);
        }
    }

    pub async fn run(&self, shutdown: ShutdownToken) {
        let mut ticker = interval(self.inner.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.inner.config.interval.as_millis() as u64,
            task_run_timeout_secs = self.inner.config.task_run_timeout.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report != TickReport::default() => {
                            debug!(?report, "scheduler tick");
                        }
                        Ok(_) => {}
                        Err(error) => {
                            error!(
                                kind = ?error.kind,
                                message = %error.message,
                                "scheduler tick failed"
                            );
                        }
                    }
                }
            }
        }

        info!("scheduler stopping; waiting for in-flight work");
        self.drain().await;
    }
}

impl SchedulerInner {
    fn claim(&self, key: InFlightKey) -> Option<InFlightGuard> {
        lock_in_flight(&self.in_flight)
            .insert(key)
            .then(|| InFlightGuard {
                in_flight: self.in_flight.clone(),
                key,
            })
    }

    fn plan_tick(&self) -> OrchestrationResult<TickPlan> {
        let mut plan = TickPlan::default();

        let running_checks = self.checks.list_check_runs(&TaskCheckRunFind {
            status_list: Some(vec![TaskCheckRunStatus::Running]),
            ..TaskCheckRunFind::default()
        })?;
        for run in running_checks {
            if let Some(guard) = self.claim(InFlightKey::Check(run.id)) {
                plan.check_runs.push((run, guard));
            }
        }

        self.sweep_canceled(&mut plan);

        let pipelines = self.store.find_pipelines(&PipelineFind {
            id: None,
            status_list: Some(vec![PipelineStatus::Open]),
        })?;
        for pipeline in pipelines {
            if let Err(error) = self.plan_pipeline(pipeline.id, &mut plan) {
                error!(
                    pipeline_id = %pipeline.id,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to advance pipeline"
                );
            }
        }

        Ok(plan)
    }

    /// Closes Running tasks of canceled pipelines that no worker holds.
    fn sweep_canceled(&self, plan: &mut TickPlan) {
        let running = match self.store.find_tasks(&TaskFind {
            status_list: Some(vec![TaskStatus::Running]),
            pipeline_status_list: Some(vec![PipelineStatus::Canceled]),
            ..TaskFind::default()
        }) {
            Ok(running) => running,
            Err(error) => {
                error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to list running tasks of canceled pipelines"
                );
                return;
            }
        };

        for task in running {
            let Some(_guard) = self.claim(InFlightKey::Task(task.id)) else {
                continue;
            };
            lock_prepared(&self.prepared_runs).remove(&task.id);
            let patch = TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Canceled)
                .comment("pipeline canceled");
            match self.store.patch_task_status(&patch) {
                Ok(_) => {
                    plan.report.canceled_tasks += 1;
                    info!(
                        task_id = %task.id,
                        pipeline_id = %task.pipeline_id,
                        "canceled running task of canceled pipeline"
                    );
                }
                Err(error) => {
                    warn!(
                        task_id = %task.id,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to cancel running task"
                    );
                }
            }
        }
    }

    fn plan_pipeline(
        &self,
        pipeline_id: PipelineId,
        plan: &mut TickPlan,
    ) -> OrchestrationResult<()> {
        let stages = self.store.find_stages(&StageFind {
            id: None,
            pipeline_id: Some(pipeline_id),
        })?;
        let tasks = self.store.find_tasks(&TaskFind {
            pipeline_id: Some(pipeline_id),
            ..TaskFind::default()
        })?;

        let mut by_stage: HashMap<StageId, Vec<Task>> = HashMap::new();
        for task in tasks {
            by_stage.entry(task.stage_id).or_default().push(task);
        }
        let grouped: Vec<(Stage, Vec<Task>)> = stages
            .into_iter()
            .map(|stage| {
                let tasks = by_stage.remove(&stage.id).unwrap_or_default();
                (stage, tasks)
            })
            .collect();

        match next_step(&grouped) {
            PipelineStep::Complete => {
                if self.store.complete_pipeline(pipeline_id, SYSTEM_BOT)? {
                    plan.report.completed_pipelines += 1;
                    info!(pipeline_id = %pipeline_id, "pipeline finished");
                }
            }
            PipelineStep::Stalled { stage_id, status } => {
                debug!(
                    pipeline_id = %pipeline_id,
                    stage_id = %stage_id,
                    status = ?status,
                    "pipeline stage cannot progress"
                );
            }
            PipelineStep::Active(active) => {
                for task in active.running {
                    let Some(guard) = self.claim(InFlightKey::Task(task.id)) else {
                        continue;
                    };
                    match self.next_attempt(task) {
                        Ok(task) => plan.tasks.push((task, guard)),
                        Err(error) => {
                            error!(
                                pipeline_id = %pipeline_id,
                                kind = ?error.kind,
                                message = %error.message,
                                "failed to open task attempt"
                            );
                        }
                    }
                }
                for task in active.startable {
                    let task_id = task.id;
                    if let Err(error) = self.start_task(task, plan) {
                        error!(
                            task_id = %task_id,
                            pipeline_id = %pipeline_id,
                            kind = ?error.kind,
                            message = %error.message,
                            "failed to start task"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-dispatches a Running task. A run opened by a Retry verdict is used
    /// as is; any other open run belongs to an attempt that never reported a
    /// verdict, such as one cut short by a restart, and is closed first.
    fn next_attempt(&self, task: Task) -> OrchestrationResult<Task> {
        if lock_prepared(&self.prepared_runs).remove(&task.id) {
            return Ok(task);
        }
        let patch = TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running)
            .comment("attempt ended without a verdict");
        let task = self.store.patch_task_status(&patch)?;
        info!(task_id = %task.id, "reopened interrupted task attempt");
        Ok(task)
    }

    fn start_task(&self, task: Task, plan: &mut TickPlan) -> OrchestrationResult<()> {
        match self.checks.check_gate(&task)? {
            CheckGate::Passed => {}
            CheckGate::Pending { waiting_on } => {
                plan.report.gated_tasks += 1;
                debug!(task_id = %task.id, waiting_on = ?waiting_on, "task waiting on checks");
                return Ok(());
            }
            CheckGate::Blocked { check_type, reason } => {
                plan.report.gated_tasks += 1;
                debug!(
                    task_id = %task.id,
                    check_type = check_type.as_str(),
                    reason = %reason,
                    "task blocked by check"
                );
                return Ok(());
            }
        }

        let Some(guard) = self.claim(InFlightKey::Task(task.id)) else {
            return Ok(());
        };
        let started = self
            .store
            .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running))?;
        plan.report.started_tasks += 1;
        info!(
            task_id = %started.id,
            task_type = started.task_type.as_str(),
            "task started"
        );
        plan.tasks.push((started, guard));
        Ok(())
    }

    fn record_outcome(&self, task_id: TaskId, outcome: ExecutorOutcome) -> OrchestrationResult<()> {
        let patch = match outcome {
            ExecutorOutcome::Success => TaskStatusPatch::new(task_id, SYSTEM_BOT, TaskStatus::Done),
            ExecutorOutcome::PermanentFailure(error) => {
                let result = json!({
                    "kind": format!("{:?}", error.kind),
                    "message": &error.message,
                });
                TaskStatusPatch {
                    id: task_id,
                    updater_id: SYSTEM_BOT,
                    status: TaskStatus::Failed,
                    comment: Some(error.message),
                    result: Some(result),
                }
            }
            ExecutorOutcome::Retry { reason } => {
                if self.pipeline_canceled(task_id)? {
                    TaskStatusPatch::new(task_id, SYSTEM_BOT, TaskStatus::Canceled)
                        .comment("pipeline canceled")
                } else {
                    TaskStatusPatch {
                        id: task_id,
                        updater_id: SYSTEM_BOT,
                        status: TaskStatus::Running,
                        result: Some(json!({ "kind": "Transient", "retry": true })),
                        comment: Some(reason),
                    }
                }
            }
        };

        match self.store.patch_task_status(&patch) {
            Ok(task) if task.status == TaskStatus::Running => {
                lock_prepared(&self.prepared_runs).insert(task.id);
                info!(
                    task_id = %task.id,
                    reason = patch.comment.as_deref().unwrap_or_default(),
                    "task attempt will be retried"
                );
                Ok(())
            }
            Ok(task) => {
                info!(
                    task_id = %task.id,
                    status = task.status.as_str(),
                    comment = patch.comment.as_deref().unwrap_or_default(),
                    "task finished"
                );
                Ok(())
            }
            Err(error) if error.kind == CoreErrorKind::InvalidTransition => {
                warn!(
                    task_id = %task_id,
                    verdict = patch.status.as_str(),
                    message = %error.message,
                    "discarding verdict for task that already left running"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn pipeline_canceled(&self, task_id: TaskId) -> OrchestrationResult<bool> {
        let task = find_task(self.store.as_ref(), task_id)?;
        let pipeline = self
            .store
            .find_pipelines(&PipelineFind {
                id: Some(task.pipeline_id),
                status_list: None,
            })?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(format!("pipeline {} not found", task.pipeline_id)))?;
        Ok(pipeline.status == PipelineStatus::Canceled)
    }

    fn perform_check(&self, run: &TaskCheckRun) -> OrchestrationResult<()> {
        let task = find_task(self.store.as_ref(), run.task_id)?;
        let verdict = match self.check_executors.get(run.check_type) {
            Some(executor) => executor.run(&self.context, &task),
            None => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!(
                    "no check executor is registered for '{}'",
                    run.check_type.as_str()
                ),
            )),
        };

        let completed = match verdict {
            Ok(result) => self.checks.complete_check_run(
                run.id,
                TaskCheckRunStatus::Done,
                "",
                Some(result),
                SYSTEM_BOT,
            )?,
            Err(error) => self.checks.complete_check_run(
                run.id,
                TaskCheckRunStatus::Failed,
                error.message,
                None,
                SYSTEM_BOT,
            )?,
        };
        debug!(
            task_id = %completed.task_id,
            check_run_id = %completed.id,
            check_type = completed.check_type.as_str(),
            status = completed.status.as_str(),
            "task check finished"
        );
        Ok(())
    }

    async fn apply_outcome(
        self: &Arc<Self>,
        task_id: TaskId,
        task_type: TaskType,
        outcome: ExecutorOutcome,
    ) {
        let inner = self.clone();
        let applied =
            tokio::task::spawn_blocking(move || inner.record_outcome(task_id, outcome)).await;
        let error = match applied {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(join_error) => internal_error(format!("task verdict join failure: {join_error}")),
        }
        .attribute(task_id, task_type);
        error!(
            task_id = %task_id,
            task_type = task_type.as_str(),
            kind = ?error.kind,
            message = %error.message,
            "failed to record task verdict"
        );
    }
}

async fn run_task(inner: Arc<SchedulerInner>, task: Task, guard: InFlightGuard) {
    let _guard = guard;
    let task_id = task.id;
    let task_type = task.task_type;

    let Some(executor) = inner.executors.get(task_type) else {
        let error = CoreError::new(
            CoreErrorKind::InvalidInput,
            format!(
                "no executor is registered for task type '{}'",
                task_type.as_str()
            ),
        );
        inner
            .apply_outcome(task_id, task_type, ExecutorOutcome::PermanentFailure(error))
            .await;
        return;
    };

    let context = inner.context.clone();
    let mut attempt = tokio::task::spawn_blocking(move || {
        execute_attempt(&context, executor.as_ref(), &task)
    });

    let joined = match timeout(inner.config.task_run_timeout, &mut attempt).await {
        Ok(joined) => joined,
        Err(_) => {
            let error = CoreError::new(
                CoreErrorKind::Timeout,
                format!(
                    "task execution timed out after {:?}",
                    inner.config.task_run_timeout
                ),
            );
            inner
                .apply_outcome(task_id, task_type, ExecutorOutcome::PermanentFailure(error))
                .await;
            // Stay in flight until the blocking call really returns.
            attempt.await
        }
    };

    let outcome = match joined {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return,
        Err(join_error) => ExecutorOutcome::PermanentFailure(internal_error(format!(
            "task executor join failure: {join_error}"
        ))),
    };
    inner.apply_outcome(task_id, task_type, outcome).await;
}

/// Runs the executor unless the task left Running since it was dispatched.
fn execute_attempt(
    context: &ExecutionContext,
    executor: &dyn TaskExecutor,
    task: &Task,
) -> Option<ExecutorOutcome> {
    match find_task(context.store.as_ref(), task.id) {
        Ok(current) if current.status == TaskStatus::Running => {}
        Ok(current) => {
            debug!(
                task_id = %task.id,
                status = current.status.as_str(),
                "task is no longer running; skipping attempt"
            );
            return None;
        }
        Err(error) => {
            return Some(ExecutorOutcome::Retry {
                reason: error.message,
            });
        }
    }
    Some(executor.run_once(context, task))
}

async fn run_check(inner: Arc<SchedulerInner>, run: TaskCheckRun, guard: InFlightGuard) {
    let _guard = guard;
    let run_id = run.id;
    let task_id = run.task_id;
    let check_type = run.check_type;

    let worker = inner.clone();
    let joined = tokio::task::spawn_blocking(move || worker.perform_check(&run)).await;
    let error = match joined {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(join_error) => internal_error(format!("task check join failure: {join_error}")),
    };
    error!(
        task_id = %task_id,
        check_run_id = %run_id,
        check_type = check_type.as_str(),
        kind = ?error.kind,
        message = %error.message,
        "failed to complete task check"
    );
}

fn find_task(store: &dyn ControlPlaneStore, task_id: TaskId) -> OrchestrationResult<Task> {
    store
        .find_tasks(&TaskFind {
            id: Some(task_id),
            ..TaskFind::default()
        })?
        .into_iter()
        .next()
        .ok_or_else(|| not_found(format!("task {task_id} not found")))
}

fn lock_in_flight(
    in_flight: &Mutex<HashSet<InFlightKey>>,
) -> MutexGuard<'_, HashSet<InFlightKey>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_prepared(prepared: &Mutex<HashSet<TaskId>>) -> MutexGuard<'_, HashSet<TaskId>> {
    prepared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_worker_exit(joined: Result<(), JoinError>) {
    if let Err(join_error) = joined {
        error!(message = %join_error, "scheduler worker ended abnormally");
    }
}
