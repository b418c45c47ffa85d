//! Task execution
//!
//! A task runs the steps of one pipeline in order against its own config.
//! The snapshot is persisted under `tasks/<id>` before and after every
//! step; the step statuses are the record of progress and failure. A
//! failed or cancelled task is resumed with [`Task::resume`], which keeps
//! the steps that already succeeded and re-runs the rest.

use chrono::Utc;
use skiff_core::domain::task::{Status, StepStatus, TaskSnapshot};
use skiff_runner::{RunnerError, TaskOutput};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::ClusterState;
use crate::config::Config;
use crate::repository::{log_repository, task_repository};
use crate::steps::{Services, Step, StepContext, StepError};
use crate::store::{Store, StoreError};
use crate::workflow::Pipeline;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("cancelled during step {step}")]
    Cancelled { step: String },

    #[error("task cannot be restarted: {0}")]
    InvalidState(String),

    #[error("failed to rebuild runner: {0}")]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task {0} aborted: {1}")]
    Aborted(Uuid, String),
}

/// Final state of a task run
#[derive(Debug)]
pub struct TaskOutcome {
    pub snapshot: TaskSnapshot<Config>,
    pub result: Result<(), TaskError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Running task, as seen by whoever launched it
pub struct TaskHandle {
    pub id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    /// Requests cancellation; the current step winds down and the task
    /// persists it as cancelled
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<TaskOutcome, TaskError> {
        self.join
            .await
            .map_err(|e| TaskError::Aborted(self.id, e.to_string()))
    }
}

pub struct Task {
    services: Arc<Services>,
    cluster: Arc<ClusterState>,
    pipeline: Pipeline,
    snapshot: TaskSnapshot<Config>,
    /// Index of the first step to run
    start: usize,
    out: TaskOutput,
    cancel: CancellationToken,
}

/// Snapshot of a task that has not run yet
pub fn new_snapshot(pipeline: &Pipeline, config: Config) -> TaskSnapshot<Config> {
    TaskSnapshot {
        id: config.task_id,
        pipeline: pipeline.name().to_string(),
        cluster_id: config.cluster_id,
        created_at: Utc::now(),
        attempt: 0,
        step_statuses: pipeline
            .steps()
            .iter()
            .map(|s| StepStatus::todo(s.name()))
            .collect(),
        config,
    }
}

impl Task {
    pub fn new(
        services: Arc<Services>,
        cluster: Arc<ClusterState>,
        pipeline: Pipeline,
        snapshot: TaskSnapshot<Config>,
    ) -> Self {
        let out = TaskOutput::new(services.settings.output_capacity);
        Self {
            services,
            cluster,
            pipeline,
            snapshot,
            start: 0,
            out,
            cancel: CancellationToken::new(),
        }
    }

    /// Prepares a persisted task to continue from its first unfinished step
    ///
    /// Earlier steps keep their status and timestamps. The remaining ones
    /// are reset to `todo` under a new attempt number, and the runner is
    /// rebuilt if `ssh` already ran.
    pub async fn resume(
        services: Arc<Services>,
        cluster: Arc<ClusterState>,
        pipeline: Pipeline,
        mut snapshot: TaskSnapshot<Config>,
    ) -> Result<Self, TaskError> {
        if snapshot.step_statuses.iter().map(|s| s.step.as_str()).ne(pipeline
            .steps()
            .iter()
            .map(|s| s.name()))
        {
            return Err(TaskError::InvalidState(format!(
                "snapshot steps do not match pipeline {}",
                pipeline.name()
            )));
        }

        let start = snapshot
            .resume_point()
            .ok_or_else(|| TaskError::InvalidState("task already succeeded".to_string()))?;
        let started = snapshot.attempt > 0
            || snapshot.step_statuses.iter().any(|s| s.status != Status::Todo);
        if !started {
            return Err(TaskError::InvalidState(format!(
                "task {} has not started yet",
                snapshot.id
            )));
        }

        for status in &mut snapshot.step_statuses[start..] {
            *status = StepStatus::todo(status.step.clone());
        }
        snapshot.attempt += 1;

        let ssh_done = snapshot.step_statuses[..start]
            .iter()
            .any(|s| s.step == "ssh" && s.status == Status::Success);
        if ssh_done {
            let host = snapshot
                .config
                .node
                .as_ref()
                .and_then(|n| n.ssh_address())
                .map(str::to_string);
            if let Some(host) = host {
                let runner = services.runners.runner(&host, &snapshot.config.profile.ssh)?;
                snapshot.config.runner.set(runner);
            }
        }

        let previous = log_repository::find_by_task(services.store.as_ref(), snapshot.id).await?;

        info!(
            "Task {} ({}) resumes at step {} ({}), attempt {}",
            snapshot.id,
            snapshot.pipeline,
            start,
            snapshot.step_statuses[start].step,
            snapshot.attempt
        );

        let mut task = Self::new(services, cluster, pipeline, snapshot);
        task.out.restore(previous);
        task.start = start;
        Ok(task)
    }

    pub fn id(&self) -> Uuid {
        self.snapshot.id
    }

    pub fn snapshot(&self) -> &TaskSnapshot<Config> {
        &self.snapshot
    }

    pub fn output(&self) -> TaskOutput {
        self.out.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uses `cancel` instead of a fresh token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the task in the background
    pub fn spawn(self) -> TaskHandle {
        self.spawn_with(|outcome| async move { outcome })
    }

    /// Runs the task in the background, then hands the outcome to `after`
    /// before it becomes visible to [`TaskHandle::wait`]
    pub fn spawn_with<F, Fut>(self, after: F) -> TaskHandle
    where
        F: FnOnce(TaskOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let id = self.id();
        let cancel = self.cancel.clone();
        let join = tokio::spawn(async move {
            let outcome = self.run().await;
            after(outcome).await
        });

        TaskHandle { id, cancel, join }
    }

    pub async fn run(mut self) -> TaskOutcome {
        let flusher = spawn_log_flusher(
            self.snapshot.id,
            self.services.store.clone(),
            self.out.clone(),
            self.services.settings.log_flush_interval,
        );

        let result = self.execute().await;

        flusher.abort();
        self.out.flush();
        flush_logs(self.services.store.as_ref(), self.snapshot.id, &self.out).await;

        match &result {
            Ok(()) => info!("Task {} ({}) succeeded", self.snapshot.id, self.snapshot.pipeline),
            Err(e) => warn!("Task {} ({}) ended: {}", self.snapshot.id, self.snapshot.pipeline, e),
        }

        TaskOutcome {
            snapshot: self.snapshot,
            result,
        }
    }

    async fn execute(&mut self) -> Result<(), TaskError> {
        let steps = self.pipeline.steps().to_vec();
        let task_deadline = Instant::now() + self.budget(&steps);

        self.persist().await?;
        info!(
            "Task {} ({}) started at step {} of {}",
            self.snapshot.id,
            self.snapshot.pipeline,
            self.start,
            steps.len()
        );

        for (index, step) in steps.iter().enumerate().skip(self.start) {
            if self.cancel.is_cancelled() {
                self.finish(index, Status::Cancelled, Some("cancelled".to_string()));
                self.persist().await?;
                return Err(TaskError::Cancelled {
                    step: step.name().to_string(),
                });
            }

            if !step.applies(&self.snapshot.config) {
                debug!("Task {} skips step {}", self.snapshot.id, step.name());
                self.snapshot.step_statuses[index].started_at = Some(Utc::now());
                self.finish(index, Status::Skipped, None);
                self.persist().await?;
                continue;
            }

            {
                let status = &mut self.snapshot.step_statuses[index];
                status.status = Status::Executing;
                status.started_at = Some(Utc::now());
                status.finished_at = None;
                status.error_message = None;
            }
            self.persist().await?;

            info!("Task {} running step {}", self.snapshot.id, step.name());
            self.out.info(format!("==> {}", step.name()));

            let remaining = task_deadline.saturating_duration_since(Instant::now());
            let limit = step.timeout(&self.snapshot.config).min(remaining);
            let ctx = StepContext {
                services: self.services.clone(),
                task_id: self.snapshot.id,
                step: step.name(),
                cancel: self.cancel.clone(),
                out: self.out.clone(),
                cluster: self.cluster.clone(),
                deadline: Instant::now() + limit,
            };

            let result = run_step(
                step.as_ref(),
                &ctx,
                &mut self.snapshot.config,
                limit,
                self.services.settings.cancel_grace,
            )
            .await;

            match result {
                Ok(()) => {
                    self.finish(index, Status::Success, None);
                    self.persist().await?;
                }
                Err(e) if e.is_cancelled() || self.cancel.is_cancelled() => {
                    self.out.error(format!("{} cancelled", step.name()));
                    self.finish(index, Status::Cancelled, Some(StepError::Cancelled.to_string()));
                    self.persist().await?;
                    return Err(TaskError::Cancelled {
                        step: step.name().to_string(),
                    });
                }
                Err(e) => {
                    error!("Task {} step {} failed: {}", self.snapshot.id, step.name(), e);
                    self.out.error(format!("{} failed: {}", step.name(), e));
                    self.finish(index, Status::Error, Some(e.to_string()));
                    self.persist().await?;
                    return Err(TaskError::Step {
                        step: step.name().to_string(),
                        source: e,
                    });
                }
            }
        }

        Ok(())
    }

    /// Sum of the budgets of the steps still to run, capped by the maximum
    /// task duration
    fn budget(&self, steps: &[Arc<dyn Step>]) -> Duration {
        let cfg = &self.snapshot.config;
        steps
            .iter()
            .skip(self.start)
            .map(|s| s.timeout(cfg))
            .sum::<Duration>()
            .min(cfg.timeouts.max_task())
    }

    fn finish(&mut self, index: usize, status: Status, message: Option<String>) {
        let entry = &mut self.snapshot.step_statuses[index];
        entry.status = status;
        entry.error_message = message;
        entry.finished_at = Some(Utc::now());
    }

    async fn persist(&self) -> Result<(), StoreError> {
        task_repository::save(self.services.store.as_ref(), &self.snapshot).await
    }
}

/// Runs one step within `limit`
///
/// On cancellation the step gets `grace` to return on its own before it is
/// dropped; a step that still finishes cleanly keeps its result.
async fn run_step(
    step: &dyn Step,
    ctx: &StepContext,
    cfg: &mut Config,
    limit: Duration,
    grace: Duration,
) -> Result<(), StepError> {
    enum Outcome {
        Done(Result<(), StepError>),
        Cancelled,
    }

    let mut run = step.run(ctx, cfg);

    let outcome = tokio::select! {
        res = time::timeout(limit, &mut run) => Outcome::Done(res.unwrap_or_else(|_| {
            Err(StepError::Timeout {
                step: step.name().to_string(),
                after: limit,
            })
        })),
        _ = ctx.cancel.cancelled() => Outcome::Cancelled,
    };

    match outcome {
        Outcome::Done(result) => result,
        Outcome::Cancelled => match time::timeout(grace, &mut run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(StepError::Cancelled),
        },
    }
}

/// Periodically writes the retained output of a task to the store
fn spawn_log_flusher(
    task_id: Uuid,
    store: Arc<dyn Store>,
    out: TaskOutput,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        let mut flushed = 0;

        loop {
            ticker.tick().await;

            let written = out.written();
            if written == flushed {
                continue;
            }

            flush_logs(store.as_ref(), task_id, &out).await;
            flushed = written;
        }
    })
}

async fn flush_logs(store: &dyn Store, task_id: Uuid, out: &TaskOutput) {
    let entries = out.entries();
    debug!("Flushing {} log lines of task {}", entries.len(), task_id);
    if let Err(e) = log_repository::save(store, task_id, &entries).await {
        error!("Failed to store logs of task {}: {}", task_id, e);
    }
}
