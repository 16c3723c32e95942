//! Stage worker: polls for queued runs, claims them and executes them
//! concurrently up to a cap.
//!
//! A worker owns three background loops (heartbeat, rescue, poll) and a set
//! of in-flight executions. The durable store is the only coordination point
//! between workers: `RunManager::claim_run` decides who executes a run.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, AutomationLevel, Config, LogLevel, RunStatus, Stage, StageRun, StageTransitionEvent,
    WorkerStatus,
};
use crate::domain::ports::{CardRepository, RunCallbacks};

use super::run_manager::RunManager;
use super::stage_executor::StageExecutor;

/// Worker timing and capacity.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Delay between queue polls
    pub poll_interval: Duration,
    /// Delay between heartbeats
    pub heartbeat_interval: Duration,
    /// Delay between stuck-run sweeps
    pub rescue_interval: Duration,
    /// Runs executed at once
    pub max_concurrent: usize,
    /// How long `stop` waits for in-flight runs
    pub shutdown_timeout: Duration,
    /// Only poll runs of this workspace
    pub workspace_id: Option<Uuid>,
    /// Queue the next stage when a run succeeds under full automation
    pub apply_auto_advance: bool,
}

impl WorkerSettings {
    /// Settings from the `worker` section of the config.
    pub fn from_config(config: &Config) -> Self {
        let worker = &config.worker;
        Self {
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(worker.heartbeat_interval_ms),
            rescue_interval: Duration::from_millis(worker.rescue_interval_ms),
            max_concurrent: worker.max_concurrent.max(1),
            shutdown_timeout: Duration::from_millis(worker.shutdown_timeout_ms),
            workspace_id: worker.workspace_id,
            apply_auto_advance: worker.apply_auto_advance,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// `worker-<pid>-<8 hex chars>`
pub fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &suffix[..8])
}

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not running
    Stopped,
    /// Registering and spawning loops
    Starting,
    /// Polling and executing runs
    Running,
    /// Draining in-flight runs
    Stopping,
}

impl WorkerState {
    /// Lowercase name used in logs and heartbeats.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Id this worker registers under
    pub worker_id: String,
    /// Lifecycle state at the time of the report
    pub state: WorkerState,
    /// Runs currently executing
    pub active_runs: Vec<Uuid>,
}

/// Per-run callbacks persisting through the Run Manager.
///
/// Persistence failures are traced and swallowed so a flaky log write never
/// fails the run.
pub struct RunRecorder {
    runs: Arc<RunManager>,
    run_id: Uuid,
    card_id: Uuid,
    stage: Stage,
}

impl RunRecorder {
    /// A recorder for one run.
    pub fn new(runs: Arc<RunManager>, run: &StageRun) -> Self {
        Self {
            runs,
            run_id: run.id,
            card_id: run.card_id,
            stage: run.stage,
        }
    }
}

#[async_trait]
impl RunCallbacks for RunRecorder {
    async fn on_log(&self, level: LogLevel, message: &str, step_key: Option<&str>) {
        if let Err(e) = self.runs.append_log(self.run_id, level, message, step_key).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to persist run log");
        }
    }

    async fn on_progress(&self, fraction: f32, message: Option<&str>) {
        debug!(run_id = %self.run_id, progress = fraction, message, "Run progress");
    }

    async fn on_artifact(&self, artifact_type: &str, label: &str, uri: Option<&str>, meta: Map<String, Value>) {
        let mut artifact = Artifact::new(self.card_id, self.stage, artifact_type, label)
            .for_run(self.run_id)
            .with_meta(meta);
        if let Some(uri) = uri {
            artifact = artifact.with_uri(uri);
        }
        if let Err(e) = self.runs.record_artifact(&artifact).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to persist artifact");
        }
    }
}

/// State shared between the worker handle, its loops and its executions.
struct WorkerCore {
    id: String,
    settings: WorkerSettings,
    runs: Arc<RunManager>,
    executor: Arc<StageExecutor>,
    cards: Arc<dyn CardRepository>,
    active: Mutex<Vec<Uuid>>,
    drained: Notify,
    stopping: AtomicBool,
}

struct Control {
    state: WorkerState,
    shutdown: Option<CancellationToken>,
    loops: Vec<JoinHandle<()>>,
}

/// Polls the queue and executes claimed runs.
pub struct StageWorker {
    core: Arc<WorkerCore>,
    control: Mutex<Control>,
}

impl StageWorker {
    /// A worker with a generated id.
    pub fn new(
        runs: Arc<RunManager>,
        executor: Arc<StageExecutor>,
        cards: Arc<dyn CardRepository>,
        settings: WorkerSettings,
    ) -> Self {
        Self::with_id(generate_worker_id(), runs, executor, cards, settings)
    }

    /// A worker with a fixed id.
    pub fn with_id(
        id: impl Into<String>,
        runs: Arc<RunManager>,
        executor: Arc<StageExecutor>,
        cards: Arc<dyn CardRepository>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore {
                id: id.into(),
                settings,
                runs,
                executor,
                cards,
                active: Mutex::new(Vec::new()),
                drained: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            control: Mutex::new(Control {
                state: WorkerState::Stopped,
                shutdown: None,
                loops: Vec::new(),
            }),
        }
    }

    /// This worker's id.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        self.control.lock().await.state
    }

    /// Current state and in-flight runs.
    pub async fn report(&self) -> WorkerReport {
        WorkerReport {
            worker_id: self.core.id.clone(),
            state: self.state().await,
            active_runs: self.core.active.lock().await.clone(),
        }
    }

    /// Register the heartbeat and start the background loops.
    #[instrument(skip(self), fields(worker_id = %self.core.id))]
    pub async fn start(&self) -> DomainResult<()> {
        let mut control = self.control.lock().await;
        if control.state != WorkerState::Stopped {
            return Err(DomainError::InvalidStateTransition {
                from: control.state.to_string(),
                to: WorkerState::Starting.to_string(),
                reason: "worker is already started".to_string(),
            });
        }
        control.state = WorkerState::Starting;
        self.core.stopping.store(false, Ordering::SeqCst);

        if let Err(e) = self
            .core
            .runs
            .register_worker(&self.core.id, self.core.settings.workspace_id)
            .await
        {
            control.state = WorkerState::Stopped;
            return Err(e);
        }

        let shutdown = CancellationToken::new();
        control.loops = vec![
            tokio::spawn(heartbeat_loop(self.core.clone(), shutdown.clone())),
            tokio::spawn(rescue_loop(self.core.clone(), shutdown.clone())),
            tokio::spawn(poll_loop(self.core.clone(), shutdown.clone())),
        ];
        control.shutdown = Some(shutdown);
        control.state = WorkerState::Running;
        info!(
            max_concurrent = self.core.settings.max_concurrent,
            workspace_id = ?self.core.settings.workspace_id,
            "Worker started"
        );
        Ok(())
    }

    /// Stop claiming, wait for in-flight runs (bounded by the shutdown
    /// timeout), then report idle. Returns false if runs were still active
    /// when the timeout expired.
    #[instrument(skip(self), fields(worker_id = %self.core.id))]
    pub async fn stop(&self) -> DomainResult<bool> {
        let mut control = self.control.lock().await;
        if control.state != WorkerState::Running {
            return Ok(true);
        }
        control.state = WorkerState::Stopping;
        self.core.stopping.store(true, Ordering::SeqCst);
        if let Some(shutdown) = control.shutdown.take() {
            shutdown.cancel();
        }
        for handle in control.loops.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker loop ended abnormally");
            }
        }

        let drained = self.drain(self.core.settings.shutdown_timeout).await;
        if !drained {
            let left = self.core.active.lock().await.len();
            warn!(active = left, "Shutdown timeout reached with runs still executing");
        }
        self.core
            .runs
            .update_worker_heartbeat(&self.core.id, self.core.settings.workspace_id, WorkerStatus::Idle, None)
            .await?;
        control.state = WorkerState::Stopped;
        info!("Worker stopped");
        Ok(drained)
    }

    /// Run one poll cycle: claim up to the free capacity and spawn an
    /// execution per claimed run. Returns the number of runs started.
    pub async fn poll_once(&self) -> DomainResult<usize> {
        self.core.clone().poll_once().await
    }

    /// Wait until no execution is in flight. False on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.core.wait_idle(timeout).await
    }
}

async fn heartbeat_loop(core: Arc<WorkerCore>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(core.settings.heartbeat_interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // one run is advertised; the others are vouched for by
                // `claimed_by` (see `is_corroborated` in run_manager)
                let active = core.active.lock().await.first().copied();
                let status = if active.is_some() { WorkerStatus::Processing } else { WorkerStatus::Idle };
                if let Err(e) = core
                    .runs
                    .update_worker_heartbeat(&core.id, core.settings.workspace_id, status, active)
                    .await
                {
                    warn!(worker_id = %core.id, error = %e, "Heartbeat failed");
                }
            }
        }
    }
}

async fn rescue_loop(core: Arc<WorkerCore>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(core.settings.rescue_interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match core.runs.rescue_stuck_runs().await {
                    Ok(rescued) if !rescued.is_empty() => {
                        info!(worker_id = %core.id, count = rescued.len(), "Rescued stuck runs");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(worker_id = %core.id, error = %e, "Rescue sweep failed"),
                }
            }
        }
    }
}

async fn poll_loop(core: Arc<WorkerCore>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(core.settings.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = core.clone().poll_once().await {
                    warn!(worker_id = %core.id, error = %e, "Poll cycle failed");
                }
            }
        }
    }
}

impl WorkerCore {
    async fn poll_once(self: Arc<Self>) -> DomainResult<usize> {
        if self.stopping.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let in_flight = self.active.lock().await.len();
        let free = self.settings.max_concurrent.saturating_sub(in_flight);
        if free == 0 {
            return Ok(0);
        }

        let queued = self
            .runs
            .list_queued_runs(self.settings.workspace_id, free)
            .await?;
        let mut started = 0;
        for candidate in queued {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            if !self.runs.claim_run(candidate.id, &self.id).await? {
                debug!(worker_id = %self.id, run_id = %candidate.id, "Run claimed elsewhere");
                continue;
            }
            let run = self.runs.get_run(candidate.id).await?;
            self.active.lock().await.push(run.id);
            if let Err(e) = self
                .runs
                .update_worker_heartbeat(&self.id, self.settings.workspace_id, WorkerStatus::Processing, Some(run.id))
                .await
            {
                warn!(worker_id = %self.id, error = %e, "Heartbeat failed");
            }
            self.clone().spawn_execution(run);
            started += 1;
        }
        Ok(started)
    }

    /// Run the execution in its own task so a panic is contained, then
    /// settle bookkeeping from a supervising task.
    fn spawn_execution(self: Arc<Self>, run: StageRun) {
        let run_id = run.id;
        let execution = tokio::spawn(self.clone().execute_run(run));
        tokio::spawn(async move {
            let failed = match execution.await {
                Ok(Ok(failed)) => failed,
                Ok(Err(e)) => {
                    error!(worker_id = %self.id, %run_id, error = %e, "Run execution errored");
                    self.fail_run(run_id, &format!("Worker error: {e}")).await;
                    true
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        "Worker panic while executing run".to_string()
                    } else {
                        format!("Execution task aborted: {join_error}")
                    };
                    error!(worker_id = %self.id, %run_id, "{reason}");
                    self.fail_run(run_id, &reason).await;
                    true
                }
            };
            if let Err(e) = self.runs.increment_worker_stats(&self.id, failed).await {
                warn!(worker_id = %self.id, error = %e, "Failed to update worker stats");
            }
            self.finish(run_id).await;
        });
    }

    async fn fail_run(&self, run_id: Uuid, reason: &str) {
        if let Err(e) = self.runs.append_log(run_id, LogLevel::Error, reason, None).await {
            warn!(%run_id, error = %e, "Failed to persist run log");
        }
        if let Err(e) = self
            .runs
            .complete_run(run_id, RunStatus::Failed, Some(reason), Map::new())
            .await
        {
            error!(%run_id, error = %e, "Failed to record run failure");
        }
    }

    async fn finish(&self, run_id: Uuid) {
        let next = {
            let mut active = self.active.lock().await;
            active.retain(|id| *id != run_id);
            // rescue relies on `claimed_by` for runs not advertised here
            active.first().copied()
        };
        let status = if next.is_some() { WorkerStatus::Processing } else { WorkerStatus::Idle };
        if let Err(e) = self
            .runs
            .update_worker_heartbeat(&self.id, self.settings.workspace_id, status, next)
            .await
        {
            warn!(worker_id = %self.id, error = %e, "Heartbeat failed");
        }
        self.drained.notify_waiters();
    }

    async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.drained.notified();
                if self.active.lock().await.is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Execute a claimed run and record its completion. Returns whether the
    /// run failed.
    #[instrument(skip(self, run), fields(worker_id = %self.id, run_id = %run.id, card_id = %run.card_id, stage = %run.stage))]
    async fn execute_run(self: Arc<Self>, run: StageRun) -> DomainResult<bool> {
        let started = Instant::now();
        let recorder = RunRecorder::new(self.runs.clone(), &run);
        recorder
            .on_log(LogLevel::Info, &format!("Executing on {}", self.id), None)
            .await;

        let result = self.executor.execute(&run, &recorder).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(outcome) => {
                let mut meta = outcome.to_metadata();
                meta.insert("durationMs".into(), json!(duration_ms));
                meta.insert("workerId".into(), json!(self.id));
                let status = if outcome.success { RunStatus::Succeeded } else { RunStatus::Failed };
                let completed = self
                    .runs
                    .complete_run(run.id, status, outcome.error.as_deref(), meta)
                    .await?;
                if completed && outcome.success && outcome.auto_advance {
                    self.apply_auto_advance(&run, &recorder).await;
                }
                Ok(!outcome.success)
            }
            Err(e) => {
                warn!(error = %e, "Stage execution failed");
                let mut meta = Map::new();
                meta.insert("durationMs".into(), json!(duration_ms));
                meta.insert("workerId".into(), json!(self.id));
                self.runs
                    .complete_run(run.id, RunStatus::Failed, Some(&e.to_string()), meta)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn apply_auto_advance(&self, run: &StageRun, recorder: &RunRecorder) {
        if !self.settings.apply_auto_advance || run.automation_level != AutomationLevel::Autonomous {
            return;
        }
        let Some(next) = run.stage.next() else {
            return;
        };
        match self.cards.advance_stage(run.card_id, run.stage, next).await {
            Ok(true) => {
                let event = StageTransitionEvent::new(run.card_id, Some(run.stage), next, format!("worker:{}", self.id))
                    .with_reason("auto-advance")
                    .with_run(run.id);
                if let Err(e) = self.runs.record_transition(&event).await {
                    warn!(run_id = %run.id, error = %e, "Failed to record transition");
                }
                info!(run_id = %run.id, from = %run.stage, to = %next, "Card auto-advanced");
                recorder
                    .on_log(LogLevel::Info, &format!("Card advanced to {next}"), None)
                    .await;
            }
            Ok(false) => {
                debug!(run_id = %run.id, "Card moved since the run started, not advancing");
            }
            Err(e) => warn!(run_id = %run.id, error = %e, "Auto-advance failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_shape() {
        let id = generate_worker_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "worker");
        assert_eq!(parts[1], std::process::id().to_string());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(generate_worker_id(), id);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.worker.max_concurrent = 0;
        config.worker.poll_interval_ms = 250;
        let settings = WorkerSettings::from_config(&config);
        assert_eq!(settings.max_concurrent, 1);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
    }
}
