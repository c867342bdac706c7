use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::remux::{NativeInvoker, RemuxEngine, RemuxOutcome};
use super::progress::{spawn_driver, ProgressSignal};
use super::sink::TaskEventSink;
use super::types::{
    DuplicatePolicy, EventState, ProgressMode, RemuxEvent, StartAck, StartError, StartRequest,
    SupervisorConfig, TaskRecord, TaskSnapshot, TaskStatus, DEFAULT_TASK_ID, RET_DIR_ERROR,
    RET_NATIVE_FAULT, RET_OK, RET_SOFT_CANCEL,
};

const COMMAND_BUFFER: usize = 32;

/// Messages into the supervisor loop. Workers and progress drivers never
/// mutate a record directly; everything funnels through here.
pub(crate) enum Command {
    Start {
        req: StartRequest,
        reply: oneshot::Sender<Result<StartAck, StartError>>,
    },
    Cancel {
        task_id: String,
    },
    Tick {
        task_id: String,
        run: Uuid,
        signal: ProgressSignal,
    },
    Finished {
        task_id: String,
        run: Uuid,
        outcome: WorkerOutcome,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<TaskSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What one worker run produced.
pub(crate) enum WorkerOutcome {
    Native(RemuxOutcome),
    PrepareFailed(String),
}

struct ActiveTask {
    record: TaskRecord,
    driver: JoinHandle<()>,
}

/// Handle to the supervisor loop. Cheap to clone; all clones talk to the
/// same task map.
#[derive(Clone)]
pub struct RemuxSupervisor {
    tx: mpsc::Sender<Command>,
}

impl RemuxSupervisor {
    pub fn new(
        config: SupervisorConfig,
        engine: Arc<dyn RemuxEngine>,
        sink: Arc<dyn TaskEventSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let inner = SupervisorLoop {
            config,
            invoker: NativeInvoker::new(engine),
            sink,
            tasks: HashMap::new(),
            tx: tx.clone(),
        };
        tokio::spawn(inner.run(rx));
        Self { tx }
    }

    /// Validates and registers a remux task, schedules the background work
    /// and returns immediately. A missing `task_id` selects the single-slot
    /// constant.
    pub async fn start(&self, req: StartRequest) -> Result<StartAck, StartError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Start { req, reply })
            .await
            .map_err(|_| StartError::Closed)?;
        rx.await.map_err(|_| StartError::Closed)?
    }

    /// Soft-cancels a task. Unknown ids are a silent no-op. The native call,
    /// if already started, keeps running in the background; its eventual
    /// result is discarded.
    pub async fn cancel(&self, task_id: Option<&str>) {
        let task_id = task_id.unwrap_or(DEFAULT_TASK_ID).to_string();
        let _ = self.tx.send(Command::Cancel { task_id }).await;
    }

    /// Snapshots of all currently active records.
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Snapshot { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancels every active record and stops the supervisor loop. Native
    /// calls still in flight are left to finish on their own; their results
    /// go nowhere.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct SupervisorLoop {
    config: SupervisorConfig,
    invoker: NativeInvoker,
    sink: Arc<dyn TaskEventSink>,
    tasks: HashMap<String, ActiveTask>,
    tx: mpsc::Sender<Command>,
}

impl SupervisorLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Start { req, reply } => {
                    let result = self.handle_start(req).await;
                    let _ = reply.send(result);
                }
                Command::Cancel { task_id } => self.handle_cancel(&task_id).await,
                Command::Tick {
                    task_id,
                    run,
                    signal,
                } => self.handle_tick(&task_id, run, signal).await,
                Command::Finished {
                    task_id,
                    run,
                    outcome,
                } => self.handle_finished(&task_id, run, outcome).await,
                Command::Snapshot { reply } => {
                    let snapshots = self
                        .tasks
                        .values()
                        .map(|active| TaskSnapshot::from(&active.record))
                        .collect();
                    let _ = reply.send(snapshots);
                }
                Command::Shutdown { reply } => {
                    self.handle_shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("supervisor loop stopped");
    }

    async fn handle_start(&mut self, req: StartRequest) -> Result<StartAck, StartError> {
        if req.input.trim().is_empty() || req.output.trim().is_empty() {
            return Err(StartError::Args);
        }
        let task_id = req
            .task_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TASK_ID.to_string());

        if let Some(active) = self.tasks.get(&task_id) {
            return match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(%task_id, "start rejected, task already running");
                    Err(StartError::Busy(task_id))
                }
                DuplicatePolicy::Coalesce => Ok(StartAck {
                    task_id,
                    run: active.record.run,
                    coalesced: true,
                }),
            };
        }

        let run = Uuid::new_v4();
        let mut record = TaskRecord::new(task_id.clone(), run, req.input, req.output);
        info!(%task_id, %run, input = %record.input_path, "remux task accepted");

        self.emit(&record, EventState::Started, None, None).await;

        record.status = TaskStatus::Running;
        record.started_at = Some(Utc::now());

        // the native call runs on the blocking pool; only its completion
        // message comes back to this loop
        let worker_tx = self.tx.clone();
        let invoker = self.invoker.clone();
        let worker_id = task_id.clone();
        let input = PathBuf::from(&record.input_path);
        let output = PathBuf::from(&record.output_path);
        tokio::spawn(async move {
            let outcome = match prepare_output(&output).await {
                Ok(()) => WorkerOutcome::Native(invoker.invoke(input, output).await),
                Err(e) => WorkerOutcome::PrepareFailed(format!("{:#}", e)),
            };
            let _ = worker_tx
                .send(Command::Finished {
                    task_id: worker_id,
                    run,
                    outcome,
                })
                .await;
        });

        let driver = spawn_driver(
            self.config.progress,
            task_id.clone(),
            run,
            PathBuf::from(&record.output_path),
            self.tx.clone(),
        );

        self.tasks.insert(task_id.clone(), ActiveTask { record, driver });

        Ok(StartAck {
            task_id,
            run,
            coalesced: false,
        })
    }

    async fn handle_cancel(&mut self, task_id: &str) {
        let Some(mut active) = self.tasks.remove(task_id) else {
            debug!(%task_id, "cancel for unknown task ignored");
            return;
        };

        active.driver.abort();
        active.record.cancel_requested = true;
        active.record.status = TaskStatus::Cancelled;
        active.record.result_code = Some(RET_SOFT_CANCEL);

        info!(%task_id, progress = active.record.progress, "remux task soft-cancelled");
        self.emit(
            &active.record,
            EventState::Cancelled,
            Some(RET_SOFT_CANCEL),
            Some("soft cancel".to_string()),
        )
        .await;
    }

    async fn handle_tick(&mut self, task_id: &str, run: Uuid, signal: ProgressSignal) {
        // liveness is decided here, at delivery time; a tick that raced with
        // cancellation or completion finds no matching run and is dropped
        let Some(active) = self.tasks.get_mut(task_id) else {
            return;
        };
        if active.record.run != run || active.record.status != TaskStatus::Running {
            return;
        }

        match signal {
            ProgressSignal::Bytes(bytes) => {
                let reading = bytes as f64;
                if reading > active.record.progress {
                    active.record.progress = reading;
                }
                // raw byte readings are reported every tick, growth or not
                let record = active.record.clone();
                self.emit(&record, EventState::Running, None, None).await;
            }
            ProgressSignal::Step => {
                let ProgressMode::TimeInterpolation { step, ceiling, .. } = self.config.progress
                else {
                    return;
                };
                if active.record.progress >= ceiling {
                    // hold at the ceiling until the native call settles
                    return;
                }
                active.record.progress = (active.record.progress + step).min(ceiling);
                let record = active.record.clone();
                self.emit(&record, EventState::Running, None, None).await;
            }
        }
    }

    async fn handle_finished(&mut self, task_id: &str, run: Uuid, outcome: WorkerOutcome) {
        match self.tasks.get(task_id) {
            Some(active) if active.record.run == run => {}
            _ => {
                // cancelled or replaced while the native call was running
                debug!(%task_id, %run, "late completion for a removed run discarded");
                return;
            }
        }
        let Some(mut active) = self.tasks.remove(task_id) else {
            return;
        };
        active.driver.abort();

        match outcome {
            WorkerOutcome::PrepareFailed(message) => {
                error!(%task_id, %message, "output directory could not be prepared");
                active.record.status = TaskStatus::Failed;
                active.record.result_code = Some(RET_DIR_ERROR);
                self.emit(
                    &active.record,
                    EventState::Failed,
                    Some(RET_DIR_ERROR),
                    Some(message),
                )
                .await;
            }
            WorkerOutcome::Native(RemuxOutcome::Fault(diagnostic)) => {
                error!(%task_id, %diagnostic, "native remux faulted");
                active.record.status = TaskStatus::Failed;
                active.record.result_code = Some(RET_NATIVE_FAULT);
                self.emit(
                    &active.record,
                    EventState::Failed,
                    Some(RET_NATIVE_FAULT),
                    Some(diagnostic),
                )
                .await;
            }
            WorkerOutcome::Native(RemuxOutcome::Code(RET_OK)) => {
                active.record.status = TaskStatus::Completed;
                active.record.result_code = Some(RET_OK);
                active.record.progress = match self.config.progress {
                    ProgressMode::TimeInterpolation { .. } => 1.0,
                    ProgressMode::SizePolling { .. } => {
                        // the final artifact length is the last reading
                        let bytes = tokio::fs::metadata(&active.record.output_path)
                            .await
                            .map(|m| m.len())
                            .unwrap_or(0);
                        (bytes as f64).max(active.record.progress)
                    }
                };
                info!(%task_id, output = %active.record.output_path, "remux completed");
                self.emit(&active.record, EventState::Completed, Some(RET_OK), None)
                    .await;
            }
            WorkerOutcome::Native(RemuxOutcome::Code(code)) => {
                warn!(%task_id, code, "native remux returned an error");
                active.record.status = TaskStatus::Failed;
                active.record.result_code = Some(code);
                self.emit(&active.record, EventState::Failed, Some(code), None)
                    .await;
            }
        }
    }

    async fn handle_shutdown(&mut self) {
        if !self.tasks.is_empty() {
            info!(active = self.tasks.len(), "shutting down with active tasks");
        }
        for (task_id, mut active) in self.tasks.drain() {
            active.driver.abort();
            active.record.status = TaskStatus::Cancelled;
            active.record.result_code = Some(RET_SOFT_CANCEL);
            debug!(%task_id, "task cancelled by shutdown");
            let event = RemuxEvent {
                task_id: active.record.task_id.clone(),
                state: EventState::Cancelled,
                progress: active.record.progress,
                result_code: Some(RET_SOFT_CANCEL),
                output_path: Some(active.record.output_path.clone()),
                message: Some("supervisor shutdown".to_string()),
                timestamp: Utc::now(),
            };
            self.sink.publish(event).await;
        }
    }

    async fn emit(
        &self,
        record: &TaskRecord,
        state: EventState,
        result_code: Option<i32>,
        message: Option<String>,
    ) {
        let event = RemuxEvent {
            task_id: record.task_id.clone(),
            state,
            progress: record.progress,
            result_code,
            output_path: Some(record.output_path.clone()),
            message,
            timestamp: Utc::now(),
        };
        self.sink.publish(event).await;
    }
}

/// Guarantees the output parent directory exists and the target path is not
/// pre-occupied. Only directory creation is fatal; a stale file that cannot
/// be removed is left for the native call to trip over with its own code.
async fn prepare_output(output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }
    }
    if let Err(e) = tokio::fs::remove_file(output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(output = %output.display(), "could not remove stale output: {}", e);
        }
    }
    Ok(())
}
