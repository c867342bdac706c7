use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Result code of a successful remux.
pub const RET_OK: i32 = 0;
/// The output directory could not be prepared; the native call was never made.
pub const RET_DIR_ERROR: i32 = -9997;
/// Cancellation was requested before natural completion (soft cancel).
pub const RET_SOFT_CANCEL: i32 = -9998;
/// The native call crashed or its worker died instead of returning a code.
pub const RET_NATIVE_FAULT: i32 = -9999;

/// Task id substituted when the caller does not supply one (single-slot mode).
pub const DEFAULT_TASK_ID: &str = "remux";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 200;
pub const DEFAULT_PROGRESS_STEP: f64 = 0.02;
pub const DEFAULT_PROGRESS_CEILING: f64 = 0.9;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Lifecycle stage carried on the event surface. `Started` acknowledges an
/// accepted start; the three terminal states end a task's event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl EventState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventState::Completed | EventState::Failed | EventState::Cancelled
        )
    }
}

impl Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One pushed lifecycle event. Field names match the original wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxEvent {
    pub task_id: String,
    pub state: EventState,
    /// Normalized `[0, 1]` under time-interpolation, raw byte count under
    /// size-polling.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RemuxEvent {
    /// Wire form of the event, matching the original channel payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Per-operation state owned by the supervisor. One record per active
/// `task_id`; removed right after its terminal event is emitted.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    /// Run token minted per accepted start. Tick and completion messages
    /// carry it; a stale token means the message belongs to a removed run.
    pub run: Uuid,
    pub input_path: String,
    pub output_path: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub cancel_requested: bool,
    pub result_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(task_id: String, run: Uuid, input_path: String, output_path: String) -> Self {
        Self {
            task_id,
            run,
            input_path,
            output_path,
            status: TaskStatus::Pending,
            progress: 0.0,
            cancel_requested: false,
            result_code: None,
            created_at: Utc::now(),
            started_at: None,
        }
    }
}

/// Read-only view of an active record, for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub output_path: String,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            status: record.status,
            progress: record.progress,
            output_path: record.output_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub task_id: Option<String>,
    pub input: String,
    pub output: String,
}

impl StartRequest {
    pub fn new(task_id: Option<&str>, input: &str, output: &str) -> Self {
        Self {
            task_id: task_id.map(str::to_string),
            input: input.to_string(),
            output: output.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAck {
    pub task_id: String,
    pub run: Uuid,
    /// True when an already-active run was reused instead of starting a new
    /// one (the coalescing duplicate profile).
    pub coalesced: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("input/output is blank")]
    Args,
    #[error("remux task {0} is already running")]
    Busy(String),
    #[error("supervisor is shut down")]
    Closed,
}

/// How a start request for an already-active `task_id` is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    Reject,
    Coalesce,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Progress synthesis strategy, selected per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ProgressMode {
    /// Read the output artifact's byte length on a fixed interval and report
    /// the raw count. The caller interprets growth, not a fraction.
    SizePolling { interval_ms: u64 },
    /// Advance a normalized value by `step` toward `ceiling` on a fixed
    /// interval, then hold until the native call settles the final value.
    TimeInterpolation {
        interval_ms: u64,
        step: f64,
        ceiling: f64,
    },
}

impl ProgressMode {
    pub fn size_polling() -> Self {
        Self::SizePolling {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn time_interpolation() -> Self {
        Self::TimeInterpolation {
            interval_ms: DEFAULT_TICK_INTERVAL_MS,
            step: DEFAULT_PROGRESS_STEP,
            ceiling: DEFAULT_PROGRESS_CEILING,
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::SizePolling { interval_ms } => Duration::from_millis(*interval_ms),
            Self::TimeInterpolation { interval_ms, .. } => Duration::from_millis(*interval_ms),
        }
    }
}

impl Default for ProgressMode {
    fn default() -> Self {
        Self::time_interpolation()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub progress: ProgressMode,
    pub duplicate_policy: DuplicatePolicy,
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            progress: ProgressMode::default(),
            duplicate_policy: DuplicatePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

fn env_or(key: &str) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv::var(key).ok())
}

impl SupervisorConfig {
    /// Deployment profile from the environment (`.env` honored), falling
    /// back to the reference defaults for anything unset or unparseable.
    ///
    /// - `REMUX_PROGRESS_MODE`: `size` | `interpolate`
    /// - `REMUX_PROGRESS_INTERVAL_MS`
    /// - `REMUX_PROGRESS_STEP`, `REMUX_PROGRESS_CEILING` (interpolation only)
    /// - `REMUX_DUPLICATE_POLICY`: `reject` | `coalesce`
    /// - `REMUX_EVENT_CAPACITY`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        match env_or("REMUX_PROGRESS_MODE").as_deref() {
            Some("size") => config.progress = ProgressMode::size_polling(),
            Some("interpolate") | None => {}
            Some(other) => warn!("unknown REMUX_PROGRESS_MODE {:?}, using default", other),
        }

        if let Some(ms) = env_or("REMUX_PROGRESS_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            match &mut config.progress {
                ProgressMode::SizePolling { interval_ms } => *interval_ms = ms,
                ProgressMode::TimeInterpolation { interval_ms, .. } => *interval_ms = ms,
            }
        }
        if let ProgressMode::TimeInterpolation { step, ceiling, .. } = &mut config.progress {
            if let Some(v) = env_or("REMUX_PROGRESS_STEP").and_then(|v| v.parse().ok()) {
                *step = v;
            }
            if let Some(v) = env_or("REMUX_PROGRESS_CEILING").and_then(|v| v.parse().ok()) {
                *ceiling = v;
            }
        }

        match env_or("REMUX_DUPLICATE_POLICY").as_deref() {
            Some("coalesce") => config.duplicate_policy = DuplicatePolicy::Coalesce,
            Some("reject") | None => {}
            Some(other) => warn!("unknown REMUX_DUPLICATE_POLICY {:?}, using default", other),
        }

        if let Some(v) = env_or("REMUX_EVENT_CAPACITY").and_then(|v| v.parse().ok()) {
            config.event_capacity = v;
        }

        config
    }
}
