use std::sync::Arc;

pub mod manager;
pub mod progress;
pub mod sink;
pub mod types;
#[cfg(test)]
mod tests;

pub use types::{
    DuplicatePolicy, EventState, ProgressMode, RemuxEvent, StartAck, StartError, StartRequest,
    SupervisorConfig, TaskRecord, TaskSnapshot, TaskStatus, DEFAULT_TASK_ID, RET_DIR_ERROR,
    RET_NATIVE_FAULT, RET_OK, RET_SOFT_CANCEL,
};

pub use manager::RemuxSupervisor;
pub use sink::{BroadcastSink, FunctionSink, TaskEventSink};

use crate::remux::RemuxEngine;

/// Wires a supervisor to a fresh broadcast sink and hands both back; the
/// sink is what callers subscribe to for the event stream.
pub fn create_supervisor(
    config: SupervisorConfig,
    engine: Arc<dyn RemuxEngine>,
) -> (RemuxSupervisor, Arc<BroadcastSink>) {
    let sink = Arc::new(BroadcastSink::new(config.event_capacity));
    let supervisor = RemuxSupervisor::new(config, engine, sink.clone());
    (supervisor, sink)
}
