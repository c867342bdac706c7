use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::manager::Command;
use super::types::ProgressMode;

/// One sensed progress reading. Drivers only sense; the supervisor applies
/// the reading to the record, which is where liveness and monotonicity are
/// enforced.
#[derive(Debug, Clone, Copy)]
pub enum ProgressSignal {
    /// Raw byte length of the output artifact (size-polling).
    Bytes(u64),
    /// One synthetic increment toward the ceiling (time-interpolation).
    Step,
}

/// Spawns the periodic progress driver for one run. The driver never touches
/// shared state: each tick is delivered to the supervisor loop, which
/// re-checks that the run is still live before acting on it, so a tick that
/// fires after cancellation or completion is a no-op. The supervisor aborts
/// the returned handle when the run ends.
pub(crate) fn spawn_driver(
    mode: ProgressMode,
    task_id: String,
    run: Uuid,
    output: PathBuf,
    tx: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(mode.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the zeroth tick completes immediately; the first reading should
        // land one full interval after start
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let signal = match mode {
                ProgressMode::SizePolling { .. } => {
                    let bytes = tokio::fs::metadata(&output)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    ProgressSignal::Bytes(bytes)
                }
                ProgressMode::TimeInterpolation { .. } => ProgressSignal::Step,
            };

            let tick = Command::Tick {
                task_id: task_id.clone(),
                run,
                signal,
            };
            if tx.send(tick).await.is_err() {
                // supervisor loop is gone
                break;
            }
        }
    })
}
