use super::*;
use crate::remux::RemuxEngine;
use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

/// Engine scripted for tests: optionally writes the output artifact, sleeps
/// for the configured duration on the blocking pool, then returns its code.
struct ScriptedEngine {
    code: i32,
    delay: Duration,
    write_bytes: usize,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new(code: i32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            code,
            delay,
            write_bytes: 0,
            calls: AtomicUsize::new(0),
        })
    }

    fn with_output(code: i32, delay: Duration, write_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            code,
            delay,
            write_bytes,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemuxEngine for ScriptedEngine {
    fn remux(&self, _input: &Path, output: &Path) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.write_bytes > 0 {
            let _ = std::fs::write(output, vec![0u8; self.write_bytes]);
        }
        std::thread::sleep(self.delay);
        self.code
    }
}

fn fast_interpolation() -> SupervisorConfig {
    SupervisorConfig {
        progress: ProgressMode::TimeInterpolation {
            interval_ms: 20,
            step: 0.1,
            ceiling: 0.9,
        },
        duplicate_policy: DuplicatePolicy::Reject,
        event_capacity: 64,
    }
}

fn fast_size_polling() -> SupervisorConfig {
    SupervisorConfig {
        progress: ProgressMode::SizePolling { interval_ms: 20 },
        duplicate_policy: DuplicatePolicy::Reject,
        event_capacity: 64,
    }
}

fn temp_output(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().to_string()
}

async fn collect_until_terminal(
    rx: &mut broadcast::Receiver<RemuxEvent>,
) -> Result<Vec<RemuxEvent>> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv()).await??;
        let terminal = event.state.is_terminal();
        events.push(event);
        if terminal {
            return Ok(events);
        }
    }
}

#[tokio::test]
async fn completed_run_emits_started_running_completed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(120));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    let output = temp_output(&dir, "a.mp4");
    supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await?;

    let events = collect_until_terminal(&mut rx).await?;

    let first = &events[0];
    assert_eq!(first.state, EventState::Started);
    assert_eq!(first.progress, 0.0);
    assert_eq!(first.task_id, "t1");

    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Completed);
    assert_eq!(last.result_code, Some(RET_OK));
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.output_path.as_deref(), Some(output.as_str()));

    let mut previous = 0.0;
    for event in &events[1..events.len() - 1] {
        assert_eq!(event.state, EventState::Running);
        assert!(event.progress >= previous);
        assert!(event.progress <= 0.9);
        previous = event.progress;
    }

    assert_eq!(engine.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn native_error_code_surfaces_verbatim() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(-5, Duration::from_millis(80));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine);
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "b.mp4"),
        ))
        .await?;

    let events = collect_until_terminal(&mut rx).await?;
    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Failed);
    assert_eq!(last.result_code, Some(-5));
    // failure keeps the last observed progress, at most the ceiling
    assert!(last.progress <= 0.9);
    Ok(())
}

#[tokio::test]
async fn directory_failure_skips_the_native_call() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory")?;
    // the output parent runs through a regular file, so it cannot be created
    let output = blocker.join("sub").join("out.mp4");

    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(10));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &output.to_string_lossy(),
        ))
        .await?;

    let events = collect_until_terminal(&mut rx).await?;
    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Failed);
    assert_eq!(last.result_code, Some(RET_DIR_ERROR));
    assert!(last.message.is_some());
    assert_eq!(engine.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn cancel_emits_cancelled_and_nothing_afterwards() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(300));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "d.mp4"),
        ))
        .await?;
    sleep(Duration::from_millis(50)).await;
    supervisor.cancel(Some("t1")).await;

    let events = collect_until_terminal(&mut rx).await?;
    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Cancelled);
    assert_eq!(last.result_code, Some(RET_SOFT_CANCEL));
    assert_eq!(last.message.as_deref(), Some("soft cancel"));

    // the native call finishes in the background; no event may follow
    let quiet = timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(quiet.is_err());
    assert_eq!(engine.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn blank_paths_are_rejected_synchronously() -> Result<()> {
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(10));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    let result = supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", ""))
        .await;
    assert!(matches!(result, Err(StartError::Args)));

    let result = supervisor
        .start(StartRequest::new(Some("t1"), "   ", "out.mp4"))
        .await;
    assert!(matches!(result, Err(StartError::Args)));

    // rejection is synchronous: no record, no event, no native call
    assert!(rx.try_recv().is_err());
    assert!(supervisor.snapshot().await.is_empty());
    assert_eq!(engine.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_start_is_rejected_while_active() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(200));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    let output = temp_output(&dir, "dup.mp4");
    supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await?;

    let second = supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await;
    assert!(matches!(second, Err(StartError::Busy(id)) if id == "t1"));

    collect_until_terminal(&mut rx).await?;
    assert_eq!(engine.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_start_coalesces_under_that_profile() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(200));
    let config = SupervisorConfig {
        duplicate_policy: DuplicatePolicy::Coalesce,
        ..fast_interpolation()
    };
    let (supervisor, sink) = create_supervisor(config, engine.clone());
    let mut rx = sink.subscribe();

    let output = temp_output(&dir, "dup.mp4");
    let first = supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await?;
    assert!(!first.coalesced);

    let second = supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await?;
    assert!(second.coalesced);
    assert_eq!(second.run, first.run);

    collect_until_terminal(&mut rx).await?;

    // idempotent acceptance: one invocation, one terminal event
    let quiet = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(quiet.is_err());
    assert_eq!(engine.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_of_an_unknown_task_is_a_silent_no_op() -> Result<()> {
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(10));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine);
    let mut rx = sink.subscribe();

    supervisor.cancel(Some("ghost")).await;

    let quiet = timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(quiet.is_err());
    assert!(supervisor.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn late_completion_after_restart_is_discarded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(150));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine.clone());
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "run1.mp4"),
        ))
        .await?;
    sleep(Duration::from_millis(40)).await;
    supervisor.cancel(Some("t1")).await;

    let cancelled = collect_until_terminal(&mut rx).await?;
    assert_eq!(cancelled.last().unwrap().state, EventState::Cancelled);

    // restart the same identity while the first native call is still running
    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "run2.mp4"),
        ))
        .await?;

    let events = collect_until_terminal(&mut rx).await?;
    assert_eq!(events[0].state, EventState::Started);
    let last = events.last().unwrap();
    // the first run's completion lands mid-way and must not finalize run two
    assert_eq!(last.state, EventState::Completed);
    assert_eq!(
        last.output_path.as_deref(),
        Some(temp_output(&dir, "run2.mp4").as_str())
    );
    assert_eq!(
        events.iter().filter(|e| e.state.is_terminal()).count(),
        1
    );
    assert_eq!(engine.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn size_polling_reports_raw_byte_counts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::with_output(RET_OK, Duration::from_millis(150), 4096);
    let (supervisor, sink) = create_supervisor(fast_size_polling(), engine);
    let mut rx = sink.subscribe();

    let output = temp_output(&dir, "sized.mp4");
    supervisor
        .start(StartRequest::new(Some("t1"), "in.m3u8", &output))
        .await?;

    let events = collect_until_terminal(&mut rx).await?;
    assert_eq!(events[0].state, EventState::Started);
    assert_eq!(events[0].progress, 0.0);

    let running: Vec<_> = events
        .iter()
        .filter(|e| e.state == EventState::Running)
        .collect();
    assert!(running.iter().any(|e| e.progress == 4096.0));
    let mut previous = 0.0;
    for event in &running {
        assert!(event.progress >= previous);
        previous = event.progress;
    }

    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Completed);
    // completion settles on the final artifact length
    assert_eq!(last.progress, 4096.0);
    Ok(())
}

#[tokio::test]
async fn snapshot_tracks_the_active_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(150));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine);
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "snap.mp4"),
        ))
        .await?;
    sleep(Duration::from_millis(50)).await;

    let snapshots = supervisor.snapshot().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].task_id, "t1");
    assert_eq!(snapshots[0].status, TaskStatus::Running);

    collect_until_terminal(&mut rx).await?;
    assert!(supervisor.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_task_id_selects_the_single_slot_constant() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(200));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine);
    let mut rx = sink.subscribe();

    let ack = supervisor
        .start(StartRequest::new(
            None,
            "in.m3u8",
            &temp_output(&dir, "slot.mp4"),
        ))
        .await?;
    assert_eq!(ack.task_id, DEFAULT_TASK_ID);

    sleep(Duration::from_millis(40)).await;
    // cancel without an id addresses the same slot
    supervisor.cancel(None).await;

    let events = collect_until_terminal(&mut rx).await?;
    assert!(events.iter().all(|e| e.task_id == DEFAULT_TASK_ID));
    assert_eq!(events.last().unwrap().state, EventState::Cancelled);
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_active_tasks_and_closes_the_supervisor() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ScriptedEngine::new(RET_OK, Duration::from_millis(300));
    let (supervisor, sink) = create_supervisor(fast_interpolation(), engine);
    let mut rx = sink.subscribe();

    supervisor
        .start(StartRequest::new(
            Some("t1"),
            "in.m3u8",
            &temp_output(&dir, "down.mp4"),
        ))
        .await?;
    sleep(Duration::from_millis(30)).await;

    supervisor.shutdown().await;

    let events = collect_until_terminal(&mut rx).await?;
    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Cancelled);
    assert_eq!(last.message.as_deref(), Some("supervisor shutdown"));

    let rejected = supervisor
        .start(StartRequest::new(Some("t2"), "in.m3u8", "out.mp4"))
        .await;
    assert!(matches!(rejected, Err(StartError::Closed)));
    Ok(())
}
