use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

#[cfg(feature = "ffmpeg-native")]
pub mod ffmpeg;

/// Blocking demux/mux of an M3U8 stream into an MP4 container.
///
/// Implementations return `0` on success, any other code on failure. The call
/// blocks its thread for the whole operation and cannot be interrupted once
/// started; callers must run it off any thread that has to stay responsive.
pub trait RemuxEngine: Send + Sync {
    fn remux(&self, input: &Path, output: &Path) -> i32;
}

/// What one native invocation produced: a status code, or the fault that
/// kept the worker from returning one.
#[derive(Debug, Clone)]
pub enum RemuxOutcome {
    Code(i32),
    Fault(String),
}

/// Runs a [`RemuxEngine`] on the blocking thread pool. A panic inside the
/// engine surfaces as [`RemuxOutcome::Fault`] with the join diagnostic, it
/// never tears down the caller.
pub struct NativeInvoker {
    engine: Arc<dyn RemuxEngine>,
}

impl NativeInvoker {
    pub fn new(engine: Arc<dyn RemuxEngine>) -> Self {
        Self { engine }
    }

    pub async fn invoke(&self, input: PathBuf, output: PathBuf) -> RemuxOutcome {
        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || engine.remux(&input, &output)).await {
            Ok(code) => RemuxOutcome::Code(code),
            Err(e) => {
                error!("remux worker died before returning a code: {}", e);
                RemuxOutcome::Fault(e.to_string())
            }
        }
    }
}

impl Clone for NativeInvoker {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}
