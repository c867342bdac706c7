use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::types::RemuxEvent;

/// Where the supervisor pushes lifecycle events. The sink is handed to the
/// supervisor at construction; there is no process-global subscriber state.
#[async_trait]
pub trait TaskEventSink: Send + Sync {
    async fn publish(&self, event: RemuxEvent);
}

/// Fan-out sink over a bounded broadcast channel. `subscribe` attaches an
/// observer from that moment onward; dropping the receiver detaches it.
/// With no receiver attached, published events are dropped silently.
pub struct BroadcastSink {
    sender: broadcast::Sender<RemuxEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RemuxEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl TaskEventSink for BroadcastSink {
    async fn publish(&self, event: RemuxEvent) {
        // a send error only means nobody is listening right now
        if self.sender.send(event).is_err() {
            trace!("no subscriber attached, event dropped");
        }
    }
}

/// Closure adapter for embedders that want a callback instead of a channel.
pub struct FunctionSink<F> {
    callback: F,
}

impl<F> FunctionSink<F>
where
    F: Fn(RemuxEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> TaskEventSink for FunctionSink<F>
where
    F: Fn(RemuxEvent) + Send + Sync,
{
    async fn publish(&self, event: RemuxEvent) {
        (self.callback)(event);
    }
}
