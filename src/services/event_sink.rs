use tokio::sync::broadcast;

use crate::models::EngineEvent;

/// Receives engine notifications for downstream transport.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Fans events out over a broadcast channel. Slow subscribers lag and lose
/// the oldest events; publishing never blocks the engine.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: EngineEvent) {
        // Err only means nobody is listening
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}
