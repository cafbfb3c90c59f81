use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;

use crate::execution::DecisionEngine;
use crate::models::MarketEvent;

/// Outcome of offering an event to the intake queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Queue full; the event was discarded.
    Dropped,
    /// The listener has shut down.
    Closed,
}

/// Producer side of the bounded inbound event queue.
///
/// Publishing never waits: when the queue is full the incoming event is
/// dropped and counted in `market_events_dropped`, so a burst from the
/// pattern source cannot stall its publisher.
#[derive(Clone)]
pub struct SignalIntake {
    tx: mpsc::Sender<MarketEvent>,
}

impl SignalIntake {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MarketEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: MarketEvent) -> Enqueued {
        counter!("market_events_total").increment(1);
        match self.tx.try_send(event) {
            Ok(()) => Enqueued::Accepted,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                counter!("market_events_dropped").increment(1);
                tracing::warn!(token_id = %dropped.token_id(), "Signal queue full, dropping event");
                Enqueued::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }
}

/// Run the signal listener loop. Receives market events and hands each to
/// the engine, one at a time, in arrival order.
pub async fn run_signal_listener(mut rx: mpsc::Receiver<MarketEvent>, engine: Arc<DecisionEngine>) {
    tracing::info!("Signal listener started");

    while let Some(event) = rx.recv().await {
        tracing::debug!(token_id = %event.token_id(), "Processing market event");
        let executed = engine.handle_market_event(&event).await;
        if executed > 0 {
            tracing::info!(token_id = %event.token_id(), executed, "Market event produced trades");
        }
    }

    tracing::warn!("Signal channel closed, listener shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertTriggered;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn alert() -> MarketEvent {
        MarketEvent::AlertTriggered(AlertTriggered {
            token_id: Uuid::new_v4(),
            alert_type: "volume_surge".into(),
            confidence: Decimal::from(70),
        })
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let (intake, mut rx) = SignalIntake::channel(2);
        let first = alert();
        let first_token = first.token_id();

        assert_eq!(intake.publish(first), Enqueued::Accepted);
        assert_eq!(intake.publish(alert()), Enqueued::Accepted);
        assert_eq!(intake.publish(alert()), Enqueued::Dropped);

        // Oldest event is still at the head
        let head = rx.try_recv().expect("queued event");
        assert_eq!(head.token_id(), first_token);
    }

    #[test]
    fn test_closed_queue() {
        let (intake, rx) = SignalIntake::channel(1);
        drop(rx);
        assert_eq!(intake.publish(alert()), Enqueued::Closed);
    }
}
