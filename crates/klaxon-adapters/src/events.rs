use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use klaxon_core::events::DomainEvent;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::EventPublisher;

/// In-process event channel. Publishing never waits for or depends on
/// listeners; with nobody subscribed events are simply dropped.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError> {
        for event in events {
            let event_type = event.event_type();
            if self.tx.send(event).is_err() {
                debug!(event_type, "no event subscribers");
            }
        }
        Ok(())
    }
}

/// Sends every batch to each sink in turn. A failing sink is logged and
/// does not stop the others.
pub struct FanoutPublisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new(sinks: Vec<Arc<dyn EventPublisher>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError> {
        if events.is_empty() {
            return Ok(());
        }
        for sink in &self.sinks {
            if let Err(e) = sink.publish(events.clone()).await {
                warn!(error = %e, count = events.len(), "event sink failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use klaxon_core::events::EscalationExhausted;
    use klaxon_core::ids::{IncidentId, PolicyId};

    fn event() -> DomainEvent {
        DomainEvent::EscalationExhausted(EscalationExhausted {
            incident_id: IncidentId::new(),
            policy_id: PolicyId::new(),
            occurred_at: chrono::DateTime::parse_from_rfc3339("2025-01-15T10:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        })
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingSink {
        async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError> {
            self.seen.lock().unwrap().extend(events);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl EventPublisher for BrokenSink {
        async fn publish(&self, _events: Vec<DomainEvent>) -> Result<(), PortError> {
            Err(PortError::Persistence("disk full".into()))
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let publisher = BroadcastPublisher::new(16);
        publisher.publish(vec![event(), event()]).await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();
        let (a, b) = (event(), event());

        publisher.publish(vec![a.clone(), b.clone()]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn fanout_survives_a_failing_sink() {
        let recorder = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn EventPublisher>> = vec![Arc::new(BrokenSink), recorder.clone()];
        let fanout = FanoutPublisher::new(sinks);

        fanout.publish(vec![event()]).await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
