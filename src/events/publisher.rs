use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use super::payloads::DomainEvent;

/// Fan-out sink for domain events
///
/// Delivery is the subscribers' concern (audit log, UI push, billing). Publishing
/// with nobody listening is not an error, and a lagging subscriber only loses
/// its own backlog.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    published: Arc<AtomicU64>,
}

/// A domain event as seen by subscribers
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event payload could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PublishError> for crate::error::NavetteError {
    fn from(error: PublishError) -> Self {
        crate::error::NavetteError::Event(error.to_string())
    }
}

impl EventPublisher {
    /// `capacity` bounds how far a subscriber may fall behind; zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let (sender, _initial_receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serialize a typed domain event and fan it out
    pub async fn publish_event(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let context = event.context()?;
        self.publish(event.name(), context).await
    }

    /// Fan out an already-serialized event
    pub async fn publish(
        &self,
        name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: name.into(),
            context,
            published_at: Utc::now(),
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        // Err only means nobody is subscribed right now
        if let Err(broadcast::error::SendError(unheard)) = self.sender.send(event) {
            tracing::trace!(event = %unheard.name, "No subscribers for domain event");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events published since creation, heard or not
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::defaults::EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::payloads::ConversionConflictPayload;

    #[tokio::test]
    async fn test_unheard_events_still_count() {
        let publisher = EventPublisher::new(8);
        publisher
            .publish("fiche_navette.test", serde_json::json!({"id": 1}))
            .await
            .unwrap();
        assert_eq!(publisher.published_count(), 1);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_does_not_panic() {
        let publisher = EventPublisher::new(0);
        let mut receiver = publisher.subscribe();
        publisher
            .publish("fiche_navette.test", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(receiver.recv().await.unwrap().name, "fiche_navette.test");
    }

    #[tokio::test]
    async fn test_typed_event_reaches_subscriber() {
        let publisher = EventPublisher::new(8);
        let mut receiver = publisher.subscribe();

        let event = DomainEvent::ConversionConflict(ConversionConflictPayload {
            fiche_navette_id: 3,
            package_id: 100,
            doctor_ids: vec![7, 8],
        });
        publisher.publish_event(&event).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name, "fiche_navette.conversion_conflict");
        assert_eq!(received.context["fiche_navette_id"], 3);
        assert_eq!(received.context["doctor_ids"], serde_json::json!([7, 8]));
    }
}
