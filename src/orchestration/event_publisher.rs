//! # Progress Event Publisher
//!
//! Push-based delivery of progress events to external sinks (a UI, a log
//! shipper). Publishing is fire-and-forget from the orchestrator's
//! perspective: a sink that is gone or lagging must never fail the batch.

use tokio::sync::broadcast;
use tracing::debug;

use crate::orchestration::types::ProgressEvent;

/// Default buffered event capacity per subscriber
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Broadcast-based publisher for [`ProgressEvent`]s
#[derive(Debug, Clone)]
pub struct ProgressEventPublisher {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream. Slow subscribers lag and lose old
    /// events rather than applying backpressure to the orchestrator.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A send error only means there are currently no
    /// subscribers, which is a normal condition.
    pub fn publish(&self, event: ProgressEvent) {
        if let Err(err) = self.sender.send(event) {
            debug!(error = %err, "EVENTS: No active subscribers, event dropped");
        }
    }
}

impl Default for ProgressEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let publisher = ProgressEventPublisher::new();
        publisher.publish(ProgressEvent::JobCancelled {
            job_id: Uuid::new_v4(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = ProgressEventPublisher::new();
        let mut receiver = publisher.subscribe();
        let job_id = Uuid::new_v4();

        publisher.publish(ProgressEvent::JobStarted {
            job_id,
            total_items: 5,
            started_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            ProgressEvent::JobStarted {
                job_id: received,
                total_items,
                ..
            } => {
                assert_eq!(received, job_id);
                assert_eq!(total_items, 5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
