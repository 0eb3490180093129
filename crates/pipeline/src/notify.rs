use kesef_core::{StatementId, StatementStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::orchestrator::ProcessingStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub statement_id: StatementId,
    pub stage: ProcessingStage,
    pub status: StatementStatus,
    pub message: Option<String>,
}

/// Best-effort push mirror of statement status changes. Publishing never
/// fails and never blocks; a subscriber that falls behind misses updates and
/// has to poll.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    tx: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl StatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    pub fn publish(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            tracing::trace!("no status subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(stage: ProcessingStage) -> StatusUpdate {
        StatusUpdate {
            statement_id: StatementId(1),
            stage,
            status: stage.status(),
            message: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let notifier = StatusNotifier::default();
        let mut rx = notifier.subscribe();
        notifier.publish(update(ProcessingStage::Parsing));
        notifier.publish(update(ProcessingStage::Completed));
        assert_eq!(rx.recv().await.unwrap().stage, ProcessingStage::Parsing);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.status, StatementStatus::Completed);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        StatusNotifier::new(1).publish(update(ProcessingStage::Downloading));
    }
}
