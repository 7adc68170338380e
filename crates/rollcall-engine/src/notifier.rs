//! Fan-out delivery through the messaging collaborator.
//!
//! Every recipient gets its own send bounded by a timeout, and all sends run
//! concurrently, so one stuck recipient never holds up the others. Failures
//! are logged and counted, never returned as errors.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use rollcall_core::{ActorId, DeliveryError, Messenger};

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(ActorId, DeliveryError)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

#[derive(Clone)]
pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(messenger: Arc<dyn Messenger>, timeout: Duration) -> Self {
        Self { messenger, timeout }
    }

    /// Send one message, bounded by the per-recipient timeout.
    pub async fn send(&self, recipient: ActorId, text: &str) -> Result<(), DeliveryError> {
        let send = self.messenger.send_message(recipient, text);
        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.timeout)),
        }
    }

    /// Send `text` to every recipient concurrently.
    pub async fn deliver_all(&self, recipients: &[ActorId], text: &str) -> DeliveryReport {
        let sends = recipients.iter().map(|&recipient| async move {
            (recipient, self.send(recipient, text).await)
        });

        let mut report = DeliveryReport::default();
        for (recipient, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        actor_id = %recipient,
                        kind = e.error_kind(),
                        error = %e,
                        "delivery failed"
                    );
                    report.failed.push((recipient, e));
                }
            }
        }
        debug!(delivered = report.delivered, failed = report.failed.len(), "fan-out finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::testing::RecordingMessenger;

    fn ids(raw: &[i64]) -> Vec<ActorId> {
        raw.iter().copied().map(ActorId::new).collect()
    }

    #[tokio::test]
    async fn delivers_to_everyone() {
        let messenger = Arc::new(RecordingMessenger::new());
        let notifier = Notifier::new(messenger.clone(), Duration::from_secs(1));

        let report = notifier.deliver_all(&ids(&[1, 2, 3]), "hello").await;

        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());
        assert_eq!(messenger.sent().len(), 3);
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_batch() {
        let messenger = Arc::new(RecordingMessenger::new());
        messenger.fail_for(ActorId::new(2));
        let notifier = Notifier::new(messenger.clone(), Duration::from_secs(1));

        let report = notifier.deliver_all(&ids(&[1, 2, 3]), "hello").await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ActorId::new(2));
        assert_eq!(report.attempted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_recipient_times_out_without_delaying_others() {
        let messenger = Arc::new(RecordingMessenger::new());
        messenger.hang_for(ActorId::new(1));
        let notifier = Notifier::new(messenger.clone(), Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        let report = notifier.deliver_all(&ids(&[1, 2, 3]), "hello").await;

        assert_eq!(report.delivered, 2);
        assert!(matches!(report.failed[0].1, DeliveryError::Timeout(_)));
        // Bounded by one timeout, not one per recipient.
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(messenger.sent_to(ActorId::new(2)).len(), 1);
    }

    #[tokio::test]
    async fn empty_recipient_list() {
        let notifier = Notifier::new(Arc::new(RecordingMessenger::new()), Duration::from_secs(1));
        let report = notifier.deliver_all(&[], "hello").await;
        assert_eq!(report.attempted(), 0);
    }
}
