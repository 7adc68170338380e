//! In-process [`Messenger`] that records deliveries.
//!
//! Used by unit tests across the workspace and by the end-to-end scenarios.
//! Individual recipients can be told to fail or to never answer.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::DeliveryError;
use crate::ids::ActorId;
use crate::messenger::Messenger;

#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ActorId, String)>>,
    failing: Mutex<HashSet<ActorId>>,
    hanging: Mutex<HashSet<ActorId>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message to `recipient`.
    pub fn fail_for(&self, recipient: ActorId) {
        self.failing.lock().insert(recipient);
    }

    /// Never complete a send to `recipient`.
    pub fn hang_for(&self, recipient: ActorId) {
        self.hanging.lock().insert(recipient);
    }

    /// Successful deliveries, in completion order.
    pub fn sent(&self) -> Vec<(ActorId, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, recipient: ActorId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == recipient)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, recipient: ActorId, text: &str) -> Result<(), DeliveryError> {
        if self.hanging.lock().contains(&recipient) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().contains(&recipient) {
            return Err(DeliveryError::Rejected(format!("blocked by {recipient}")));
        }
        self.sent.lock().push((recipient, text.to_string()));
        Ok(())
    }
}
