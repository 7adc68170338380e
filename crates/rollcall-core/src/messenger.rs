use async_trait::async_trait;

use crate::errors::DeliveryError;
use crate::ids::ActorId;

/// Outbound side of the chat platform.
///
/// Implementations deliver one text message to one recipient. Failures are
/// per-recipient and never fatal to the caller.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, recipient: ActorId, text: &str) -> Result<(), DeliveryError>;
}
