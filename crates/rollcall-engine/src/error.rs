use rollcall_core::ActorId;
use rollcall_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no workflow in progress for actor {0}")]
    NoSession(ActorId),

    #[error("workflow for actor {0} expired")]
    SessionExpired(ActorId),

    /// The input does not fit the current step. The session is kept.
    #[error("unexpected input, expected {expected}")]
    UnexpectedInput { expected: &'static str },

    #[error("timer subsystem unavailable: {0}")]
    TimerUnavailable(String),
}

impl EngineError {
    /// Whether the failure comes from the persistence layer being
    /// unreachable rather than from the request itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_unavailable())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }
}
