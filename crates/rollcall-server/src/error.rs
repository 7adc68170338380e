use rollcall_core::ActorId;
use rollcall_engine::EngineError;
use rollcall_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("actor {actor} is not allowed to {action}")]
    Forbidden { actor: ActorId, action: &'static str },

    #[error("malformed request: {0}")]
    Malformed(String),

    /// Every worker has exited; nothing will process further actions.
    #[error("action queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        Self::Engine(EngineError::Store(e))
    }
}

impl ServerError {
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Engine(e) if e.is_storage())
    }
}
