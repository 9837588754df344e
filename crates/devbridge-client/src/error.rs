use devbridge_core::{CodecError, ParamError};
use tokio_tungstenite::tungstenite;

/// Errors from the bridge channel and transports.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("channel has been closed")]
    Closed,
    #[error("a connection attempt is already in progress")]
    InProgress,
}

/// Why a capability command could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} extension is not found")]
    NotInstalled(String),
    #[error("{0}")]
    Capability(String),
    #[error("{0} handler panicked")]
    Panicked(String),
    #[error("unsupported agent target: {0}")]
    UnsupportedTarget(String),
}

/// Failure of the task-update surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskUpdateError {
    #[error(transparent)]
    InvalidParams(#[from] ParamError),
    #[error("Failed to send task update: {0}")]
    Delivery(String),
}
