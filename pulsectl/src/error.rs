//! Error types for the client facade

use pulse_mainloop::MainloopError;
use thiserror::Error;

use crate::types::EntityKind;

#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to the server did not reach the ready state
    #[error("connection failed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Connect { reason: Option<String> },

    /// The server completed the operation with a failure flag
    #[error("operation {op} failed (token {token})")]
    OperationFailed { op: &'static str, token: u64 },

    /// The call was rejected synchronously before reaching the server
    #[error("call rejected: {0}")]
    OperationInvalid(String),

    /// No entity with the given index exists
    #[error("no entity with index {0}")]
    Index(u32),

    /// No entity with the given name exists
    #[error("no entity named {0:?}")]
    NotFound(String),

    /// The connection is gone; reconnect before issuing further calls
    #[error("connection lost")]
    Disconnected,

    /// The operation does not apply to this entity kind
    #[error("{operation} is not supported for {kind:?}")]
    NotSupported {
        kind: EntityKind,
        operation: &'static str,
    },

    /// A user event callback and an event iterator cannot coexist
    #[error("an event callback and an event iterator cannot be active at once")]
    CallbackConflict,

    /// A blocking call was made from inside an event callback
    #[error("blocking call while the event loop is already being driven")]
    LoopReentrancy,

    /// The client was closed and cannot be used again
    #[error("client is closed")]
    Closed,

    #[error(transparent)]
    Mainloop(#[from] MainloopError),
}

pub type Result<T> = std::result::Result<T, Error>;
