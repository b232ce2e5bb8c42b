//! # Networking Error Types

use thiserror::Error;
use wraith_core::CoreError;

use crate::server::ConnectionId;

/// Errors raised by the replication layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// A codec, registry or history error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A received packet could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// A packet or call referenced a connection that does not exist.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A frame build was cancelled by a disconnect.
    #[error("frame build cancelled for connection {0}")]
    Cancelled(ConnectionId),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
