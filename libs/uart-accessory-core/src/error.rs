use std::io;

use thiserror::Error;

use crate::{connection::ConnectionState, reader::ReadTermination};

#[derive(Debug, Error)]
pub enum AccessoryError {
    #[error("No accessory found")]
    NoAccessoryFound,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Failed to open streams: {0}")]
    StreamOpenFailed(#[source] io::Error),
    #[error("Failed to properly close accessory: {0}")]
    StreamCloseFailed(#[source] io::Error),
    #[error("Sending data failed: {0}")]
    SendFailed(#[source] io::Error),
    #[error("Accessory read loop terminated: {0}")]
    ReadTerminated(ReadTermination),
    #[error("Failed to start accessory reader: {0}")]
    ReaderSpawnFailed(#[source] io::Error),
    #[error("Invalid connection state transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl AccessoryError {
    /// Whether the connection is left `Closed` after this error.
    ///
    /// Close and send failures are reported but leave the state alone.
    pub fn forces_close(&self) -> bool {
        !matches!(
            self,
            AccessoryError::StreamCloseFailed(_)
                | AccessoryError::SendFailed(_)
                | AccessoryError::InvalidTransition { .. }
        )
    }
}
