//! Centralized error types for the Pulsecast core library.
//!
//! Every failure in the core is caught at the boundary of its operation -
//! per connection, per node exchange, per playback attempt - and converted
//! to a status value or log entry. Nothing here is fatal to the owning
//! process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::NodeHealth;

/// Errors from the player process manager.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The requested playback file does not exist on this node.
    ///
    /// Reported in the command response, never retried.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The audio directory could not be created or inspected.
    #[error("Audio directory unavailable: {path}")]
    AudioDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors decoding or encoding a protocol message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not a valid message.
    #[error("invalid message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer sent more bytes than a single message may occupy.
    #[error("message exceeds the {0} byte limit")]
    Oversized(usize),
}

/// Failure of a single controller-to-node exchange.
///
/// These never escalate past the node they belong to; the fan-out
/// dispatcher converts each into that node's observed health.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The connect-plus-exchange deadline elapsed.
    #[error("connection timed out")]
    Timeout,

    /// The node actively refused the connection.
    #[error("connection refused")]
    Refused,

    /// Any other transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The node answered with something that is not a valid response.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ExchangeError {
    /// Maps the failure to the node health the registry should record.
    pub fn health(&self) -> NodeHealth {
        match self {
            Self::Timeout => NodeHealth::TimedOut,
            Self::Refused => NodeHealth::Unreachable,
            Self::Io(_) | Self::Protocol(_) => NodeHealth::ErrorState,
        }
    }
}

/// Errors from the autonomous scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Auto-play cannot be enabled while the interval is zero.
    #[error("auto-play requires an interval greater than 0 minutes")]
    IntervalNotSet,
}

/// Errors loading or saving the persisted controller state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("state file is not valid: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors mutating the node registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Node names may be duplicated but never empty.
    #[error("node name and hostname are required")]
    MissingIdentity,
}

/// Convenient Result alias for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Convenient Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_errors_map_to_defined_health_values() {
        assert_eq!(ExchangeError::Timeout.health(), NodeHealth::TimedOut);
        assert_eq!(ExchangeError::Refused.health(), NodeHealth::Unreachable);
        let io = ExchangeError::Io(io::Error::other("boom"));
        assert_eq!(io.health(), NodeHealth::ErrorState);
    }

    #[test]
    fn file_not_found_message_names_the_file() {
        let err = PlayerError::FileNotFound("heartbeat.mp3".into());
        assert_eq!(err.to_string(), "File not found: heartbeat.mp3");
    }
}
