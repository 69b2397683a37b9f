//! The synchronizer's typed error taxonomy.
//!
//! Every failure the core can raise falls into one of the kinds named in the design: bad
//! input never tears anything down, transient/graceful/protocol failures all terminate the
//! supervising task group, but only a [`SyncError::ProtocolViolation`] or an unresolved
//! [`SyncError::GracefulDisconnect`] should ever be logged at `error` level (see
//! [`SyncError::log_level`]).

use thiserror::Error;
use tracing::Level;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A caller passed `add`/`add_asset` something that isn't a valid address/asset name.
    /// Raised synchronously; never tears down the synchronizer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An RPC call failed in a way that isn't one of the known graceful-disconnect cases.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A controlled, expected termination: the outer layer should pick a new server.
    #[error("graceful disconnect: {0}")]
    GracefulDisconnect(String),

    /// A server-supplied payload violated a hard invariant (bad txid, stale-status timeout).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl SyncError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn graceful_disconnect(msg: impl Into<String>) -> Self {
        Self::GracefulDisconnect(msg.into())
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether this failure should disconnect the synchronizer and trigger a server reselect.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::InvalidInput(_))
    }

    /// The tracing level a supervisor should log this error at.
    pub fn log_level(&self) -> Level {
        match self {
            SyncError::InvalidInput(_) => Level::WARN,
            SyncError::Rpc(_) => Level::WARN,
            SyncError::GracefulDisconnect(_) | SyncError::ProtocolViolation(_) => Level::ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
