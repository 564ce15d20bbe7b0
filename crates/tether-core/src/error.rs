//! Client errors.

use crate::backend::BackendError;
use crate::state::{Action, ConnectionState};
use thiserror::Error;

/// Errors returned synchronously by [`crate::Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client was closed (or, at the C edge, the handle is unknown).
    #[error("Invalid handle: client is closed")]
    InvalidHandle,

    /// The operation is not legal in the current connection state.
    #[error("Cannot {action} while {state}")]
    InvalidState {
        /// Rejected operation.
        action: Action,
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// A required argument was empty or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The backend refused the request synchronously.
    #[error("Backend failure: {0}")]
    Backend(#[from] BackendError),
}

/// Coarse failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    InvalidHandle = 1,
    InvalidState = 2,
    InvalidArgument = 3,
    BackendFailure = 4,
}

impl ErrorKind {
    /// Numeric code reported by `tether_last_error`.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl ClientError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidHandle => ErrorKind::InvalidHandle,
            ClientError::InvalidState { .. } => ErrorKind::InvalidState,
            ClientError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ClientError::Backend(_) => ErrorKind::BackendFailure,
        }
    }
}
