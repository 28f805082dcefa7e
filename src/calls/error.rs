//! Call-related error types.

use crate::error::SendError;
use sigcore::calls::InvalidTransition;
use sigcore::protocol::EncodeError;
use sigcore::types::call::CallId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("another call is in progress: {0}")]
    Busy(CallId),

    #[error("missing required value: {0}")]
    MissingValue(&'static str),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] EncodeError),

    #[error("not connected")]
    NotConnected,
}

impl From<SendError> for CallError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NotConnected(_) => Self::NotConnected,
            SendError::Encode(e) => Self::Encode(e),
        }
    }
}
