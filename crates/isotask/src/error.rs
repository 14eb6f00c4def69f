//! # Error Definitions
//!
//! What a caller sees when a remote operation does not produce a value.

use isowire::ErrorKind;
use isowire::ErrorPayload;
use thiserror::Error;

/// A failure reconstructed from an ERROR reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The module failed to load or threw while registering its exports.
    #[error("load error: {0}")]
    Load(RemoteError),
    /// The call path did not resolve or the callee threw.
    #[error("call error: {0}")]
    Call(RemoteError),
    /// The other side did not understand the request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The channel went away before a reply arrived.
    #[error("channel closed")]
    ChannelClosed,
    #[error("transport error: {0}")]
    Wire(#[from] isowire::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The remote message and stack, for load and call failures.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Load(e) | Self::Call(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorPayload> for Error {
    fn from(payload: ErrorPayload) -> Self {
        let remote = RemoteError {
            message: payload.message,
            stack: payload.stack,
        };
        match payload.kind {
            ErrorKind::Load => Self::Load(remote),
            ErrorKind::Call => Self::Call(remote),
            ErrorKind::Protocol => Self::Protocol(remote.message),
        }
    }
}
