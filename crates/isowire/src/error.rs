//! # Error Definitions
//!
//! Failures of the data plane: channels that went away, payloads that cannot
//! be cloned, and the exceptions user code throws.

use std::backtrace::Backtrace;
use std::backtrace::BacktraceStatus;

use thiserror::Error;

/// Channel-level failures.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The peer endpoint was dropped.
    #[error("channel closed")]
    Closed,
    /// The port was moved to another context and can no longer be used here.
    #[error("port is detached")]
    Detached,
    /// The message payload could not be cloned.
    #[error("value could not be cloned: {0}")]
    Clone(#[from] CloneError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a value cannot cross a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloneError {
    /// Functions, classes and transfer markers only exist on one side.
    #[error("{0} could not be cloned")]
    Uncloneable(&'static str),
    /// An object refers back to itself.
    #[error("cyclic object could not be cloned")]
    Cyclic,
    /// Ports can only be moved, never copied.
    #[error("port must be listed in the transfer list to be sent")]
    PortNotTransferred,
    /// A transfer list item was already moved elsewhere.
    #[error("{0} is already detached")]
    AlreadyDetached(&'static str),
}

/// An error thrown by user code running behind a channel.
///
/// The stack is best-effort: it is only present when backtraces are enabled
/// (`RUST_BACKTRACE`) or when the thrower supplies one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Exception {
    pub message: String,
    pub stack: Option<String>,
}

impl Exception {
    /// Creates an exception, capturing a backtrace if enabled.
    pub fn new(message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self { message: message.into(), stack }
    }

    /// Creates an exception in the style of a type error.
    pub fn type_error(message: impl std::fmt::Display) -> Self {
        Self::new(format!("TypeError: {}", message))
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl From<CloneError> for Exception {
    fn from(e: CloneError) -> Self {
        Self::new(format!("DataCloneError: {}", e))
    }
}
