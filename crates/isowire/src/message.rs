//! # Protocol Messages
//!
//! One envelope shape carries every request and reply.
//!
//! ## Invariants
//! - A reply carries the id of the request it answers.
//! - A success reply echoes the request type and carries `result`.
//! - A failure reply has type `Error` and carries `error`.

use std::fmt;

use crate::error::Exception;
use crate::value::ChannelRef;
use crate::value::Value;

/// Correlates a request with its reply. Unique per channel.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum MessageType {
    Load,
    Get,
    Apply,
    Construct,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::Get => "GET",
            Self::Apply => "APPLY",
            Self::Construct => "CONSTRUCT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer a remote failure came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The module failed to load.
    Load,
    /// The call path failed to resolve or the callee threw.
    Call,
    /// The receiver did not understand the message.
    Protocol,
}

/// The `error` field of a failure reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), stack: None }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Load, message)
    }

    pub fn call(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Call, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }
}

impl From<Exception> for ErrorPayload {
    fn from(e: Exception) -> Self {
        Self::call(e.message).with_stack(e.stack)
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub id: RequestId,
    pub kind: MessageType,
    /// Property chain resolved before the verb applies.
    pub call_path: Vec<String>,
    /// Arguments for APPLY and CONSTRUCT.
    pub arguments: Vec<Value>,
    /// Present on success replies.
    pub result: Option<Value>,
    /// Present on failure replies.
    pub error: Option<ErrorPayload>,
    /// Module path for LOAD.
    pub path: Option<String>,
    /// Dedicated channel handed over with CONSTRUCT requests and LOAD replies.
    pub channel: Option<ChannelRef>,
}

impl Message {
    /// A request with an unassigned id; the correlator stamps it before sending.
    pub fn request(kind: MessageType, call_path: Vec<String>, arguments: Vec<Value>) -> Self {
        Self {
            id: RequestId(0),
            kind,
            call_path,
            arguments,
            result: None,
            error: None,
            path: None,
            channel: None,
        }
    }

    pub fn load(path: impl Into<String>) -> Self {
        let mut message = Self::request(MessageType::Load, Vec::new(), Vec::new());
        message.path = Some(path.into());
        message
    }

    /// A success reply to `request`.
    pub fn reply(request: &Message, result: Value) -> Self {
        let mut message = Self::request(request.kind, Vec::new(), Vec::new());
        message.id = request.id;
        message.result = Some(result);
        message
    }

    /// A failure reply to the request with `id`.
    pub fn failure(id: RequestId, error: ErrorPayload) -> Self {
        let mut message = Self::request(MessageType::Error, Vec::new(), Vec::new());
        message.id = id;
        message.error = Some(error);
        message
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_channel(mut self, channel: ChannelRef) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageType::Error || self.error.is_some()
    }
}
