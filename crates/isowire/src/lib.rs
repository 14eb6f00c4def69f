//! # isowire
//!
//! The data plane for proxying calls into an isolated context.
//!
//! ## Architecture
//!
//! - **Value**: the closed set of shapes a payload can take, live or copied.
//! - **Message**: the single request/reply envelope of the protocol.
//! - **Scanner**: finds the buffers and ports a payload must move.
//! - **Structured clone**: copies a payload, moving the listed resources.
//! - **Port / Transport**: ordered channels that deliver cloned messages.

pub mod clone;
pub mod error;
pub mod message;
pub mod object;
pub mod port;
pub mod scan;
pub mod transport;
pub mod value;

#[cfg(test)]
mod tests;

pub use clone::structured_clone;
pub use error::CloneError;
pub use error::Error;
pub use error::Exception;
pub use error::Result;
pub use message::ErrorKind;
pub use message::ErrorPayload;
pub use message::Message;
pub use message::MessageType;
pub use message::RequestId;
pub use object::CallResult;
pub use object::Class;
pub use object::Function;
pub use object::Object;
pub use object::Prototype;
pub use port::ChannelId;
pub use port::Envelope;
pub use port::Port;
pub use scan::Transferable;
pub use scan::transferables;
pub use transport::Transport;
pub use value::Buffer;
pub use value::ChannelRef;
pub use value::Value;
