//! # Transport Abstraction
//!
//! A minimal, async interface for moving protocol messages between contexts.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The transport moves whole `Message`s in order. It
//!   knows nothing about call paths or correlation.
//! - **Move-Aware**: A send carries a transfer list; the transport relocates
//!   those items instead of copying them when it can.

use crate::error::Result;
use crate::message::Message;
use crate::port::ChannelId;
use crate::scan::Transferable;

/// An ordered, bidirectional message channel.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queues a message for the peer, moving the listed items.
    async fn send(&self, message: Message, transfer: Vec<Transferable>) -> Result<()>;

    /// Waits for the next inbound message.
    ///
    /// # invariants
    /// - Messages arrive in the order the peer sent them.
    /// - Returns `Ok(None)` once the peer has gone away.
    async fn recv(&self) -> Result<Option<Message>>;

    /// Identifies the channel for diagnostics, if the transport has one.
    fn channel_id(&self) -> Option<ChannelId> {
        None
    }
}
