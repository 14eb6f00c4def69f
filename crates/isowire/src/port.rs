//! # Message Ports
//!
//! In-process channel endpoints with ordered, unbounded delivery.
//!
//! A `Port` is one end of an entangled pair. Posting a message structurally
//! clones its payload: listed buffers and ports are moved into the clone and
//! leave the sender's handles detached; everything else is copied.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::clone;
use crate::error::Error;
use crate::error::Result;
use crate::message::Message;
use crate::scan::Transferable;
use crate::transport::Transport;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Strong type for channel identifiers. Both ends of a pair share one id.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// A delivered message plus the resources that were moved with it.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    pub transfer: Vec<Transferable>,
}

pub(crate) struct Link {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

/// One end of a bidirectional channel.
#[derive(Clone)]
pub struct Port(Arc<PortInner>);

struct PortInner {
    channel: ChannelId,
    link: Mutex<Option<Link>>,
}

impl Port {
    /// Creates two entangled ports. Messages posted on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        let channel = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::attached(channel, Link {
            tx: tx_a,
            rx: Arc::new(tokio::sync::Mutex::new(rx_b)),
        });
        let b = Self::attached(channel, Link {
            tx: tx_b,
            rx: Arc::new(tokio::sync::Mutex::new(rx_a)),
        });

        (a, b)
    }

    fn attached(channel: ChannelId, link: Link) -> Self {
        Self(Arc::new(PortInner {
            channel,
            link: Mutex::new(Some(link)),
        }))
    }

    /// A port with no link yet, filled by `adopt` once a move commits.
    pub(crate) fn detached(channel: ChannelId) -> Self {
        Self(Arc::new(PortInner {
            channel,
            link: Mutex::new(None),
        }))
    }

    pub fn channel_id(&self) -> ChannelId {
        self.0.channel
    }

    pub fn is_detached(&self) -> bool {
        self.0.link.lock().is_none()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn take_link(&self) -> Option<Link> {
        self.0.link.lock().take()
    }

    pub(crate) fn adopt(&self, link: Link) {
        *self.0.link.lock() = Some(link);
    }

    /// Clones `message` and queues it for the peer, moving `transfer`.
    ///
    /// Fails without side effects if the payload cannot be cloned.
    pub fn post(&self, message: Message, transfer: &[Transferable]) -> Result<()> {
        let tx = {
            let link = self.0.link.lock();
            link.as_ref().ok_or(Error::Detached)?.tx.clone()
        };
        if tx.is_closed() {
            return Err(Error::Closed);
        }

        let (message, transfer) = clone::clone_message(&message, transfer)?;
        tracing::trace!(
            channel = %self.0.channel,
            id = %message.id,
            kind = %message.kind,
            moved = transfer.len(),
            "posting message"
        );
        tx.send(Envelope { message, transfer }).map_err(|_| Error::Closed)
    }

    /// Waits for the next envelope. Returns `None` once the peer is gone.
    pub async fn receive(&self) -> Result<Option<Envelope>> {
        let rx = {
            let link = self.0.link.lock();
            link.as_ref().ok_or(Error::Detached)?.rx.clone()
        };
        let mut rx = rx.lock().await;
        Ok(rx.recv().await)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("channel", &self.0.channel)
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[async_trait::async_trait]
impl Transport for Port {
    async fn send(&self, message: Message, transfer: Vec<Transferable>) -> Result<()> {
        self.post(message, &transfer)
    }

    async fn recv(&self) -> Result<Option<Message>> {
        Ok(self.receive().await?.map(|envelope| envelope.message))
    }

    fn channel_id(&self) -> Option<ChannelId> {
        Some(self.0.channel)
    }
}
