//! # Request Correlator
//!
//! A `Peer` owns one end of a channel. It stamps each outgoing request with a
//! fresh id, parks a one-shot waiter under that id and lets a background pump
//! route every inbound reply to its waiter.
//!
//! ## Invariants
//! - Ids are never reused while the peer lives.
//! - A waiter is removed by the first reply carrying its id; later replies
//!   with the same id are dropped.
//! - When the channel closes every parked waiter fails with `ChannelClosed`.
//!
//! There are no timeouts: a request whose reply never comes stays pending
//! until the channel closes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use isowire::ChannelId;
use isowire::Message;
use isowire::RequestId;
use isowire::Transferable;
use isowire::Transport;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;

type Waiter = oneshot::Sender<Result<Message>>;

pub struct Peer {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<RequestId, Waiter>>,
    closed: Arc<AtomicBool>,
    seq_gen: AtomicU64,
    pump: JoinHandle<()>,
}

impl Peer {
    /// Creates a peer and spawns its pump. Must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let name = name.into();
        let pending: Arc<DashMap<RequestId, Waiter>> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn({
            let name = name.clone();
            let transport = transport.clone();
            let pending = pending.clone();
            let closed = closed.clone();
            async move {
                loop {
                    match transport.recv().await {
                        Ok(Some(message)) => Self::route(&name, message, &pending),
                        Ok(None) => {
                            debug!(peer = %name, "channel closed");
                            break;
                        }
                        Err(e) => {
                            warn!(peer = %name, error = %e, "transport error in pump");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                Self::notify_all_pending(&pending);
            }
        });

        Self {
            name,
            transport,
            pending,
            closed,
            seq_gen: AtomicU64::new(1),
            pump,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.transport.channel_id()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn notify_all_pending(pending: &DashMap<RequestId, Waiter>) {
        let keys: Vec<RequestId> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = pending.remove(&key) {
                let _ = tx.send(Err(Error::ChannelClosed));
            }
        }
    }

    fn route(name: &str, message: Message, pending: &DashMap<RequestId, Waiter>) {
        let Some((_, tx)) = pending.remove(&message.id) else {
            warn!(peer = %name, id = %message.id, kind = %message.kind, "reply with no pending request");
            return;
        };

        debug!(peer = %name, id = %message.id, kind = %message.kind, "reply");
        let result = match (message.is_error(), message.error.clone()) {
            (false, _) => Ok(message),
            (true, Some(payload)) => Err(Error::from(payload)),
            (true, None) => Err(Error::Protocol("error reply without an error payload".into())),
        };

        // The caller may have stopped waiting.
        let _ = tx.send(result);
    }

    /// Sends `message` under a fresh id and waits for the matching reply.
    ///
    /// Items in `transfer` are moved to the other side instead of copied.
    pub async fn request(&self, mut message: Message, transfer: Vec<Transferable>) -> Result<Message> {
        let id = RequestId(self.seq_gen.fetch_add(1, Ordering::Relaxed));
        message.id = id;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(Error::ChannelClosed);
        }

        debug!(peer = %self.name, %id, kind = %message.kind, path = ?message.call_path, "request");
        if let Err(e) = self.transport.send(message, transfer).await {
            self.pending.remove(&id);
            return Err(match e {
                isowire::Error::Closed => Error::ChannelClosed,
                other => Error::Wire(other),
            });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ChannelClosed),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .finish()
    }
}
