//! # Deferred Call-Path Handles
//!
//! A `RemoteHandle` stands in for a value that lives behind a channel.
//! Property access only records names; a terminal verb (`call`, `construct`,
//! `resolve`, `fetch`) sends the whole recorded path as one request and
//! starts a fresh, empty path.
//!
//! Handles derived with `prop` share their path buffer with the handle they
//! came from, so `h.prop("a").prop("b")` and `h` see the same `["a", "b"]`.
//! Use `fork` for an independent path on the same channel.

use std::sync::Arc;

use futures::FutureExt;
use futures::Stream;
use futures::future::BoxFuture;
use isowire::ChannelId;
use isowire::ChannelRef;
use isowire::Message;
use isowire::MessageType;
use isowire::Port;
use isowire::Transferable;
use isowire::Value;
use isowire::transferables;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::peer::Peer;

#[derive(Clone)]
pub struct RemoteHandle {
    peer: Arc<Peer>,
    path: Arc<Mutex<Vec<String>>>,
}

/// What a terminal verb produced.
#[derive(Debug)]
pub enum Resolved {
    /// A copied value.
    Value(Value),
    /// A live remote reference.
    Handle(RemoteHandle),
}

impl Resolved {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Handle(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<RemoteHandle> {
        match self {
            Self::Handle(h) => Some(h),
            Self::Value(_) => None,
        }
    }
}

impl RemoteHandle {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            path: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wraps one end of a dedicated channel.
    pub fn from_port(port: Port) -> Self {
        let name = port.channel_id().to_string();
        Self::new(Arc::new(Peer::new(name, Arc::new(port))))
    }

    /// Records a property access. No request is sent.
    pub fn prop(&self, name: impl Into<String>) -> Self {
        self.path.lock().push(name.into());
        self.clone()
    }

    /// The names recorded since the last terminal verb.
    pub fn path(&self) -> Vec<String> {
        self.path.lock().clone()
    }

    /// A handle on the same channel with its own, empty path.
    pub fn fork(&self) -> Self {
        Self::new(self.peer.clone())
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.peer.channel_id()
    }

    fn take_path(&self) -> Vec<String> {
        std::mem::take(&mut *self.path.lock())
    }

    /// Invokes the function at the recorded path.
    ///
    /// The path is consumed when this is called, not when the future is
    /// first polled.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Resolved>> {
        let path = self.take_path();
        Self::send(self.peer.clone(), MessageType::Apply, path, args)
    }

    /// Constructs the class at the recorded path.
    ///
    /// Returns at once with a handle on the instance's own channel. The
    /// request is sent in the background; if construction fails, every
    /// operation on the returned handle fails with the construction error.
    pub fn construct(&self, args: Vec<Value>) -> RemoteHandle {
        let path = self.take_path();
        let (local, remote) = Port::pair();
        let instance = Self::from_port(local);

        let mut transfer = transferables(&args);
        transfer.push(Transferable::Port(remote.clone()));
        let request = Message::request(MessageType::Construct, path, args).with_channel(ChannelRef::new(remote));

        let peer = self.peer.clone();
        tokio::spawn(async move {
            if let Err(e) = peer.request(request, transfer).await {
                warn!(peer = %peer.name(), error = %e, "construct failed");
            }
        });

        instance
    }

    /// Resolves the handle the way awaiting it would.
    ///
    /// With no recorded path this is the handle itself and nothing is sent.
    /// Otherwise the recorded path is read with a GET.
    pub fn resolve(&self) -> BoxFuture<'static, Result<Resolved>> {
        let path = self.take_path();
        if path.is_empty() {
            return futures::future::ready(Ok(Resolved::Handle(self.clone()))).boxed();
        }
        Self::send(self.peer.clone(), MessageType::Get, path, Vec::new())
    }

    /// Reads the recorded path with a GET, even when it is empty.
    pub fn fetch(&self) -> BoxFuture<'static, Result<Resolved>> {
        let path = self.take_path();
        Self::send(self.peer.clone(), MessageType::Get, path, Vec::new())
    }

    fn send(
        peer: Arc<Peer>,
        kind: MessageType,
        path: Vec<String>,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Resolved>> {
        async move {
            let transfer = transferables(&args);
            let reply = peer.request(Message::request(kind, path, args), transfer).await?;
            Ok(hydrate(reply))
        }
        .boxed()
    }

    /// Drives a remote async iterator, yielding each value until it is done.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        futures::stream::try_unfold(self, |iterator| async move {
            let step = iterator
                .fork()
                .prop("next")
                .call(Vec::new())
                .await?
                .into_value()
                .ok_or_else(|| Error::Protocol("iterator step was not a value".into()))?;

            let done = step.get("done").and_then(Value::as_bool).unwrap_or(false);
            if done {
                return Ok(None);
            }
            let value = step.get("value").cloned().unwrap_or(Value::Null);
            Ok::<_, Error>(Some((value, iterator)))
        })
    }
}

/// Turns a success reply into what the caller sees. A reference token at
/// the top level becomes a new handle on the referenced channel.
fn hydrate(reply: Message) -> Resolved {
    match reply.result {
        Some(Value::Remote(channel)) => Resolved::Handle(RemoteHandle::from_port(channel.into_port())),
        Some(value) => Resolved::Value(value),
        None => Resolved::Value(Value::Null),
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("peer", &self.peer.name())
            .field("path", &*self.path.lock())
            .finish()
    }
}
