//! # Remote Object Dispatcher
//!
//! Serves one live object graph over one channel. The root is either a
//! module's export table or a single bound instance. Each request names a
//! call path that is walked against the root before its verb applies:
//!
//! - **GET** reads the value at the path.
//! - **APPLY** calls the function at the path with the value one step
//!   short of it as the receiver.
//! - **CONSTRUCT** instantiates the class at the path and binds a new
//!   dispatcher to the instance on the channel the request brought along.
//!
//! Results marked with a transfer marker are exposed by reference: the
//! dispatcher opens a new channel, binds a dispatcher to the marked value
//! and sends a reference token in its place.
//!
//! Nothing user code does escapes to the transport. Thrown exceptions,
//! panics, unresolvable paths and unsendable results all become ERROR
//! replies.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use isowire::ChannelRef;
use isowire::ErrorPayload;
use isowire::Exception;
use isowire::Message;
use isowire::MessageType;
use isowire::Port;
use isowire::Transport;
use isowire::Value;
use isowire::transferables;
use tracing::debug;
use tracing::warn;

use crate::config::DispatchMode;
use crate::exports::ExportTable;
use crate::exports::Kind;
use crate::scope::Scope;

/// The root a dispatcher resolves call paths against.
pub(crate) enum Target {
    Module(Arc<ExportTable>),
    Instance(Value),
    /// A binding whose construction failed. Every request gets the error.
    Failed(ErrorPayload),
}

pub(crate) struct Dispatcher {
    name: String,
    target: Target,
    transport: Arc<dyn Transport>,
    scope: Scope,
}

/// A resolved call path: the value at the path, the value one step short
/// of it, and the export kind when the path names an export directly.
struct Resolution {
    receiver: Value,
    value: Value,
    kind: Option<Kind>,
}

impl Dispatcher {
    pub(crate) fn new(name: impl Into<String>, target: Target, transport: Arc<dyn Transport>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            target,
            transport,
            scope,
        }
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    /// Serves requests until the channel closes or the scope shuts down.
    /// Dropping the transport on return releases the binding.
    async fn run(self) {
        debug!(dispatcher = %self.name, "binding opened");
        let mut scope = self.scope.clone();
        let serial = scope.dispatch() == DispatchMode::Serial;
        let mut inflight: FuturesUnordered<BoxFuture<'_, ()>> = FuturesUnordered::new();
        let mut open = true;

        loop {
            let accepting = open && (!serial || inflight.is_empty());
            tokio::select! {
                biased;
                _ = scope.stopped() => {
                    debug!(dispatcher = %self.name, abandoned = inflight.len(), "shutting down");
                    break;
                }
                received = self.transport.recv(), if accepting => match received {
                    Ok(Some(message)) => inflight.push(self.serve(message).boxed()),
                    Ok(None) => open = false,
                    Err(e) => {
                        warn!(dispatcher = %self.name, error = %e, "transport error");
                        open = false;
                    }
                },
                Some(()) = inflight.next(), if !inflight.is_empty() => {}
            }
            if !open && inflight.is_empty() {
                break;
            }
        }

        debug!(dispatcher = %self.name, "binding released");
    }

    async fn serve(&self, message: Message) {
        let id = message.id;
        debug!(dispatcher = %self.name, %id, kind = %message.kind, path = ?message.call_path, "request");

        let reply = match AssertUnwindSafe(self.handle(message)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                debug!(dispatcher = %self.name, %id, error = %error.message, "request failed");
                Message::failure(id, error)
            }
            Err(panic) => {
                warn!(dispatcher = %self.name, %id, "request panicked");
                Message::failure(id, ErrorPayload::call(panic_message(panic)))
            }
        };

        self.reply(reply).await;
    }

    async fn reply(&self, reply: Message) {
        let id = reply.id;
        let transfer = transferables(reply.result.iter());

        match self.transport.send(reply, transfer).await {
            Ok(()) => {}
            Err(isowire::Error::Clone(e)) => {
                debug!(dispatcher = %self.name, %id, error = %e, "result could not be sent");
                let failure = Message::failure(id, Exception::from(e).into());
                if let Err(e) = self.transport.send(failure, Vec::new()).await {
                    debug!(dispatcher = %self.name, %id, error = %e, "error reply dropped");
                }
            }
            Err(e) => debug!(dispatcher = %self.name, %id, error = %e, "reply dropped"),
        }
    }

    async fn handle(&self, message: Message) -> Result<Message, ErrorPayload> {
        if let Target::Failed(error) = &self.target {
            return Err(error.clone());
        }

        match message.kind {
            MessageType::Get => {
                let resolution = self.resolve(&message.call_path)?;
                Ok(Message::reply(&message, self.expose(resolution.value)))
            }
            MessageType::Apply => self.apply(message).await,
            MessageType::Construct => self.construct(message),
            other => Err(ErrorPayload::protocol(format!("{} is not understood on a dispatcher channel", other))),
        }
    }

    async fn apply(&self, mut message: Message) -> Result<Message, ErrorPayload> {
        let arguments = std::mem::take(&mut message.arguments);
        let resolution = self.resolve(&message.call_path)?;

        let function = match resolution.value {
            Value::Function(f) => f,
            Value::Class(c) => {
                let e = Exception::type_error(format!("class constructor {} cannot be invoked without 'new'", c.name()));
                return Err(e.into());
            }
            other => {
                let e = Exception::type_error(format!("{} is not a function", describe(&message.call_path, &other)));
                return Err(e.into());
            }
        };

        let mut result = function.call(resolution.receiver, arguments).await?;
        if resolution.kind == Some(Kind::AsyncGenerator) {
            result = Value::transfer_proxy(result);
        }
        Ok(Message::reply(&message, self.expose(result)))
    }

    fn construct(&self, mut message: Message) -> Result<Message, ErrorPayload> {
        let Some(channel) = message.channel.take() else {
            return Err(ErrorPayload::protocol("CONSTRUCT request carries no instance channel"));
        };
        let port = channel.into_port();
        let name = format!("{}/{}", self.name, port.channel_id());
        let arguments = std::mem::take(&mut message.arguments);

        let outcome = self.resolve(&message.call_path).and_then(|resolution| match resolution.value {
            Value::Class(class) => std::panic::catch_unwind(AssertUnwindSafe(|| class.construct(arguments)))
                .unwrap_or_else(|panic| Err(Exception::new(panic_message(panic))))
                .map_err(ErrorPayload::from),
            other => {
                let e = Exception::type_error(format!("{} is not a constructor", describe(&message.call_path, &other)));
                Err(e.into())
            }
        });

        match outcome {
            Ok(instance) => {
                debug!(dispatcher = %self.name, instance = %name, "constructed");
                Self::new(name, Target::Instance(Value::Object(instance)), Arc::new(port), self.scope.clone()).spawn();
                Ok(Message::reply(&message, Value::Null))
            }
            Err(error) => {
                warn!(dispatcher = %self.name, instance = %name, error = %error.message, "construct failed");
                Self::new(name, Target::Failed(error.clone()), Arc::new(port), self.scope.clone()).spawn();
                Err(error)
            }
        }
    }

    /// Walks `path` from the root.
    fn resolve(&self, path: &[String]) -> Result<Resolution, ErrorPayload> {
        let (mut resolution, rest) = match &self.target {
            Target::Failed(error) => return Err(error.clone()),
            Target::Instance(value) => (Resolution { receiver: Value::Null, value: value.clone(), kind: None }, path),
            Target::Module(table) => match path.split_first() {
                None => (Resolution { receiver: Value::Null, value: table.to_value(), kind: None }, path),
                Some((name, rest)) => {
                    let export = table.get(name).ok_or_else(|| {
                        ErrorPayload::from(Exception::type_error(format!("module has no export named '{}'", name)))
                    })?;
                    let resolution = Resolution {
                        receiver: Value::Null,
                        value: export.value.clone(),
                        kind: Some(export.kind),
                    };
                    (resolution, rest)
                }
            },
        };

        for key in rest {
            let value = property(&resolution.value, key).ok_or_else(|| {
                let what = resolution.value.type_name();
                ErrorPayload::from(Exception::type_error(format!("cannot read property '{}' of {}", key, what)))
            })?;
            resolution = Resolution {
                receiver: std::mem::replace(&mut resolution.value, Value::Null),
                value,
                kind: None,
            };
        }

        Ok(resolution)
    }

    /// Replaces transfer markers with reference tokens, binding a new
    /// dispatcher to each marked value.
    fn expose(&self, value: Value) -> Value {
        match value {
            Value::Transfer(inner) => {
                let (local, remote) = Port::pair();
                let name = format!("{}/{}", self.name, local.channel_id());
                debug!(dispatcher = %self.name, proxy = %name, "exposing by reference");
                Self::new(name, Target::Instance(*inner), Arc::new(local), self.scope.clone()).spawn();
                Value::Remote(ChannelRef::new(remote))
            }
            Value::List(items) => Value::List(items.into_iter().map(|v| self.expose(v)).collect()),
            Value::Map(entries) => Value::Map(entries.into_iter().map(|(k, v)| (k, self.expose(v))).collect()),
            other => other,
        }
    }
}

/// Reads one property step. Own fields and prototype methods of objects,
/// map entries, list indices, and the few built-in lengths and names.
fn property(target: &Value, key: &str) -> Option<Value> {
    match target {
        Value::Object(object) => object.get(key),
        Value::Map(entries) => entries.get(key).cloned(),
        Value::List(items) if key == "length" => Some(items.len().into()),
        Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        Value::Str(s) if key == "length" => Some(s.chars().count().into()),
        Value::Buffer(buffer) if key == "byteLength" => Some(buffer.byte_length().into()),
        Value::Function(f) if key == "name" => Some(f.name().into()),
        Value::Class(c) if key == "name" => Some(c.name().into()),
        _ => None,
    }
}

fn describe(path: &[String], value: &Value) -> String {
    match path.last() {
        Some(name) => format!("'{}' ({})", name, value.type_name()),
        None => value.type_name().to_string(),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
