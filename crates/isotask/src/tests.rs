//! Tests for the correlator, handles and dispatchers over in-memory ports.

use std::sync::Arc;
use std::time::Duration;

use isowire::ChannelId;
use isowire::Class;
use isowire::Exception;
use isowire::Function;
use isowire::Message;
use isowire::MessageType;
use isowire::Port;
use isowire::Prototype;
use isowire::Transferable;
use isowire::Transport;
use isowire::Value;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::DispatchMode;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::Target;
use crate::error::Error;
use crate::exports::Exports;
use crate::handle::RemoteHandle;
use crate::handle::Resolved;
use crate::peer::Peer;
use crate::scope::Scope;
use crate::worker::Worker;

/// Transport that records the type of every message it sends.
struct RecordingTransport {
    inner: Port,
    sent: Arc<Mutex<Vec<MessageType>>>,
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: Message, transfer: Vec<Transferable>) -> isowire::Result<()> {
        self.sent.lock().push(message.kind);
        self.inner.send(message, transfer).await
    }

    async fn recv(&self) -> isowire::Result<Option<Message>> {
        self.inner.recv().await
    }

    fn channel_id(&self) -> Option<ChannelId> {
        Some(self.inner.channel_id())
    }
}

fn counter() -> Class {
    let state = |this: &Value| -> Result<(isowire::Object, i64), Exception> {
        let object = this.as_object().ok_or_else(|| Exception::type_error("receiver is not an object"))?;
        let n = object.field("n").and_then(|v| v.as_int()).unwrap_or(0);
        Ok((object.clone(), n))
    };
    let prototype = Prototype::builder()
        .method(Function::sync("get", move |this, _| Ok(Value::Int(state(&this)?.1))))
        .method(Function::sync("increment", move |this, _| {
            let (object, n) = state(&this)?;
            object.set("n", n + 1);
            Ok(Value::Int(n + 1))
        }))
        .build();
    Class::new("Counter", prototype, |this, args| {
        this.set("n", args.first().cloned().unwrap_or(Value::Int(0)));
        Ok(())
    })
}

fn module() -> Exports {
    let mut exports = Exports::new();
    exports
        .class(counter())
        .function(Function::sync("echo", |_, args| Ok(Value::List(args))))
        .value("settings", Value::map([("depth", Value::Int(3))]));
    exports
}

fn serve(exports: Exports, transport: Port) {
    let scope = Scope::detached(DispatchMode::Concurrent);
    Dispatcher::new("test", Target::Module(Arc::new(exports.build())), Arc::new(transport), scope).spawn();
}

fn module_handle() -> RemoteHandle {
    let (client, server) = Port::pair();
    serve(module(), server);
    RemoteHandle::from_port(client)
}

fn value(resolved: Resolved) -> Value {
    resolved.into_value().expect("expected a copied value")
}

// --- Correlator ---

#[tokio::test]
async fn test_replies_in_any_order_reach_their_callers() {
    let (client, server) = Port::pair();
    let peer = Arc::new(Peer::new("client", Arc::new(client)));

    let calls: Vec<_> = (0..16)
        .map(|i| {
            let peer = peer.clone();
            tokio::spawn(async move {
                let request = Message::request(MessageType::Get, vec![format!("field{}", i)], Vec::new());
                peer.request(request, Vec::new()).await
            })
        })
        .collect();

    let mut received = Vec::new();
    for _ in 0..16 {
        received.push(server.recv().await.unwrap().unwrap());
    }
    received.shuffle(&mut StdRng::seed_from_u64(7));
    for request in &received {
        let reply = Message::reply(request, Value::from(request.call_path[0].clone()));
        server.send(reply, Vec::new()).await.unwrap();
    }

    for (i, call) in calls.into_iter().enumerate() {
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.result, Some(Value::from(format!("field{}", i))));
    }
    assert_eq!(peer.pending(), 0);
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let (client, server) = Port::pair();
    let peer = Arc::new(Peer::new("client", Arc::new(client)));

    let first = tokio::spawn({
        let peer = peer.clone();
        async move { peer.request(Message::request(MessageType::Get, vec!["a".into()], vec![]), vec![]).await }
    });
    let request = server.recv().await.unwrap().unwrap();
    server.send(Message::reply(&request, Value::Int(1)), vec![]).await.unwrap();
    server.send(Message::reply(&request, Value::Int(2)), vec![]).await.unwrap();
    assert_eq!(first.await.unwrap().unwrap().result, Some(Value::Int(1)));
    assert_eq!(peer.pending(), 0);

    let second = tokio::spawn({
        let peer = peer.clone();
        async move { peer.request(Message::request(MessageType::Get, vec!["b".into()], vec![]), vec![]).await }
    });
    let request = server.recv().await.unwrap().unwrap();
    server.send(Message::reply(&request, Value::Int(3)), vec![]).await.unwrap();
    assert_eq!(second.await.unwrap().unwrap().result, Some(Value::Int(3)));
}

#[tokio::test]
async fn test_error_reply_maps_to_error_kind() {
    let (client, server) = Port::pair();
    let peer = Arc::new(Peer::new("client", Arc::new(client)));

    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.request(Message::request(MessageType::Apply, vec!["f".into()], vec![]), vec![]).await }
    });
    let request = server.recv().await.unwrap().unwrap();
    let failure = Message::failure(request.id, isowire::ErrorPayload::call("boom").with_stack(Some("at f".into())));
    server.send(failure, vec![]).await.unwrap();

    let Err(Error::Call(e)) = call.await.unwrap() else {
        panic!("expected a call error");
    };
    assert_eq!(e.message, "boom");
    assert_eq!(e.stack.as_deref(), Some("at f"));
}

#[tokio::test]
async fn test_close_rejects_pending_requests() {
    let (client, server) = Port::pair();
    let peer = Arc::new(Peer::new("client", Arc::new(client)));

    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.request(Message::request(MessageType::Get, vec!["x".into()], vec![]), vec![]).await }
    });
    server.recv().await.unwrap().unwrap();
    drop(server);

    assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));
    let late = peer.request(Message::request(MessageType::Get, vec![], vec![]), vec![]).await;
    assert!(matches!(late, Err(Error::ChannelClosed)));
}

// --- Handles ---

#[tokio::test]
async fn test_property_access_records_without_sending() {
    let (client, server) = Port::pair();
    let handle = RemoteHandle::from_port(client);

    let chained = handle.prop("a").prop("b");
    assert_eq!(handle.path(), vec!["a", "b"]);
    assert_eq!(chained.path(), vec!["a", "b"]);
    assert!(handle.fork().path().is_empty());

    let call = tokio::spawn(handle.call(vec![Value::Int(1)]));
    assert!(handle.path().is_empty());

    let request = server.recv().await.unwrap().unwrap();
    assert_eq!(request.kind, MessageType::Apply);
    assert_eq!(request.call_path, vec!["a", "b"]);
    assert_eq!(request.arguments, vec![Value::Int(1)]);
    server.send(Message::reply(&request, Value::Null), vec![]).await.unwrap();
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_resolve_without_path_is_the_handle_itself() {
    let (client, server) = Port::pair();
    let handle = RemoteHandle::from_port(client);

    let resolved = handle.resolve().await.unwrap();
    assert!(resolved.into_handle().is_some());

    // Nothing was sent: the first message the server sees is the GET below.
    let get = tokio::spawn(handle.prop("x").resolve());
    let request = server.recv().await.unwrap().unwrap();
    assert_eq!(request.kind, MessageType::Get);
    assert_eq!(request.call_path, vec!["x"]);
    server.send(Message::reply(&request, Value::Int(9)), vec![]).await.unwrap();
    assert_eq!(value(get.await.unwrap().unwrap()), Value::Int(9));
}

#[tokio::test]
async fn test_fetch_sends_even_an_empty_path() {
    let (client, server) = Port::pair();
    let handle = RemoteHandle::from_port(client);

    let fetch = tokio::spawn(handle.fetch());
    let request = server.recv().await.unwrap().unwrap();
    assert_eq!(request.kind, MessageType::Get);
    assert!(request.call_path.is_empty());
    server.send(Message::reply(&request, Value::from("root")), vec![]).await.unwrap();
    assert_eq!(value(fetch.await.unwrap().unwrap()), Value::from("root"));
}

// --- Dispatcher ---

#[tokio::test]
async fn test_get_walks_nested_values() {
    let module = module_handle();
    let depth = module.prop("settings").prop("depth").resolve().await.unwrap();
    assert_eq!(value(depth), Value::Int(3));

    let name = module.prop("echo").prop("name").resolve().await.unwrap();
    assert_eq!(value(name), Value::from("echo"));
}

#[tokio::test]
async fn test_missing_property_is_a_call_error() {
    let module = module_handle();

    let err = module.prop("settings").prop("missing").resolve().await.unwrap_err();
    let Error::Call(e) = err else { panic!("expected a call error") };
    assert!(e.message.contains("missing"));

    let err = module.prop("nope").call(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Call(_)));
}

#[tokio::test]
async fn test_calling_a_non_function_is_a_call_error() {
    let module = module_handle();

    let err = module.prop("settings").call(vec![]).await.unwrap_err();
    assert!(err.remote().unwrap().message.contains("is not a function"));

    let err = module.prop("Counter").call(vec![]).await.unwrap_err();
    assert!(err.remote().unwrap().message.contains("without 'new'"));
}

#[tokio::test]
async fn test_unknown_message_type_is_a_protocol_error() {
    let (client, server) = Port::pair();
    serve(module(), server);
    let peer = Peer::new("client", Arc::new(client));

    let err = peer.request(Message::load("elsewhere"), vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn test_worker_rejects_non_load_requests() {
    let (client, server) = Port::pair();
    let scope = Scope::detached(DispatchMode::Concurrent);
    Worker::new(Default::default(), Arc::new(crate::loader::ModuleRegistry::new()), Arc::new(server), scope).spawn();
    let peer = Peer::new("client", Arc::new(client));

    let err = peer.request(Message::request(MessageType::Get, vec![], vec![]), vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn test_construct_uses_its_own_channel() {
    let (client, server) = Port::pair();
    serve(module(), server);
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = RecordingTransport { inner: client, sent: sent.clone() };
    let parent = RemoteHandle::new(Arc::new(Peer::new("parent", Arc::new(transport))));

    let instance = parent.prop("Counter").construct(vec![Value::Int(5)]);
    assert!(parent.path().is_empty());
    assert_ne!(instance.channel_id(), parent.channel_id());

    assert_eq!(value(instance.prop("increment").call(vec![]).await.unwrap()), Value::Int(6));
    assert_eq!(value(instance.prop("get").call(vec![]).await.unwrap()), Value::Int(6));
    assert_eq!(value(instance.prop("n").resolve().await.unwrap()), Value::Int(6));

    assert_eq!(*sent.lock(), vec![MessageType::Construct]);
}

#[tokio::test]
async fn test_failed_construct_poisons_the_instance() {
    let module = module_handle();

    let instance = module.prop("echo").construct(vec![]);
    let err = instance.prop("anything").call(vec![]).await.unwrap_err();
    let Error::Call(e) = err else { panic!("expected a call error") };
    assert!(e.message.contains("is not a constructor"));
}

#[tokio::test]
async fn test_binding_released_when_handle_dropped() {
    let sentinel = Arc::new(());
    let hook = sentinel.clone();
    let mut exports = Exports::new();
    exports.function(Function::sync("open", move |_, _| {
        let guard = hook.clone();
        let object = isowire::Object::new();
        object.set("hook", Function::sync("hook", move |_, _| Ok(Value::Int(Arc::strong_count(&guard) as i64))));
        Ok(Value::transfer_proxy(object))
    }));

    let (client, server) = Port::pair();
    serve(exports, server);
    let module = RemoteHandle::from_port(client);

    let proxy = module.prop("open").call(vec![]).await.unwrap().into_handle().unwrap();
    assert_eq!(Arc::strong_count(&sentinel), 3);

    drop(proxy);
    for _ in 0..100 {
        if Arc::strong_count(&sentinel) == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("binding was not released");
}
