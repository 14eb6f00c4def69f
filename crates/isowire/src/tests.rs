//! Tests for ports and the structured clone.

use crate::clone::structured_clone;
use crate::error::CloneError;
use crate::error::Error;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::RequestId;
use crate::object::Function;
use crate::object::Object;
use crate::port::Port;
use crate::scan::Transferable;
use crate::scan::transferables;
use crate::transport::Transport;
use crate::value::Buffer;
use crate::value::ChannelRef;
use crate::value::Value;

fn apply(args: Vec<Value>) -> Message {
    Message::request(MessageType::Apply, vec!["f".into()], args).with_id(RequestId(1))
}

// --- Ports ---

#[tokio::test]
async fn test_port_delivers_in_order() {
    let (a, b) = Port::pair();
    for i in 0..5 {
        a.send(apply(vec![Value::Int(i)]), vec![]).await.unwrap();
    }
    for i in 0..5 {
        let message = b.recv().await.unwrap().unwrap();
        assert_eq!(message.arguments, vec![Value::Int(i)]);
    }
}

#[tokio::test]
async fn test_both_ends_share_channel_id() {
    let (a, b) = Port::pair();
    let (c, _d) = Port::pair();
    assert_eq!(a.channel_id(), b.channel_id());
    assert_ne!(a.channel_id(), c.channel_id());
    assert_eq!(Transport::channel_id(&a), Some(a.channel_id()));
}

#[tokio::test]
async fn test_recv_ends_when_peer_dropped() {
    let (a, b) = Port::pair();
    drop(a);
    assert!(b.recv().await.unwrap().is_none());
    assert!(matches!(b.post(apply(vec![]), &[]), Err(Error::Closed)));
}

#[tokio::test]
async fn test_moved_buffer_is_detached_on_sender() {
    let (a, b) = Port::pair();
    let buffer = Buffer::new(vec![1, 2, 3]);
    let transfer = transferables([&Value::Buffer(buffer.clone())]);

    a.post(apply(vec![buffer.clone().into()]), &transfer).unwrap();

    assert!(buffer.is_detached());
    assert_eq!(buffer.byte_length(), 0);

    let envelope = b.receive().await.unwrap().unwrap();
    let received = envelope.message.arguments[0].as_buffer().unwrap().clone();
    assert_eq!(received.to_vec(), vec![1, 2, 3]);
    assert_eq!(envelope.transfer, vec![Transferable::Buffer(received)]);
}

#[tokio::test]
async fn test_unlisted_buffer_is_copied() {
    let (a, b) = Port::pair();
    let buffer = Buffer::new(vec![9; 4]);

    a.post(apply(vec![buffer.clone().into()]), &[]).unwrap();
    let message = b.recv().await.unwrap().unwrap();

    assert_eq!(buffer.byte_length(), 4);
    let copy = message.arguments[0].as_buffer().unwrap();
    assert!(!copy.ptr_eq(&buffer));
    copy.update(|bytes| bytes[0] = 0);
    assert_eq!(buffer.to_vec(), vec![9; 4]);
}

#[tokio::test]
async fn test_moved_port_keeps_working_on_receiver() {
    let (a, b) = Port::pair();
    let (inner_local, inner_remote) = Port::pair();

    let value = Value::Port(inner_remote.clone());
    a.post(apply(vec![value.clone()]), &transferables([&value])).unwrap();
    assert!(inner_remote.is_detached());
    assert!(matches!(inner_remote.post(apply(vec![]), &[]), Err(Error::Detached)));

    let message = b.recv().await.unwrap().unwrap();
    let Value::Port(received) = &message.arguments[0] else {
        panic!("expected a port");
    };
    received.post(apply(vec![Value::from("pong")]), &[]).unwrap();

    let reply = inner_local.recv().await.unwrap().unwrap();
    assert_eq!(reply.arguments, vec![Value::from("pong")]);
}

#[tokio::test]
async fn test_channel_field_moves_with_message() {
    let (a, b) = Port::pair();
    let (_local, remote) = Port::pair();
    let message = apply(vec![]).with_channel(ChannelRef::new(remote.clone()));

    a.post(message, &[Transferable::Port(remote.clone())]).unwrap();
    let received = b.recv().await.unwrap().unwrap();

    assert!(remote.is_detached());
    let channel = received.channel.unwrap();
    assert!(!channel.port().is_detached());
    assert_eq!(channel.id(), remote.channel_id());
}

#[tokio::test]
async fn test_failed_clone_detaches_nothing() {
    let (a, _b) = Port::pair();
    let buffer = Buffer::zeroed(3);
    let args = vec![
        buffer.clone().into(),
        Function::sync("f", |_, _| Ok(Value::Null)).into(),
    ];
    let transfer = transferables(&args);

    let err = a.post(apply(args), &transfer).unwrap_err();
    assert!(matches!(err, Error::Clone(CloneError::Uncloneable("function"))));
    assert_eq!(buffer.byte_length(), 3);
}

// --- Structured clone ---

#[test]
fn test_object_clones_to_map_of_fields() {
    let object = Object::from_fields([("a", Value::Int(1)), ("b", Value::from("two"))]);
    let (clone, moved) = structured_clone(&Value::Object(object), &[]).unwrap();
    assert!(moved.is_empty());
    assert_eq!(clone, Value::map([("a", Value::Int(1)), ("b", Value::from("two"))]));
}

#[test]
fn test_cyclic_object_is_rejected() {
    let object = Object::new();
    object.set("me", object.clone());
    let err = structured_clone(&Value::Object(object), &[]).unwrap_err();
    assert_eq!(err, CloneError::Cyclic);
}

#[test]
fn test_shared_object_is_not_a_cycle() {
    let leaf = Object::from_fields([("x", 1)]);
    let value = Value::List(vec![leaf.clone().into(), leaf.into()]);
    let (clone, _) = structured_clone(&value, &[]).unwrap();
    assert_eq!(clone.as_list().unwrap().len(), 2);
}

#[test]
fn test_unlisted_port_is_rejected() {
    let (port, _other) = Port::pair();
    let err = structured_clone(&Value::Port(port), &[]).unwrap_err();
    assert_eq!(err, CloneError::PortNotTransferred);
}

#[test]
fn test_detached_transfer_item_is_rejected() {
    let buffer = Buffer::zeroed(1);
    let item = Transferable::Buffer(buffer.clone());
    structured_clone(&Value::Buffer(buffer.clone()), std::slice::from_ref(&item)).unwrap();
    let err = structured_clone(&Value::Buffer(buffer), &[item]).unwrap_err();
    assert_eq!(err, CloneError::AlreadyDetached("buffer"));
}

#[test]
fn test_aliased_buffer_stays_aliased() {
    let buffer = Buffer::new(vec![5]);
    let value = Value::List(vec![buffer.clone().into(), buffer.into()]);
    let (clone, _) = structured_clone(&value, &[]).unwrap();
    let items = clone.as_list().unwrap();
    assert!(items[0].as_buffer().unwrap().ptr_eq(items[1].as_buffer().unwrap()));
}

#[test]
fn test_transfer_marker_is_not_cloneable() {
    let value = Value::transfer_proxy(Object::new());
    let err = structured_clone(&value, &[]).unwrap_err();
    assert_eq!(err, CloneError::Uncloneable("transfer marker"));
}
