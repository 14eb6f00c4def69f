//! # Transferable Scanner
//!
//! Finds every payload item inside a value tree that has to be moved rather
//! than copied: buffers and channel endpoints.
//!
//! ## Invariants
//! - Every enumerable position is visited: list items, map entries and
//!   object own fields. Strings and other scalars are leaves.
//! - Each shared node (object, buffer, port) is visited at most once, so
//!   cyclic object graphs terminate and aliased resources are reported once.

use std::collections::HashSet;

use crate::port::Port;
use crate::value::Buffer;
use crate::value::Value;

/// A payload item that is relocated instead of copied.
#[derive(Clone, Debug)]
pub enum Transferable {
    Buffer(Buffer),
    Port(Port),
}

impl Transferable {
    /// Identity of the underlying resource.
    pub(crate) fn addr(&self) -> usize {
        match self {
            Self::Buffer(b) => b.addr(),
            Self::Port(p) => p.addr(),
        }
    }

    pub fn is_detached(&self) -> bool {
        match self {
            Self::Buffer(b) => b.is_detached(),
            Self::Port(p) => p.is_detached(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Port(_) => "port",
        }
    }
}

impl PartialEq for Transferable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => a.ptr_eq(b),
            (Self::Port(a), Self::Port(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Collects the movable items reachable from `roots`, in visit order.
pub fn transferables<'a>(roots: impl IntoIterator<Item = &'a Value>) -> Vec<Transferable> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<Value> = roots.into_iter().cloned().collect();
    stack.reverse();

    while let Some(value) = stack.pop() {
        match value {
            Value::List(items) => stack.extend(items.into_iter().rev()),
            Value::Map(entries) => stack.extend(entries.into_values().rev()),
            Value::Object(object) => {
                if visited.insert(object.addr()) {
                    stack.extend(object.fields().into_values().rev());
                }
            }
            Value::Buffer(buffer) => {
                if visited.insert(buffer.addr()) {
                    found.push(Transferable::Buffer(buffer));
                }
            }
            Value::Port(port) => {
                if visited.insert(port.addr()) {
                    found.push(Transferable::Port(port));
                }
            }
            Value::Remote(channel) => {
                let port = channel.into_port();
                if visited.insert(port.addr()) {
                    found.push(Transferable::Port(port));
                }
            }
            // Markers are replaced before a result is sent; functions and
            // classes hold nothing enumerable.
            Value::Transfer(_) | Value::Function(_) | Value::Class(_) => {}
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
        }
    }

    found
}
