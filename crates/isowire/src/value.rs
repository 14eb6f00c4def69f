//! # Values
//!
//! The closed set of shapes that can live on either side of a channel.
//!
//! Data variants (`Null` through `Map`) are copied when they cross. `Buffer`
//! and `Port` are identity-bearing handles that can be moved instead.
//! `Object`, `Function` and `Class` are live and only meaningful in the
//! context that owns them; `Transfer` marks a live value for by-reference
//! exposure and `Remote` is the token that replaces it on the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::object::Class;
use crate::object::Function;
use crate::object::Object;
use crate::port::ChannelId;
use crate::port::Port;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Buffer(Buffer),
    Port(Port),
    Remote(ChannelRef),
    Object(Object),
    Function(Function),
    Class(Class),
    /// Expose the inner value by reference rather than by copy.
    Transfer(Box<Value>),
}

impl Value {
    /// Marks a value to be exposed through its own channel when returned.
    pub fn transfer_proxy(value: impl Into<Value>) -> Self {
        Self::Transfer(Box::new(value.into()))
    }

    /// Builds a map from key/value pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Buffer(_) => "buffer",
            Self::Port(_) => "port",
            Self::Remote(_) => "remote",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Class(_) => "class",
            Self::Transfer(_) => "transfer marker",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Looks up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a.ptr_eq(b) || a.to_vec() == b.to_vec(),
            (Self::Port(a), Self::Port(b)) => a.ptr_eq(b),
            (Self::Remote(a), Self::Remote(b)) => a.port().ptr_eq(b.port()),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Class(a), Self::Class(b)) => a.ptr_eq(b),
            (Self::Transfer(a), Self::Transfer(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f.debug_map().entries(entries).finish(),
            Self::Buffer(b) => write!(f, "Buffer({} bytes)", b.byte_length()),
            Self::Port(p) => write!(f, "Port({})", p.channel_id()),
            Self::Remote(r) => write!(f, "Remote({})", r.id()),
            Self::Object(o) => write!(f, "Object({:?})", o.keys()),
            Self::Function(func) => write!(f, "Function({})", func.name()),
            Self::Class(c) => write!(f, "Class({})", c.name()),
            Self::Transfer(inner) => write!(f, "Transfer({:?})", inner),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self { Self::Int(i as i64) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self { Self::Int(i as i64) }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Self::Float(x) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Str(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Self::List(items) }
}

impl From<Buffer> for Value {
    fn from(b: Buffer) -> Self { Self::Buffer(b) }
}

impl From<Port> for Value {
    fn from(p: Port) -> Self { Self::Port(p) }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self { Self::Object(o) }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self { Self::Function(func) }
}

impl From<Class> for Value {
    fn from(c: Class) -> Self { Self::Class(c) }
}

/// A shared block of bytes that can be moved across a channel.
///
/// Clones share the same storage. Once moved, every clone observes a
/// detached, zero-length buffer.
#[derive(Clone)]
pub struct Buffer(Arc<Mutex<Option<Vec<u8>>>>);

impl Buffer {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(Some(bytes.into()))))
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn byte_length(&self) -> usize {
        self.0.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_detached(&self) -> bool {
        self.0.lock().is_none()
    }

    /// Copies the contents out. Detached buffers read as empty.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone().unwrap_or_default()
    }

    /// Mutates the contents in place; returns `None` if detached.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Option<R> {
        self.0.lock().as_mut().map(f)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// A buffer with no storage yet, filled by `adopt` once a move commits.
    pub(crate) fn detached() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub(crate) fn take(&self) -> Option<Vec<u8>> {
        self.0.lock().take()
    }

    pub(crate) fn adopt(&self, bytes: Vec<u8>) {
        *self.0.lock() = Some(bytes);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.byte_length())
    }
}

/// Reference token naming a dedicated channel bound to a live value.
#[derive(Clone, Debug)]
pub struct ChannelRef {
    port: Port,
}

impl ChannelRef {
    pub fn new(port: Port) -> Self {
        Self { port }
    }

    pub fn id(&self) -> ChannelId {
        self.port.channel_id()
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn into_port(self) -> Port {
        self.port
    }
}
