//! # Structured Clone
//!
//! Produces the copy of a payload that the receiving context sees.
//!
//! ## Invariants
//! - All-or-nothing: resources are only detached once the whole payload has
//!   cloned successfully.
//! - A resource reachable twice maps to one resource in the clone.
//! - Objects become maps of their own fields; methods do not travel.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::CloneError;
use crate::message::Message;
use crate::port::Port;
use crate::scan::Transferable;
use crate::value::Buffer;
use crate::value::ChannelRef;
use crate::value::Value;

type Result<T> = std::result::Result<T, CloneError>;

/// Clones `value`, moving the items in `transfer`.
///
/// Returns the clone and the relocated resources, in transfer-list order.
pub fn structured_clone(value: &Value, transfer: &[Transferable]) -> Result<(Value, Vec<Transferable>)> {
    let mut cloner = Cloner::new(transfer)?;
    let value = cloner.value(value)?;
    Ok((value, cloner.commit()))
}

pub(crate) fn clone_message(message: &Message, transfer: &[Transferable]) -> Result<(Message, Vec<Transferable>)> {
    let mut cloner = Cloner::new(transfer)?;

    let arguments = message
        .arguments
        .iter()
        .map(|v| cloner.value(v))
        .collect::<Result<Vec<_>>>()?;
    let result = message.result.as_ref().map(|v| cloner.value(v)).transpose()?;
    let channel = message
        .channel
        .as_ref()
        .map(|c| cloner.port(c.port()).map(ChannelRef::new))
        .transpose()?;

    let cloned = Message {
        id: message.id,
        kind: message.kind,
        call_path: message.call_path.clone(),
        arguments,
        result,
        error: message.error.clone(),
        path: message.path.clone(),
        channel,
    };

    Ok((cloned, cloner.commit()))
}

struct Cloner {
    /// (source, placeholder) pairs, in transfer-list order.
    moves: Vec<(Transferable, Transferable)>,
    move_index: HashMap<usize, usize>,
    copies: HashMap<usize, Buffer>,
    open: HashSet<usize>,
}

impl Cloner {
    fn new(transfer: &[Transferable]) -> Result<Self> {
        let mut moves = Vec::with_capacity(transfer.len());
        let mut move_index = HashMap::new();

        for item in transfer {
            if move_index.contains_key(&item.addr()) {
                continue;
            }
            if item.is_detached() {
                return Err(CloneError::AlreadyDetached(item.kind()));
            }
            let placeholder = match item {
                Transferable::Buffer(_) => Transferable::Buffer(Buffer::detached()),
                Transferable::Port(p) => Transferable::Port(Port::detached(p.channel_id())),
            };
            move_index.insert(item.addr(), moves.len());
            moves.push((item.clone(), placeholder));
        }

        Ok(Self {
            moves,
            move_index,
            copies: HashMap::new(),
            open: HashSet::new(),
        })
    }

    fn moved(&self, addr: usize) -> Option<&Transferable> {
        self.move_index.get(&addr).map(|&i| &self.moves[i].1)
    }

    fn value(&mut self, value: &Value) -> Result<Value> {
        match value {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
                Ok(value.clone())
            }
            Value::List(items) => items
                .iter()
                .map(|v| self.value(v))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Value::Map(entries) => {
                let mut cloned = std::collections::BTreeMap::new();
                for (key, v) in entries {
                    cloned.insert(key.clone(), self.value(v)?);
                }
                Ok(Value::Map(cloned))
            }
            Value::Buffer(buffer) => self.buffer(buffer).map(Value::Buffer),
            Value::Port(port) => self.port(port).map(Value::Port),
            Value::Remote(channel) => self
                .port(channel.port())
                .map(|p| Value::Remote(ChannelRef::new(p))),
            Value::Object(object) => {
                if !self.open.insert(object.addr()) {
                    return Err(CloneError::Cyclic);
                }
                let mut cloned = std::collections::BTreeMap::new();
                for (key, v) in object.fields() {
                    cloned.insert(key, self.value(&v)?);
                }
                self.open.remove(&object.addr());
                Ok(Value::Map(cloned))
            }
            Value::Function(_) => Err(CloneError::Uncloneable("function")),
            Value::Class(_) => Err(CloneError::Uncloneable("class")),
            Value::Transfer(_) => Err(CloneError::Uncloneable("transfer marker")),
        }
    }

    fn buffer(&mut self, buffer: &Buffer) -> Result<Buffer> {
        if let Some(Transferable::Buffer(moved)) = self.moved(buffer.addr()) {
            return Ok(moved.clone());
        }
        if buffer.is_detached() {
            return Err(CloneError::AlreadyDetached("buffer"));
        }
        let copy = self
            .copies
            .entry(buffer.addr())
            .or_insert_with(|| Buffer::new(buffer.to_vec()));
        Ok(copy.clone())
    }

    fn port(&mut self, port: &Port) -> Result<Port> {
        match self.moved(port.addr()) {
            Some(Transferable::Port(moved)) => Ok(moved.clone()),
            _ => Err(CloneError::PortNotTransferred),
        }
    }

    /// Detaches every source and hands its storage to the placeholder.
    fn commit(self) -> Vec<Transferable> {
        self.moves
            .into_iter()
            .map(|(source, placeholder)| {
                match (&source, &placeholder) {
                    (Transferable::Buffer(from), Transferable::Buffer(to)) => {
                        if let Some(bytes) = from.take() {
                            to.adopt(bytes);
                        }
                    }
                    (Transferable::Port(from), Transferable::Port(to)) => {
                        if let Some(link) = from.take_link() {
                            to.adopt(link);
                        }
                    }
                    _ => {}
                }
                placeholder
            })
            .collect()
    }
}
