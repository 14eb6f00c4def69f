//! # Live Objects
//!
//! Objects, functions and classes that make up the object graph a dispatcher
//! serves. None of these can be copied across a channel; they are reached by
//! call path or exposed through a transfer proxy.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Exception;
use crate::value::Value;

/// Outcome of invoking a function.
pub type CallResult = std::result::Result<Value, Exception>;

type Native = dyn Fn(Value, Vec<Value>) -> BoxFuture<'static, CallResult> + Send + Sync;

type Init = dyn Fn(&Object, Vec<Value>) -> std::result::Result<(), Exception> + Send + Sync;

/// A shared, mutable property bag.
///
/// Own fields are enumerable and are what a structured clone copies. Methods
/// come from the prototype and are never enumerated.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

struct ObjectInner {
    fields: DashMap<String, Value>,
    prototype: Prototype,
}

impl Object {
    pub fn new() -> Self {
        Self::with_prototype(Prototype::default())
    }

    pub fn with_prototype(prototype: Prototype) -> Self {
        Self(Arc::new(ObjectInner {
            fields: DashMap::new(),
            prototype,
        }))
    }

    /// Creates a plain object with the given own fields.
    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new();
        for (key, value) in fields {
            object.set(key, value);
        }
        object
    }

    /// Reads a property: own fields shadow prototype methods.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(field) = self.field(key) {
            return Some(field);
        }
        self.0.prototype.method(key).cloned().map(Value::Function)
    }

    /// Reads an own field only.
    pub fn field(&self, key: &str) -> Option<Value> {
        self.0.fields.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.fields.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.fields.remove(key).map(|(_, value)| value)
    }

    /// Own field names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.fields.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of the enumerable own fields.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.0
            .fields
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn prototype(&self) -> &Prototype {
        &self.0.prototype
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("methods", &self.0.prototype.names())
            .finish()
    }
}

/// The shared, immutable method table of a class.
#[derive(Clone, Default)]
pub struct Prototype(Arc<BTreeMap<String, Function>>);

impl Prototype {
    pub fn builder() -> PrototypeBuilder {
        PrototypeBuilder::default()
    }

    pub fn method(&self, name: &str) -> Option<&Function> {
        self.0.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

#[derive(Default)]
pub struct PrototypeBuilder {
    methods: BTreeMap<String, Function>,
}

impl PrototypeBuilder {
    /// Adds a method under the function's own name.
    pub fn method(mut self, function: Function) -> Self {
        self.methods.insert(function.name().to_string(), function);
        self
    }

    pub fn build(self) -> Prototype {
        Prototype(Arc::new(self.methods))
    }
}

/// A native callable taking a receiver and an argument list.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    native: Arc<Native>,
}

impl Function {
    /// Wraps an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            native: Arc::new(move |this, args| f(this, args).boxed()),
        }
    }

    /// Wraps a closure that completes immediately.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        Self::new(name, move |this, args| futures::future::ready(f(this, args)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, this: Value, args: Vec<Value>) -> BoxFuture<'static, CallResult> {
        (self.native)(this, args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.native, &other.native)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// A named constructor producing objects that share one prototype.
#[derive(Clone)]
pub struct Class(Arc<ClassInner>);

struct ClassInner {
    name: String,
    prototype: Prototype,
    init: Box<Init>,
}

impl Class {
    pub fn new<F>(name: impl Into<String>, prototype: Prototype, init: F) -> Self
    where
        F: Fn(&Object, Vec<Value>) -> std::result::Result<(), Exception> + Send + Sync + 'static,
    {
        Self(Arc::new(ClassInner {
            name: name.into(),
            prototype,
            init: Box::new(init),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn prototype(&self) -> &Prototype {
        &self.0.prototype
    }

    /// Allocates an instance and runs the initializer against it.
    pub fn construct(&self, args: Vec<Value>) -> std::result::Result<Object, Exception> {
        let instance = Object::with_prototype(self.0.prototype.clone());
        (self.0.init)(&instance, args)?;
        Ok(instance)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.0.name)
    }
}
