//! # Export Tables
//!
//! A module registers its exports against an `Exports` registrar while it
//! loads. The registrar is then frozen into an immutable `ExportTable` that
//! the module's root dispatcher serves.
//!
//! Each export records its `Kind` at registration time. Registering a name
//! twice keeps the later registration.

use std::collections::BTreeMap;

use isowire::Class;
use isowire::Function;
use isowire::Value;
use tracing::warn;

use crate::generator::AsyncGenerator;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Function,
    /// Calls return a live iterator, exposed by reference.
    AsyncGenerator,
    Class,
    Value,
}

#[derive(Clone, Debug)]
pub struct Export {
    pub kind: Kind,
    pub value: Value,
}

#[derive(Debug, Default)]
pub struct Exports {
    entries: BTreeMap<String, Export>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports a function under its own name.
    pub fn function(&mut self, function: Function) -> &mut Self {
        let name = function.name().to_string();
        self.insert(name, Kind::Function, function.into())
    }

    /// Exports a class under its own name.
    pub fn class(&mut self, class: Class) -> &mut Self {
        let name = class.name().to_string();
        self.insert(name, Kind::Class, class.into())
    }

    pub fn async_generator(&mut self, generator: AsyncGenerator) -> &mut Self {
        let name = generator.name().to_string();
        self.insert(name, Kind::AsyncGenerator, generator.to_function().into())
    }

    /// Exports any other value under `name`.
    pub fn value(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.insert(name.into(), Kind::Value, value.into())
    }

    fn insert(&mut self, name: String, kind: Kind, value: Value) -> &mut Self {
        if let Some(previous) = self.entries.insert(name.clone(), Export { kind, value }) {
            warn!(export = %name, previous = ?previous.kind, current = ?kind, "export registered twice, keeping the later one");
        }
        self
    }

    pub fn build(self) -> ExportTable {
        ExportTable { entries: self.entries }
    }
}

/// The frozen name to export mapping of one loaded module.
#[derive(Debug)]
pub struct ExportTable {
    entries: BTreeMap<String, Export>,
}

impl ExportTable {
    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    /// Export names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The table as a map value, for reads of the module root itself.
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(name, export)| (name.clone(), export.value.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use isowire::Exception;
    use isowire::Prototype;

    use super::*;

    fn add() -> Function {
        Function::sync("add", |_, args| {
            let sum = args.iter().filter_map(Value::as_int).sum::<i64>();
            Ok(Value::Int(sum))
        })
    }

    #[test]
    fn test_kinds_are_recorded_at_registration() {
        let mut exports = Exports::new();
        exports
            .function(add())
            .class(Class::new("Point", Prototype::default(), |_, _| Ok(())))
            .async_generator(AsyncGenerator::new("ticks", |_, _| async { Ok::<_, Exception>(Value::Null) }))
            .value("version", 3);
        let table = exports.build();

        assert_eq!(table.get("add").unwrap().kind, Kind::Function);
        assert_eq!(table.get("Point").unwrap().kind, Kind::Class);
        assert_eq!(table.get("ticks").unwrap().kind, Kind::AsyncGenerator);
        assert_eq!(table.get("version").unwrap().kind, Kind::Value);
        assert_eq!(table.names(), vec!["Point", "add", "ticks", "version"]);
    }

    #[test]
    fn test_later_registration_wins() {
        let mut exports = Exports::new();
        exports.value("answer", 41).value("answer", 42);
        let table = exports.build();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("answer").unwrap().value, Value::Int(42));
    }

    #[test]
    fn test_generator_is_exported_as_callable() {
        let mut exports = Exports::new();
        exports.async_generator(AsyncGenerator::new("gen", |_, _| async { Ok::<_, Exception>(Value::Null) }));
        let table = exports.build();

        assert!(matches!(table.get("gen").unwrap().value, Value::Function(_)));
    }
}
