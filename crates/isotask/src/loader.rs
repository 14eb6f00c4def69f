//! # Module Loading
//!
//! The seam between a tasklet context and whatever produces module code.
//! A loader runs a module's registrations against an `Exports` registrar,
//! or explains why it could not.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;

use crate::exports::Exports;

#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    /// Loads the module at `path`, registering its exports.
    ///
    /// Returns once every registration for this load has been made.
    async fn load(&self, path: &str, exports: &mut Exports) -> anyhow::Result<()>;
}

type Register = dyn Fn(&mut Exports) -> anyhow::Result<()> + Send + Sync;

/// An in-process loader mapping paths to registration functions.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<Register>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. A later module with the same path replaces the earlier.
    pub fn module<F>(mut self, path: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut Exports) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.modules.insert(path.into(), Arc::new(register));
        self
    }

    pub fn paths(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}

#[async_trait::async_trait]
impl ModuleLoader for ModuleRegistry {
    async fn load(&self, path: &str, exports: &mut Exports) -> anyhow::Result<()> {
        let register = self
            .modules
            .get(path)
            .ok_or_else(|| anyhow!("cannot find module '{}'", path))?;
        register(exports)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry").field("paths", &self.paths()).finish()
    }
}
