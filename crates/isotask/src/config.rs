//! # Tasklet Configuration
//!
//! Settings for one remote execution context, set through a fluent builder.

use std::sync::Arc;

use crate::loader::ModuleLoader;
use crate::tasklets::Tasklets;

/// How a dispatcher treats requests that arrive while earlier ones are
/// still running.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Start every request as it arrives. Two async calls against one
    /// instance can interleave, and so can their mutations.
    #[default]
    Concurrent,
    /// Finish each request before reading the next one.
    Serial,
}

#[derive(Clone, Debug)]
pub struct TaskletConfig {
    /// Shows up in logs and channel names.
    pub name: String,
    pub dispatch: DispatchMode,
    /// Reuse the export table of a path that already loaded successfully.
    pub cache_modules: bool,
}

impl Default for TaskletConfig {
    fn default() -> Self {
        Self {
            name: "tasklet".to_string(),
            dispatch: DispatchMode::Concurrent,
            cache_modules: true,
        }
    }
}

/// Fluent builder for a `Tasklets` context.
#[derive(Debug, Default)]
pub struct TaskletsBuilder {
    config: TaskletConfig,
}

impl TaskletsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    pub fn cache_modules(mut self, enabled: bool) -> Self {
        self.config.cache_modules = enabled;
        self
    }

    pub fn config(&self) -> &TaskletConfig {
        &self.config
    }

    /// Starts the context. Must be called inside a tokio runtime.
    pub fn spawn(self, loader: impl ModuleLoader) -> Tasklets {
        Tasklets::spawn(self.config, Arc::new(loader))
    }
}
