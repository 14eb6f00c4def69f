//! # Tasklet Contexts
//!
//! `Tasklets` is the caller's side of an isolated execution context. It
//! loads modules into the context and hands back a `Module` whose handle
//! proxies calls to the module's exports.

use std::sync::Arc;

use isowire::Message;
use isowire::Port;
use isowire::Value;
use tokio::sync::watch;
use tracing::info;

use crate::config::TaskletConfig;
use crate::config::TaskletsBuilder;
use crate::error::Error;
use crate::error::Result;
use crate::handle::RemoteHandle;
use crate::loader::ModuleLoader;
use crate::peer::Peer;
use crate::scope::Scope;
use crate::worker::Worker;

pub struct Tasklets {
    config: TaskletConfig,
    peer: Peer,
    shutdown: watch::Sender<bool>,
}

impl Tasklets {
    /// Starts a context with the default configuration.
    pub fn new(loader: impl ModuleLoader) -> Self {
        Self::builder().spawn(loader)
    }

    pub fn builder() -> TaskletsBuilder {
        TaskletsBuilder::new()
    }

    pub(crate) fn spawn(config: TaskletConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let (client, remote) = Port::pair();
        let (shutdown, signal) = watch::channel(false);

        let scope = Scope::new(config.dispatch, signal);
        Worker::new(config.clone(), loader, Arc::new(remote), scope).spawn();
        let peer = Peer::new(config.name.clone(), Arc::new(client));

        Self { config, peer, shutdown }
    }

    pub fn config(&self) -> &TaskletConfig {
        &self.config
    }

    /// Loads the module at `path` into the context.
    pub async fn add_module(&self, path: impl Into<String>) -> Result<Module> {
        let path = path.into();
        let reply = self.peer.request(Message::load(path.clone()), Vec::new()).await?;

        let channel = reply
            .channel
            .ok_or_else(|| Error::Protocol("LOAD reply carries no module channel".into()))?;
        let exports = match &reply.result {
            Some(Value::List(names)) => names.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            _ => Vec::new(),
        };

        Ok(Module {
            path,
            handle: RemoteHandle::from_port(channel.into_port()),
            exports,
        })
    }

    /// Tears the context down. The worker and every dispatcher it started
    /// stop; requests still waiting fail with `ChannelClosed`.
    pub fn terminate(&self) {
        info!(tasklet = %self.config.name, "terminating");
        self.shutdown.send_replace(true);
    }
}

/// A module loaded into a tasklet context.
#[derive(Clone, Debug)]
pub struct Module {
    path: String,
    handle: RemoteHandle,
    exports: Vec<String>,
}

impl Module {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The module root. Its path buffer is shared by every clone.
    pub fn handle(&self) -> RemoteHandle {
        self.handle.clone()
    }

    /// Names of the module's exports, sorted.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// A fresh handle starting at the export `name`.
    pub fn export(&self, name: impl Into<String>) -> RemoteHandle {
        self.handle.fork().prop(name)
    }
}
