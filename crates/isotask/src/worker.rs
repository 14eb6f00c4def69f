//! # Worker Loop
//!
//! The remote side of a tasklet context's main channel. It answers LOAD
//! requests: the module's export table is built (or taken from the cache),
//! a root dispatcher is bound to a fresh module channel, and the reply hands
//! over that channel together with the export names.
//!
//! Failed loads are reported with their cause and are never cached.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use isowire::ChannelRef;
use isowire::ErrorPayload;
use isowire::Message;
use isowire::MessageType;
use isowire::Port;
use isowire::Transferable;
use isowire::Transport;
use isowire::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::TaskletConfig;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::Target;
use crate::exports::ExportTable;
use crate::exports::Exports;
use crate::loader::ModuleLoader;
use crate::scope::Scope;

pub(crate) struct Worker {
    config: TaskletConfig,
    loader: Arc<dyn ModuleLoader>,
    cache: DashMap<String, Arc<ExportTable>>,
    transport: Arc<dyn Transport>,
    scope: Scope,
}

impl Worker {
    pub(crate) fn new(
        config: TaskletConfig,
        loader: Arc<dyn ModuleLoader>,
        transport: Arc<dyn Transport>,
        scope: Scope,
    ) -> Self {
        Self {
            config,
            loader,
            cache: DashMap::new(),
            transport,
            scope,
        }
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        info!(tasklet = %self.config.name, "worker started");
        let mut scope = self.scope.clone();

        loop {
            tokio::select! {
                biased;
                _ = scope.stopped() => break,
                received = self.transport.recv() => match received {
                    Ok(Some(message)) => self.serve(message).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(tasklet = %self.config.name, error = %e, "transport error");
                        break;
                    }
                },
            }
        }

        info!(tasklet = %self.config.name, "worker stopped");
    }

    async fn serve(&self, message: Message) {
        let id = message.id;
        let reply = match message.kind {
            MessageType::Load => self.load(&message).await,
            other => Err(ErrorPayload::protocol(format!("{} is not understood on the main channel", other))),
        }
        .unwrap_or_else(|error| Message::failure(id, error));

        let mut transfer: Vec<Transferable> = Vec::new();
        if let Some(channel) = &reply.channel {
            transfer.push(Transferable::Port(channel.port().clone()));
        }
        if let Err(e) = self.transport.send(reply, transfer).await {
            debug!(tasklet = %self.config.name, %id, error = %e, "reply dropped");
        }
    }

    async fn load(&self, message: &Message) -> Result<Message, ErrorPayload> {
        let Some(path) = message.path.as_deref() else {
            return Err(ErrorPayload::protocol("LOAD request carries no module path"));
        };

        let cached = self.cache.get(path).map(|entry| entry.value().clone());
        let table = match cached {
            Some(table) => {
                debug!(tasklet = %self.config.name, path, "module cache hit");
                table
            }
            None => {
                let table = Arc::new(self.evaluate(path).await?);
                if self.config.cache_modules {
                    self.cache.insert(path.to_string(), table.clone());
                }
                table
            }
        };

        let (local, remote) = Port::pair();
        let name = format!("{}:{}", self.config.name, path);
        debug!(tasklet = %self.config.name, path, channel = %local.channel_id(), exports = table.len(), "module loaded");
        let names = table.names();
        Dispatcher::new(name, Target::Module(table), Arc::new(local), self.scope.clone()).spawn();

        let structure = Value::List(names.into_iter().map(Value::from).collect());
        Ok(Message::reply(message, structure).with_channel(ChannelRef::new(remote)))
    }

    async fn evaluate(&self, path: &str) -> Result<ExportTable, ErrorPayload> {
        let mut exports = Exports::new();
        let outcome = AssertUnwindSafe(self.loader.load(path, &mut exports)).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => Ok(exports.build()),
            Ok(Err(e)) => {
                warn!(tasklet = %self.config.name, path, error = %e, "module failed to load");
                let message = format!("failed to load module '{}': {:#}", path, e);
                Err(ErrorPayload::load(message).with_stack(Some(format!("{:?}", e))))
            }
            Err(_) => {
                warn!(tasklet = %self.config.name, path, "module panicked while loading");
                Err(ErrorPayload::load(format!("module '{}' panicked while loading", path)))
            }
        }
    }
}
