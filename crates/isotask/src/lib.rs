//! # isotask
//!
//! Transparent calls into an isolated tasklet context.
//!
//! ## Architecture
//!
//! - **Peer**: correlates requests and replies on one channel by id.
//! - **RemoteHandle**: records a property path and sends it as one request
//!   when a terminal verb fires.
//! - **Dispatcher**: serves GET, APPLY and CONSTRUCT against a live object
//!   graph and exposes marked results through channels of their own.
//! - **Worker / Tasklets**: the two ends of a context's main channel, which
//!   loads modules and hands out their root channels.

pub mod config;
pub mod error;
pub mod exports;
pub mod generator;
pub mod handle;
pub mod loader;
pub mod peer;
pub mod tasklets;

mod dispatcher;
mod scope;
mod worker;

#[cfg(test)]
mod tests;

pub use config::DispatchMode;
pub use config::TaskletConfig;
pub use config::TaskletsBuilder;
pub use error::Error;
pub use error::RemoteError;
pub use error::Result;
pub use exports::Export;
pub use exports::ExportTable;
pub use exports::Exports;
pub use exports::Kind;
pub use generator::AsyncGenerator;
pub use generator::Co;
pub use handle::RemoteHandle;
pub use handle::Resolved;
pub use loader::ModuleLoader;
pub use loader::ModuleRegistry;
pub use peer::Peer;
pub use tasklets::Module;
pub use tasklets::Tasklets;
