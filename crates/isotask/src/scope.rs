//! # Worker Scope
//!
//! State shared by the worker loop and every dispatcher it spawns: the
//! dispatch mode and the shutdown signal raised by `terminate`.

use tokio::sync::watch;

use crate::config::DispatchMode;

#[derive(Clone, Debug)]
pub struct Scope {
    dispatch: DispatchMode,
    shutdown: watch::Receiver<bool>,
}

impl Scope {
    pub fn new(dispatch: DispatchMode, shutdown: watch::Receiver<bool>) -> Self {
        Self { dispatch, shutdown }
    }

    /// A scope that is never shut down.
    #[cfg(test)]
    pub fn detached(dispatch: DispatchMode) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self { dispatch, shutdown }
    }

    pub fn dispatch(&self) -> DispatchMode {
        self.dispatch
    }

    /// Completes once shutdown has been requested.
    ///
    /// If the sender is gone without having requested shutdown, this never
    /// completes.
    pub async fn stopped(&mut self) {
        loop {
            if *self.shutdown.borrow_and_update() {
                return;
            }
            if self.shutdown.changed().await.is_err() {
                return futures::future::pending().await;
            }
        }
    }
}
