// src/transport/lifecycle.rs
//! Host lifecycle signal
//!
//! The host (tab, app, process supervisor) reports whether it is in the
//! foreground. Anything other than `Visible` means further retries may never
//! be observed, so the transport prefers fire-and-forget sends and may abort
//! pending backoff waits.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Visible,
    Hidden,
    Terminating,
}

/// Shared, cloneable lifecycle handle
#[derive(Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Visible);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: LifecycleState) {
        self.tx.send_replace(state);
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Hidden or terminating
    pub fn is_hidden(&self) -> bool {
        self.state() != LifecycleState::Visible
    }

    /// Resolves once the host is no longer visible
    pub async fn hidden(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|state| *state != LifecycleState::Visible).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
