//! Pause/cancel token shared between the manager and one engine loop.
//!
//! The loop checks the token at chunk boundaries only. A paused loop parks on
//! the underlying watch channel until it is resumed or cancelled.

use std::sync::Arc;

use tokio::sync::watch;

/// Requested run state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Cloneable handle to a transfer's run state.
#[derive(Debug, Clone)]
pub struct TransferControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current requested state.
    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    /// Requests a pause. Returns `false` unless the transfer was running.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == ControlState::Running {
                *s = ControlState::Paused;
                true
            } else {
                false
            }
        })
    }

    /// Lifts a pause. Returns `false` unless the transfer was paused.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == ControlState::Paused {
                *s = ControlState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Requests cancellation. Returns `false` if already cancelled.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == ControlState::Cancelled {
                false
            } else {
                *s = ControlState::Cancelled;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ControlState::Cancelled
    }

    /// Waits until the state is no longer [`ControlState::Paused`].
    pub async fn wait_unpaused(&self) -> ControlState {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != ControlState::Paused {
                return state;
            }
            if rx.changed().await.is_err() {
                return ControlState::Cancelled;
            }
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while *rx.borrow_and_update() != ControlState::Cancelled {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
