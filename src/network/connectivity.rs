// src/network/connectivity.rs
//! Reactive "is the network reachable" signal.
//!
//! The platform pushes transitions in through [`ConnectivityMonitor::set_online`];
//! nothing here polls. Bursts of flapping collapse into the latest value
//! because subscribers only ever see the current state of the watch channel.

use tokio::sync::watch;
use tracing::info;

/// Platform probe used once, at construction.
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn from_source(source: &dyn ConnectivitySource) -> Self {
        Self::new(source.is_online())
    }

    /// Transition event sink. Returns `true` when the state actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> ConnectivityWatch {
        ConnectivityWatch { rx: self.state.subscribe() }
    }
}

/// Subscription handle. Marks the current value as seen on creation.
#[derive(Debug, Clone)]
pub struct ConnectivityWatch {
    rx: watch::Receiver<bool>,
}

impl ConnectivityWatch {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Next state the subscriber has not seen. `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Resolves immediately when already online. `false` if the monitor was dropped first.
    pub async fn wait_until_online(&mut self) -> bool {
        self.rx.wait_for(|online| *online).await.is_ok()
    }
}
