use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared online/offline signal. The daemon's probe loop is the writer;
/// the sync worker and the data service are readers. Tests drive it
/// directly.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the state; transitions are logged, repeats are silent.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("connection restored");
            } else {
                info!("connection lost");
            }
        }
    }

    /// Subscribe to state transitions (see [`tokio::sync::watch`]).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
