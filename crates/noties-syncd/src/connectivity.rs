use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Create a linked handle/monitor pair starting in the given state.
pub fn connectivity(online: bool) -> (ConnectivityHandle, ConnectivityMonitor) {
    let (tx, rx) = watch::channel(online);
    (
        ConnectivityHandle { tx: Arc::new(tx) },
        ConnectivityMonitor { rx },
    )
}

/// Write side of the connectivity signal, driven by the host or a probe.
#[derive(Clone)]
pub struct ConnectivityHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityHandle {
    /// Publish a state; only real transitions reach the monitors.
    /// Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    pub fn monitor(&self) -> ConnectivityMonitor {
        ConnectivityMonitor {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the connectivity signal.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    rx: watch::Receiver<bool>,
}

impl ConnectivityMonitor {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition. `None` once every handle is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Poll `url` every `interval` and feed the result into `handle`.
///
/// Any HTTP response counts as reachable; only transport failures count as
/// offline.
pub fn spawn_probe(url: String, interval: Duration, handle: ConnectivityHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(interval).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("failed to build probe client: {e}");
                return;
            }
        };
        loop {
            let online = match client.get(&url).send().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(%url, "probe failed: {e}");
                    false
                }
            };
            handle.set_online(online);
            tokio::time::sleep(interval).await;
        }
    })
}
