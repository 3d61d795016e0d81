//! Server lifecycle management.

use anyhow::{Context, Result};
use carecompass_core::{now_millis, ServerConfig};
use carecompass_store::{backend_for, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::routes::router;
use crate::signals;
use crate::state::AppState;

/// The CareCompass HTTP server
pub struct Server {
    config: ServerConfig,
    store: Arc<Store>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Open the configured backend and load the store
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create data directory")?;

        let store = Store::open(backend_for(&config))
            .await
            .with_context(|| format!("Failed to open {:?} store", config.backend))?;

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Serve an already opened store
    pub fn with_store(config: ServerConfig, store: Arc<Store>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            shutdown_tx,
        }
    }

    /// Sender that stops the server when a message is sent
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = self.config.listen_address();
        TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))
    }

    /// Bind and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on `listener` until a signal or a shutdown request arrives
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let address: SocketAddr = listener.local_addr()?;
        tracing::info!(
            %address,
            data_dir = %self.config.data_dir.display(),
            backend = self.store.backend_name(),
            "Server starting"
        );

        let sweeper = spawn_sweeper(
            self.store.clone(),
            self.config.sweep_interval(),
            self.shutdown_tx.subscribe(),
        );

        let state = AppState::new(self.store.clone(), self.config.clone());
        let app = router(state);

        let shutdown_rx = self.shutdown_tx.subscribe();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signals::wait_for_shutdown(shutdown_rx).await;
            })
            .await;

        // stop the sweeper when shutdown came from a signal
        let _ = self.shutdown_tx.send(());
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Expiry sweeper ended abnormally");
        }

        result.context("HTTP server error")?;
        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Periodically drop expired sessions and share links.
fn spawn_sweeper(
    store: Arc<Store>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.prune_expired(now_millis()).await {
                        tracing::warn!(error = %e, "Expiry sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        tracing::debug!("Expiry sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecompass_core::{PublicUser, Role};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_prunes_and_stops() {
        let store = Arc::new(Store::in_memory());
        let user = PublicUser {
            id: "u1".to_string(),
            name: "Dana".to_string(),
            email: "d@x.io".to_string(),
            role: Role::Caregiver,
        };
        // already expired
        store
            .create_session(user, Duration::ZERO, now_millis() - 1_000)
            .await
            .unwrap();
        assert_eq!(store.stats().sessions, 1);

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(store.clone(), Duration::from_secs(60), rx);

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.stats().sessions, 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
