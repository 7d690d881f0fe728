//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use approval_engine::ApprovalEngine;
use approval_store::postgres::PostgresApprovalStore;
use approval_store::{ApprovalStore, InMemoryApprovalStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Approval daemon server
pub struct Server {
    config: DaemonConfig,
    engine: ApprovalEngine,
    scheduler: Arc<Scheduler>,
    storage_backend: &'static str,
}

impl Server {
    /// Connect storage and assemble the engine
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        let (store, storage_backend) = build_store(&config.storage).await?;
        let directory = config.directory.build();
        tracing::info!(
            backend = storage_backend,
            roles = directory.role_count(),
            "Storage and directory ready"
        );

        let engine = ApprovalEngine::new(store, Arc::new(directory))
            .with_config(config.engine.clone());
        let scheduler = Scheduler::new(config.scheduler.clone(), engine.clone());

        Ok(Self {
            config,
            engine,
            scheduler,
            storage_backend,
        })
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(
            self.engine.clone(),
            self.scheduler.clone(),
            self.storage_backend,
        );
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Approval daemon listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler_handle = tokio::spawn(self.scheduler.clone().run(shutdown_rx));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Approval daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }

        Ok(())
    }
}

async fn build_store(
    config: &StorageConfig,
) -> DaemonResult<(Arc<dyn ApprovalStore>, &'static str)> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            let store: Arc<dyn ApprovalStore> = Arc::new(InMemoryApprovalStore::new());
            Ok((store, "memory"))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = PostgresApprovalStore::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            let store: Arc<dyn ApprovalStore> = Arc::new(store);
            Ok((store, "postgres"))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_server_assembles() {
        let server = Server::new(DaemonConfig::default()).await.unwrap();
        assert_eq!(server.storage_backend, "memory");
        assert_eq!(server.engine.config().default_sla_hours, 24);
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let mut config = DaemonConfig::default();
        config.engine.default_sla_hours = u32::MAX;
        assert!(matches!(
            Server::new(config).await,
            Err(DaemonError::Config(_))
        ));
    }
}
