// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

//! Wiring for the event gateway service: storage, the websocket fan-out
//! server, the subscription manager, the transaction dispatcher and the
//! REST surface. The ledger RPC client is the embedder's collaborator,
//! injected through [`ledger::LedgerClient`].

pub mod api;
pub mod config;

pub use api::AppState;
pub use config::{ConfigError, GatewayConfig};

use dispatcher::{metrics::DispatcherMetrics, TxDispatcher};
use events::{metrics::EventMetrics, SubscriptionManager};
use ledger::LedgerClient;
use prometheus::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::info;
use ws::WsServer;

/// A running gateway: the HTTP listener plus every background task behind
/// it. Dropping it abandons the tasks; call [`Gateway::shutdown`] for a
/// clean stop.
pub struct Gateway {
    pub local_addr: SocketAddr,
    pub state: AppState,
    manager: Arc<SubscriptionManager>,
    tx_shutdown: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Open storage, restore persisted streams and subscriptions, start
    /// the worker pool and bind the HTTP listener.
    pub async fn spawn(
        config: GatewayConfig,
        ledger: Arc<dyn LedgerClient>,
    ) -> eyre::Result<Gateway> {
        let registry = Registry::new();
        let storage = store::GatewayStorage::open(&config.store.path, config.store.receipts)?;
        let ws = WsServer::new(config.events.processing_timeout);

        let manager = Arc::new(SubscriptionManager::new(
            storage.subscriptions.clone(),
            storage.streams.clone(),
            storage.checkpoints.clone(),
            ledger.clone(),
            ws.clone(),
            EventMetrics::new(&registry),
            config.events.resubscribe_delay,
        ));
        manager.load().await?;

        let (tx_dispatcher, worker_handles) = TxDispatcher::spawn(
            config.dispatcher.workers,
            config.dispatcher.queue_depth,
            config.dispatcher.tx_timeout,
            ledger,
            storage.receipts.clone(),
            ws.clone(),
            DispatcherMetrics::new(&registry),
        );

        let state = AppState {
            manager: manager.clone(),
            dispatcher: Arc::new(tx_dispatcher),
            receipts: storage.receipts.clone(),
            ws: ws.clone(),
            registry,
        };
        let router = api::router(state.clone());

        let listener =
            TcpListener::bind((config.http.address.as_str(), config.http.port)).await?;
        let local_addr = listener.local_addr()?;
        let (tx_shutdown, rx_shutdown) = oneshot::channel();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx_shutdown.await;
                })
                .await
        });

        info!(%local_addr, "gateway listening");
        Ok(Gateway {
            local_addr,
            state,
            manager,
            tx_shutdown,
            server,
            workers: worker_handles,
        })
    }

    /// Serve until interrupted, then shut down cleanly.
    pub async fn run(config: GatewayConfig, ledger: Arc<dyn LedgerClient>) -> eyre::Result<()> {
        let gateway = Self::spawn(config, ledger).await?;
        tokio::signal::ctrl_c().await?;
        info!("interrupt received, shutting down");
        gateway.shutdown().await;
        Ok(())
    }

    /// Stop the streams, adapters and connections, then the listener and
    /// worker pool. In-flight batches are abandoned without checkpoint
    /// advance and will be redelivered after a restart. Every task holding
    /// a storage handle has exited by the time this returns, so the store
    /// directory can be reopened immediately.
    pub async fn shutdown(self) {
        self.manager.shutdown().await;
        self.state.ws.shutdown();
        let _ = self.tx_shutdown.send(());
        let _ = self.server.await;
        // Dropping the dispatcher closes the shard queues; the workers
        // drain and exit.
        drop(self.state);
        drop(self.manager);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("gateway stopped");
    }
}

/// Install the tracing subscriber the service logs through. `RUST_LOG`
/// overrides the configured level.
pub fn init_telemetry(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
