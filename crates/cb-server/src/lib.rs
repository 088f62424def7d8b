//! cb-server: job dispatcher, job lifecycle and HTTP surface.
//!
//! This crate ties the other cb-* crates into a running worker:
//!
//! - Dispatcher that subscribes to every job subject and runs jobs with
//!   bounded concurrency under a per-job deadline
//! - Lifecycle controller that records job state and publishes completion
//! - Small Axum API for listing provider users and submitting jobs over HTTP
//! - Graceful shutdown via signal handling

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use cb_core::bus::{InProcessBus, MessageBus};
use cb_core::config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::dispatcher::Dispatcher;

/// Start the coursebridge worker.
///
/// Opens the database, binds every job subject and serves HTTP until a
/// shutdown signal arrives. Returns once in-flight jobs have drained.
pub async fn start(config: Config) -> cb_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = config.server.db_path.clone();
    let db = cb_db::pool::init_pool(&db_path)?;
    tracing::info!("Database opened at {}", db_path.display());

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let ctx = AppContext::new(db, config.clone(), bus);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| cb_core::Error::Configuration(format!("Invalid server address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| cb_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let shutdown = CancellationToken::new();
    let signal_cancel = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    serve(ctx, listener, shutdown).await
}

/// Run the dispatcher and the HTTP server on `listener` until `shutdown`
/// is cancelled.
///
/// A failure to bind any job subject aborts before the server accepts a
/// single connection.
pub async fn serve(ctx: AppContext, listener: TcpListener, shutdown: CancellationToken) -> cb_core::Result<()> {
    let dispatcher = Dispatcher::bind(ctx.clone()).await?;

    let dispatcher_cancel = shutdown.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    let app = router::build_router(ctx);
    let http_cancel = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_cancel.cancelled().await })
        .await;

    // The server may also stop on its own; make sure the dispatcher follows.
    shutdown.cancel();
    if let Err(e) = dispatcher_handle.await {
        tracing::error!("Dispatcher task failed: {e}");
    }

    served.map_err(|e| cb_core::Error::Internal(format!("HTTP server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
