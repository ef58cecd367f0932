//! Server module
//!
//! axum router for the vote/CRUD API and the observer WebSocket.

pub mod connect_info;
pub mod error;
pub mod http;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::polls::{create_engine, PollEngine};
use crate::store::{self, StoreError};

pub use error::ApiError;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: PollEngine,
}

impl AppState {
    pub fn new(engine: PollEngine) -> Self {
        Self { engine }
    }
}

/// Routes served next to the observer endpoint. The configured ws path may
/// not reuse any of them.
pub const API_PATHS: &[&str] = &[
    "/votes",
    "/users",
    "/polls",
    "/polls/{id}/results",
    "/health",
    "/metrics",
];

/// Build the application router. `ws_path` is where observers upgrade; pass
/// a value accepted by [`crate::config::validate`].
pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/votes", post(http::cast_vote))
        .route("/users", post(http::create_user).get(http::list_users))
        .route("/polls", post(http::create_poll).get(http::list_polls))
        .route("/polls/{id}/results", get(http::poll_results))
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        .route(ws_path, get(ws::upgrade))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Open the store, build the engine and run until Ctrl-C or SIGTERM.
pub async fn run(config: Config) -> Result<(), ServerError> {
    let store = store::open(&config.store).await?;
    let engine = create_engine(store, config.broadcast.queue_size);
    let router = build_router(AppState::new(engine), &config.server.ws_path);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(
        addr = %listener.local_addr()?,
        ws_path = %config.server.ws_path,
        "pollcast listening"
    );

    serve(listener, router, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
