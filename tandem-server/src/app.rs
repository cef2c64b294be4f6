use crate::call::CallStore;
use crate::config::ServerConfig;
use crate::http;
use crate::signaling::ws_handler;
use crate::ice::IceServerDirectory;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub store: CallStore,
    pub ice: Arc<IceServerDirectory>,
    pub config: Arc<ServerConfig>,
    connections: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            store: CallStore::new(config.store_settings()),
            ice: Arc::new(IceServerDirectory::from_config(&config)),
            config: Arc::new(config),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_ice_directory(mut self, ice: IceServerDirectory) -> Self {
        self.ice = Arc::new(ice);
        self
    }

    pub fn next_connection_id(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/calls", post(http::create_call))
        .route("/calls/{id}", get(http::get_call))
        .route("/calls/{id}/join", post(http::join_call))
        .route("/calls/{id}/leave", post(http::leave_call))
        .route("/turn-config", get(http::turn_config))
        .route("/health", get(http::health))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = state.store.spawn_sweeper(state.config.sweep_interval);
    let app = router(state);

    info!("Signaling server listening on {}", listener.local_addr()?);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    sweeper.abort();
    result?;
    Ok(())
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    let state = AppState::new(config);

    serve_with_shutdown(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
}
