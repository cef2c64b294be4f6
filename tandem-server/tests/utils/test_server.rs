use anyhow::{Context, Result};
use std::time::Duration;
use tandem_core::{CallId, CreateCallResponse, JoinCallResponse};
use tandem_server::{AppState, ServerConfig, serve_with_shutdown};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A signaling server bound to an ephemeral port for the duration of one test.
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    http: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(ServerConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        })
        .await
    }

    pub async fn start_with(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = AppState::new(config);
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = serve_with_shutdown(listener, state, shutdown).await {
                tracing::error!("Test server failed: {e}");
            }
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws"),
            http: reqwest::Client::new(),
            _shutdown: shutdown_tx,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn create_call(&self) -> Result<CreateCallResponse> {
        let response = self
            .http
            .post(format!("{}/calls", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        response.json().await.context("create call body")
    }

    pub async fn join_call(&self, call_id: &CallId) -> Result<JoinCallResponse> {
        let response = self
            .http
            .post(format!("{}/calls/{}/join", self.base_url, call_id))
            .send()
            .await?
            .error_for_status()?;
        response.json().await.context("join call body")
    }
}
