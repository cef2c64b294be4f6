use anyhow::Result;
use std::time::Duration;
use tandem_client::ClientConfig;
use tandem_server::{AppState, ServerConfig, serve_with_shutdown};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A real signaling server on an ephemeral port.
pub struct TestServer {
    pub base_url: String,
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
            _shutdown: shutdown_tx,
        })
    }

    /// Client settings pointed at this server, with fast reconnects.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(200),
            ..ClientConfig::new(self.base_url.clone())
        }
    }
}
