use crate::config::{ClientConfig, default_ice_servers};
use crate::error::ApiError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tandem_core::{IceServerConfig, TurnConfigResponse};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait TurnConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, ApiError>;
}

/// Reads `GET /turn-config` from the signaling server.
pub struct HttpTurnConfigSource {
    http: reqwest::Client,
    url: Url,
}

impl HttpTurnConfigSource {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(config.turn_fetch_timeout)
                .build()?,
            url: config.http_url("turn-config")?,
        })
    }
}

#[async_trait]
impl TurnConfigSource for HttpTurnConfigSource {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, ApiError> {
        let response: TurnConfigResponse = self
            .http
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.ice_servers)
    }
}

#[derive(Default)]
struct CacheState {
    servers: Option<Vec<IceServerConfig>>,
    fetched_at: Option<Instant>,
}

/// ICE server list shared by every peer connection of a session.
///
/// Concurrent callers share one in-flight fetch, and fetches are spaced at
/// least `min_interval` apart even when forced. Failures and fetches that
/// outlast `fetch_timeout` fall back to the last good list, or to public STUN.
pub struct TurnConfigCache {
    source: Box<dyn TurnConfigSource>,
    min_interval: Duration,
    fetch_timeout: Duration,
    state: Mutex<CacheState>,
    fetches: AtomicU64,
}

impl TurnConfigCache {
    pub fn new(source: Box<dyn TurnConfigSource>, min_interval: Duration) -> Self {
        Self {
            source,
            min_interval,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            state: Mutex::new(CacheState::default()),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self::new(
            Box::new(HttpTurnConfigSource::new(config)?),
            config.turn_min_interval,
        )
        .with_fetch_timeout(config.turn_fetch_timeout))
    }

    /// `force` asks for fresh credentials, subject to the rate limit.
    pub async fn get(&self, force: bool) -> Vec<IceServerConfig> {
        // Held across the fetch so that concurrent callers wait for it.
        let mut state = self.state.lock().await;

        let recent = state
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.min_interval);
        match &state.servers {
            Some(servers) if !force || recent => return servers.clone(),
            None if recent => return default_ice_servers(),
            _ => {}
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        state.fetched_at = Some(Instant::now());
        match timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(Ok(servers)) => {
                debug!("Fetched {} ICE server entries", servers.len());
                state.servers = Some(servers.clone());
                servers
            }
            Ok(Err(e)) => {
                warn!("TURN config fetch failed: {}", e);
                state.servers.clone().unwrap_or_else(default_ice_servers)
            }
            Err(_) => {
                warn!("TURN config fetch timed out after {:?}", self.fetch_timeout);
                state.servers.clone().unwrap_or_else(default_ice_servers)
            }
        }
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}
