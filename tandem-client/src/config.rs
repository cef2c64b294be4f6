use std::time::Duration;
use tandem_core::{CallId, IceServerConfig, PeerId};
use url::Url;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun(DEFAULT_STUN_URL)]
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP URL of the signaling server, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// A signaling socket silent for this long is considered half-open.
    pub socket_idle_timeout: Duration,
    /// How long ICE may sit in `disconnected` before the peer is rebuilt.
    pub ice_disconnected_grace: Duration,
    pub recreate_retry_delay: Duration,
    pub max_recreate_attempts: u32,
    /// A host-side rebuild that has not connected by then is redone relay-only.
    pub relay_fallback_timeout: Duration,
    /// How long to wait for `peer-reconnected` before ending the call.
    pub presence_grace: Duration,
    pub turn_min_interval: Duration,
    /// Upper bound on one `/turn-config` request.
    pub turn_fetch_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn http_url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.server_url)?.join(path)
    }

    pub fn ws_url(&self, call_id: &CallId, peer_id: &PeerId) -> Result<Url, url::ParseError> {
        let mut url = self.http_url("ws")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        // http(s) -> ws(s) is always an allowed scheme change.
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut()
            .append_pair("call_id", call_id.as_str())
            .append_pair("peer_id", peer_id.as_str());
        Ok(url)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_owned(),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
            socket_idle_timeout: Duration::from_secs(45),
            ice_disconnected_grace: Duration::from_secs(3),
            recreate_retry_delay: Duration::from_secs(2),
            max_recreate_attempts: 5,
            relay_fallback_timeout: Duration::from_secs(8),
            presence_grace: Duration::from_secs(30),
            turn_min_interval: Duration::from_secs(5),
            turn_fetch_timeout: Duration::from_secs(10),
        }
    }
}
