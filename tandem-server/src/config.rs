use crate::call::StoreSettings;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Interval between WebSocket pings sent to every client.
    pub heartbeat_interval: Duration,
    /// A socket with no inbound frame for this long is treated as half-open and dropped.
    pub heartbeat_timeout: Duration,
    /// How long a disconnected participant may stay away before the call can expire.
    pub grace_window: Duration,
    /// Absolute lifetime of a call regardless of activity.
    pub call_ttl: Duration,
    pub sweep_interval: Duration,
    /// Ended calls stay queryable for this long before they are purged.
    pub ended_retention: Duration,
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_secret: Option<String>,
    pub turn_credential_lifetime: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env::var("TANDEM_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            heartbeat_interval: env_secs("TANDEM_HEARTBEAT_SECS", defaults.heartbeat_interval),
            heartbeat_timeout: env_secs(
                "TANDEM_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            grace_window: env_secs("TANDEM_GRACE_SECS", defaults.grace_window),
            call_ttl: env_secs("TANDEM_CALL_TTL_SECS", defaults.call_ttl),
            sweep_interval: env_secs("TANDEM_SWEEP_SECS", defaults.sweep_interval),
            ended_retention: env_secs("TANDEM_ENDED_RETENTION_SECS", defaults.ended_retention),
            stun_urls: env_list("TANDEM_STUN_URLS").unwrap_or(defaults.stun_urls),
            turn_urls: env_list("TANDEM_TURN_URLS").unwrap_or(defaults.turn_urls),
            turn_secret: env::var("TANDEM_TURN_SECRET").ok().filter(|s| !s.is_empty()),
            turn_credential_lifetime: env_secs(
                "TANDEM_TURN_TTL_SECS",
                defaults.turn_credential_lifetime,
            ),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            grace_window: self.grace_window,
            call_ttl: self.call_ttl,
            ended_retention: self.ended_retention,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            grace_window: Duration::from_secs(30),
            call_ttl: Duration::from_secs(4 * 60 * 60),
            sweep_interval: Duration::from_secs(5),
            ended_retention: Duration::from_secs(5 * 60),
            stun_urls: vec![DEFAULT_STUN_URL.to_owned()],
            turn_urls: Vec::new(),
            turn_secret: None,
            turn_credential_lifetime: Duration::from_secs(60 * 60),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    Some(items)
}
