use crate::config::ServerConfig;
use crate::ice::{SharedSecretCredentials, TurnCredentialProvider};
use std::sync::Arc;
use tandem_core::IceServerConfig;
use tracing::warn;

/// Assembles the ICE server list handed to clients: public STUN servers plus,
/// when a credential provider is configured, TURN relays with fresh credentials.
pub struct IceServerDirectory {
    stun_urls: Vec<String>,
    turn_urls: Vec<String>,
    provider: Option<Arc<dyn TurnCredentialProvider>>,
}

impl IceServerDirectory {
    pub fn new(
        stun_urls: Vec<String>,
        turn_urls: Vec<String>,
        provider: Option<Arc<dyn TurnCredentialProvider>>,
    ) -> Self {
        Self {
            stun_urls,
            turn_urls,
            provider,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let provider = config.turn_secret.as_ref().map(|secret| {
            Arc::new(SharedSecretCredentials::new(
                secret.clone(),
                config.turn_credential_lifetime,
            )) as Arc<dyn TurnCredentialProvider>
        });
        Self::new(config.stun_urls.clone(), config.turn_urls.clone(), provider)
    }

    /// Never fails: a credential error degrades the answer to STUN only.
    pub async fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers: Vec<IceServerConfig> = self
            .stun_urls
            .iter()
            .map(|url| IceServerConfig::stun(url.clone()))
            .collect();

        let Some(provider) = &self.provider else {
            return servers;
        };
        if self.turn_urls.is_empty() {
            return servers;
        }

        match provider.get_credentials().await {
            Ok(creds) => servers.push(IceServerConfig {
                urls: self.turn_urls.clone(),
                username: Some(creds.username),
                credential: Some(creds.password),
            }),
            Err(e) => warn!("TURN credentials unavailable, serving STUN only: {}", e),
        }

        servers
    }
}
