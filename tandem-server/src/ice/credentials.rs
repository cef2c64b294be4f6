use crate::error::TurnError;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
}

/// Issues short-lived credentials for the relay servers.
#[async_trait]
pub trait TurnCredentialProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<TurnCredentials, TurnError>;
}

/// TURN REST style credentials: the username is the expiry timestamp and the
/// password an HMAC of it under a secret shared with the relay.
pub struct SharedSecretCredentials {
    secret: String,
    lifetime: Duration,
}

impl SharedSecretCredentials {
    pub fn new(secret: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            secret: secret.into(),
            lifetime,
        }
    }
}

#[async_trait]
impl TurnCredentialProvider for SharedSecretCredentials {
    async fn get_credentials(&self) -> Result<TurnCredentials, TurnError> {
        let (username, password) =
            ::turn::auth::generate_long_term_credentials(&self.secret, self.lifetime)
                .map_err(|e| TurnError::Generation(e.to_string()))?;

        Ok(TurnCredentials { username, password })
    }
}
