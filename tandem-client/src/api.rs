use crate::config::ClientConfig;
use crate::error::ApiError;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tandem_core::{
    CallId, CallSnapshot, CreateCallResponse, ErrorBody, IceServerConfig, JoinCallRequest,
    JoinCallResponse, PeerId, TurnConfigResponse,
};
use url::Url;

/// HTTP side of the signaling server.
#[derive(Clone)]
pub struct CallApi {
    http: reqwest::Client,
    base: Url,
}

impl CallApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(&config.server_url)?,
        })
    }

    pub async fn create_call(&self) -> Result<CreateCallResponse, ApiError> {
        let response = self.http.post(self.base.join("calls")?).send().await?;
        read_json(response).await
    }

    /// Joins as a new guest, or resumes `peer_id` if given.
    pub async fn join_call(
        &self,
        call_id: &CallId,
        peer_id: Option<PeerId>,
    ) -> Result<JoinCallResponse, ApiError> {
        let url = self.base.join(&format!("calls/{}/join", call_id))?;
        let response = self
            .http
            .post(url)
            .json(&JoinCallRequest { peer_id })
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn snapshot(&self, call_id: &CallId) -> Result<CallSnapshot, ApiError> {
        let url = self.base.join(&format!("calls/{}", call_id))?;
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    pub async fn leave(&self, call_id: &CallId, peer_id: &PeerId) -> Result<(), ApiError> {
        let url = self.base.join(&format!("calls/{}/leave", call_id))?;
        let response = self
            .http
            .post(url)
            .json(&JoinCallRequest {
                peer_id: Some(peer_id.clone()),
            })
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    pub async fn turn_config(&self) -> Result<Vec<IceServerConfig>, ApiError> {
        let response = self.http.get(self.base.join("turn-config")?).send().await?;
        let body: TurnConfigResponse = read_json(response).await?;
        Ok(body.ice_servers)
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_owned(),
    };
    Err(ApiError::Server {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    Ok(check(response).await?.json().await?)
}

impl ApiError {
    /// HTTP status of a server-side rejection.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Server { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }
}
