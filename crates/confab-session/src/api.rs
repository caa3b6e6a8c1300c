//! HTTP client for the session gateway endpoints.

use crate::error::SessionError;
use async_trait::async_trait;
use confab_media::{MediaError, NegotiationEndpoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Overall per-request timeout. Transport policy, not a negotiation-step
/// timeout: slow ICE gathering happens client-side before the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct TextMessageRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct AvatarOfferRequest<'a> {
    client_sdp: &'a str,
}

#[derive(Debug, Deserialize)]
struct AvatarAnswerResponse {
    server_sdp: String,
}

/// Client for the gateway's session endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Derives the duplex channel address for a session from the HTTP base
    /// (`http` → `ws`, `https` → `wss`).
    pub fn channel_url(&self, session_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/ws/{session_id}")
    }

    /// `POST /session` — requests a new session identifier.
    pub async fn create_session(&self) -> Result<String, SessionError> {
        let response = self.post("/session").send().await?;
        let response = check_status(response)?;
        let body: SessionResponse = response.json().await?;
        Ok(body.session_id)
    }

    /// `POST /session/{id}/message` — submits a user text message. The echo
    /// turn, if any, arrives asynchronously over the duplex channel.
    pub async fn send_text(&self, session_id: &str, text: &str) -> Result<(), SessionError> {
        let response = self
            .post(&format!("/session/{session_id}/message"))
            .json(&TextMessageRequest { text })
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    /// `POST /session/{id}/avatar/connect` — exchanges the complete local
    /// offer for the remote answer.
    pub async fn avatar_connect(
        &self,
        session_id: &str,
        client_sdp: &str,
    ) -> Result<String, SessionError> {
        let response = self
            .post(&format!("/session/{session_id}/avatar/connect"))
            .json(&AvatarOfferRequest { client_sdp })
            .send()
            .await?;
        let response = check_status(response)?;
        let body: AvatarAnswerResponse = response.json().await?;
        Ok(body.server_sdp)
    }

    /// `POST /session/{id}/avatar/disconnect` — asks the gateway to release
    /// its end of the avatar stream.
    pub async fn avatar_disconnect(&self, session_id: &str) -> Result<(), SessionError> {
        let response = self
            .post(&format!("/session/{session_id}/avatar/disconnect"))
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header("x-client-request-id", Uuid::new_v4().to_string())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SessionError::Api(format!(
            "gateway answered {status} for {}",
            response.url().path()
        )))
    }
}

/// Adapter exposing the gateway's avatar operations to the media layer's
/// [`NegotiationEndpoint`] seam.
pub struct AvatarEndpoint {
    api: Arc<ApiClient>,
    session_id: String,
}

impl AvatarEndpoint {
    pub fn new(api: Arc<ApiClient>, session_id: String) -> Self {
        Self { api, session_id }
    }
}

#[async_trait]
impl NegotiationEndpoint for AvatarEndpoint {
    async fn exchange_offer(&self, client_sdp: &str) -> Result<String, MediaError> {
        self.api
            .avatar_connect(&self.session_id, client_sdp)
            .await
            .map_err(|err| MediaError::Negotiation(err.to_string()))
    }

    async fn teardown(&self) -> Result<(), MediaError> {
        self.api
            .avatar_disconnect(&self.session_id)
            .await
            .map_err(|err| MediaError::Negotiation(err.to_string()))
    }
}
