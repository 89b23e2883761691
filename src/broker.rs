//! Connection broker client
//!
//! Exchanges the user's identity for a server URL and participant token
//! before a session can be opened.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::transport::Credentials;
use crate::{Error, Result};

/// Identity sent to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    /// Display name of the user
    pub user_name: String,
    /// Agent to dispatch into the session
    pub agent_id: String,
    /// Stable user identifier
    pub user_id: String,
}

/// Broker response
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// Real-time server URL
    pub server_url: String,
    /// Access token for the local participant
    pub participant_token: String,
    /// Room the broker created
    #[serde(default)]
    pub room_name: Option<String>,
    /// Participant name assigned by the broker
    #[serde(default)]
    pub participant_name: Option<String>,
}

impl ConnectionDetails {
    /// Validate the details into connect credentials
    ///
    /// # Errors
    ///
    /// Returns error if the server URL or token is unusable
    pub fn credentials(&self) -> Result<Credentials> {
        Credentials::new(&self.server_url, self.participant_token.clone())
    }
}

impl std::fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("server_url", &self.server_url)
            .field("participant_token", &"[REDACTED]")
            .field("room_name", &self.room_name)
            .field("participant_name", &self.participant_name)
            .finish()
    }
}

/// Source of connection credentials
#[async_trait]
pub trait ConnectionBroker: Send + Sync {
    /// Request connection details for `request`
    ///
    /// # Errors
    ///
    /// Returns error on network, auth or decoding failure
    async fn request_connection(&self, request: &ConnectionRequest) -> Result<ConnectionDetails>;
}

/// Broker reached over HTTP with a JSON POST
#[derive(Clone)]
pub struct HttpBroker {
    endpoint: Url,
    client: reqwest::Client,
    auth_token: Option<SecretString>,
}

impl HttpBroker {
    /// Create a broker client for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not an http(s) URL
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid broker endpoint: {e}")))?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "broker endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            client: reqwest::Client::new(),
            auth_token: None,
        })
    }

    /// Send a bearer token with each request
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(SecretString::from(token.into()));
        self
    }

    /// Endpoint this broker posts to
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ConnectionBroker for HttpBroker {
    async fn request_connection(&self, request: &ConnectionRequest) -> Result<ConnectionDetails> {
        tracing::debug!(
            endpoint = %self.endpoint,
            agent_id = %request.agent_id,
            "requesting connection details"
        );

        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "connection broker returned {status}: {}",
                body.trim()
            )));
        }

        let details: ConnectionDetails = response.json().await?;
        tracing::info!(
            server_url = %details.server_url,
            room = details.room_name.as_deref().unwrap_or("-"),
            "received connection details"
        );
        Ok(details)
    }
}

impl std::fmt::Debug for HttpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBroker")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}
