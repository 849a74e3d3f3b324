//! Telephony control through the Microsoft Graph communications API.

use crate::error::CallError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Acquires credentials and answers calls on the telephony platform.
#[async_trait]
pub trait CallingClient: Send + Sync {
    /// Returns an access token valid for `tenant_id`.
    async fn acquire_token(&self, tenant_id: &str) -> Result<String, CallError>;

    /// Answers `call_id`, asking the platform to deliver further call
    /// notifications to `callback_uri`.
    async fn answer_call(
        &self,
        call_id: &str,
        token: &str,
        callback_uri: &str,
    ) -> Result<(), CallError>;
}

#[derive(Clone)]
pub struct GraphSettings {
    pub client_id: String,
    pub client_secret: String,
    pub login_base_url: String,
    pub graph_base_url: String,
}

impl fmt::Debug for GraphSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("login_base_url", &self.login_base_url)
            .field("graph_base_url", &self.graph_base_url)
            .finish()
    }
}

impl GraphSettings {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            login_base_url: "https://login.microsoftonline.com".to_string(),
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// [`CallingClient`] for Microsoft Graph.
///
/// Client-credential tokens are cached per tenant until shortly before they
/// expire.
pub struct GraphCallingClient {
    http: reqwest::Client,
    settings: GraphSettings,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl GraphCallingClient {
    pub fn new(settings: GraphSettings) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CallError::Credential(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http, settings))
    }

    pub fn with_client(http: reqwest::Client, settings: GraphSettings) -> Self {
        if !settings.has_credentials() {
            warn!("calling client id or secret not configured; answering calls will fail");
        }
        Self {
            http,
            settings,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CachedToken>> {
        match self.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cached_token(&self, tenant_id: &str) -> Option<String> {
        let tokens = self.tokens();
        tokens
            .get(tenant_id)
            .filter(|token| Instant::now() < token.refresh_at)
            .map(|token| token.value.clone())
    }
}

#[async_trait]
impl CallingClient for GraphCallingClient {
    async fn acquire_token(&self, tenant_id: &str) -> Result<String, CallError> {
        if tenant_id.trim().is_empty() {
            return Err(CallError::Credential("notification carries no tenant id".to_string()));
        }
        if let Some(token) = self.cached_token(tenant_id) {
            debug!(tenant_id, "using cached access token");
            return Ok(token);
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.settings.login_base_url.trim_end_matches('/'),
            tenant_id
        );
        let form = [
            ("client_id", self.settings.client_id.as_str()),
            ("scope", GRAPH_SCOPE),
            ("client_secret", self.settings.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CallError::Credential(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Credential(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CallError::Credential(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0));
        if lifetime > REFRESH_MARGIN {
            self.tokens().insert(
                tenant_id.to_string(),
                CachedToken {
                    value: token.access_token.clone(),
                    refresh_at: Instant::now() + (lifetime - REFRESH_MARGIN),
                },
            );
        }
        info!(tenant_id, expires_in = lifetime.as_secs(), "acquired access token");
        Ok(token.access_token)
    }

    async fn answer_call(
        &self,
        call_id: &str,
        token: &str,
        callback_uri: &str,
    ) -> Result<(), CallError> {
        let url = format!(
            "{}/communications/calls/{}/answer",
            self.settings.graph_base_url.trim_end_matches('/'),
            call_id
        );
        let body = json!({
            "callbackUri": callback_uri,
            "mediaConfig": {
                "@odata.type": "#microsoft.graph.serviceHostedMediaConfig"
            },
            "acceptedModalities": ["audio"]
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Answer(format!("answer request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Answer(format!(
                "answer endpoint returned {}: {}",
                status, body
            )));
        }

        info!(call_id, status = status.as_u16(), "call answered");
        Ok(())
    }
}
