//! Conversational replies from an Azure AI Foundry agent.
//!
//! Each reply runs the agent on a fresh thread: create the thread, post the
//! user's words, start a run, poll it to completion and read back the last
//! assistant message.

use crate::error::CallError;
use crate::poll::{poll_until, PollError, PollPolicy, PollStatus};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NO_ASSISTANT_RESPONSE: &str = "No assistant response found.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces the text spoken back to the caller for one utterance.
#[async_trait]
pub trait ReplyProducer: Send + Sync {
    async fn reply(&self, text: &str) -> Result<String, CallError>;
}

#[derive(Clone)]
pub struct FoundrySettings {
    /// Project endpoint, e.g. `https://{resource}.services.ai.azure.com/api/projects/{project}`.
    pub endpoint: String,
    pub agent_id: String,
    pub api_key: String,
    pub api_version: String,
    pub poll: PollPolicy,
}

impl fmt::Debug for FoundrySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FoundrySettings")
            .field("endpoint", &self.endpoint)
            .field("agent_id", &self.agent_id)
            .field("api_key", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("poll", &self.poll)
            .finish()
    }
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Last text authored by the assistant in an ascending message list.
fn last_assistant_text(messages: &[ThreadMessage]) -> Option<&str> {
    messages
        .iter()
        .filter(|m| m.role == "assistant")
        .filter_map(|m| {
            m.content
                .iter()
                .find(|c| c.kind == "text" && c.text.is_some())
                .and_then(|c| c.text.as_ref())
                .map(|t| t.value.as_str())
        })
        .last()
}

fn describe_error(error: &Option<serde_json::Value>) -> String {
    match error {
        Some(serde_json::Value::Object(map)) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| serde_json::Value::Object(map.clone()).to_string()),
        Some(other) => other.to_string(),
        None => "no error details".to_string(),
    }
}

/// [`ReplyProducer`] backed by the Foundry agents REST API.
pub struct FoundryAssistant {
    http: reqwest::Client,
    settings: FoundrySettings,
}

impl FoundryAssistant {
    pub fn new(settings: FoundrySettings) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CallError::Reply(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http, settings))
    }

    pub fn with_client(http: reqwest::Client, settings: FoundrySettings) -> Self {
        Self { http, settings }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.settings.endpoint.trim_end_matches('/'),
            path
        )
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, CallError> {
        let response = request
            .bearer_auth(&self.settings.api_key)
            .query(&[("api-version", self.settings.api_version.as_str())])
            .send()
            .await
            .map_err(|e| CallError::Reply(format!("agent request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Reply(format!(
                "agent service returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CallError::Reply(format!("invalid agent response: {}", e)))
    }

    async fn probe_run(&self, thread_id: &str, run_id: &str) -> Result<PollStatus<()>, CallError> {
        let run: Run = self
            .send(self.http.get(self.url(&format!("/threads/{}/runs/{}", thread_id, run_id))))
            .await?;
        debug!(thread_id, run_id, status = %run.status, "agent run status");

        match run.status.as_str() {
            "queued" | "in_progress" | "cancelling" => Ok(PollStatus::Pending),
            "completed" => Ok(PollStatus::Ready(())),
            "failed" => Err(CallError::Reply(format!(
                "agent run failed: {}",
                describe_error(&run.last_error)
            ))),
            // Whatever the thread holds is still read back.
            other => {
                warn!(thread_id, run_id, status = other, "agent run stopped without completing");
                Ok(PollStatus::Ready(()))
            }
        }
    }
}

#[async_trait]
impl ReplyProducer for FoundryAssistant {
    async fn reply(&self, text: &str) -> Result<String, CallError> {
        let thread: Created = self
            .send(self.http.post(self.url("/threads")).json(&json!({})))
            .await?;
        let thread_id = thread.id.as_str();

        let _: serde_json::Value = self
            .send(
                self.http
                    .post(self.url(&format!("/threads/{}/messages", thread_id)))
                    .json(&NewMessage {
                        role: "user",
                        content: text,
                    }),
            )
            .await?;

        let run: Run = self
            .send(
                self.http
                    .post(self.url(&format!("/threads/{}/runs", thread_id)))
                    .json(&json!({ "assistant_id": self.settings.agent_id })),
            )
            .await?;
        let run_id = run.id.as_str();

        match run.status.as_str() {
            "completed" => {}
            _ => poll_until(&self.settings.poll, move |_| self.probe_run(thread_id, run_id))
                .await
                .map_err(|e| match e {
                    PollError::Timeout { attempts, elapsed } => CallError::Timeout(format!(
                        "agent run {} still pending after {} polls ({:?})",
                        run_id, attempts, elapsed
                    )),
                    PollError::Probe(e) => e,
                })?,
        }

        let messages: MessageList = self
            .send(
                self.http
                    .get(self.url(&format!("/threads/{}/messages", thread_id)))
                    .query(&[("order", "asc")]),
            )
            .await?;

        let reply = last_assistant_text(&messages.data)
            .unwrap_or(NO_ASSISTANT_RESPONSE)
            .to_string();
        info!(thread_id, run_id, reply_len = reply.len(), "agent replied");
        Ok(reply)
    }
}
