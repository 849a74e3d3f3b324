//! Shared types for the VoxCall voice-call service.
//!
//! This crate holds the definitions that cross crate boundaries: the call
//! lifecycle states, transcript events emitted by recognition sessions, the
//! telephony notification payloads delivered to the calling webhook, and the
//! audio format descriptors used by recognition and synthesis.
//!
//! Nothing here performs I/O. Crates in the workspace depend on
//! `voxcall-types` for cross-cutting definitions so that the speech and call
//! layers never need to depend on each other's internals.

pub mod audio;

pub use audio::{AudioFormat, OutputFormat, UnknownOutputFormat};

use serde::{Deserialize, Serialize};

/// Notification `changeType` that announces a new call resource.
pub const CHANGE_TYPE_CREATED: &str = "created";

/// Call resource state reported for a call waiting to be answered.
pub const CALL_STATE_INCOMING: &str = "incoming";

/// Call resource state reported once the remote side has hung up.
pub const CALL_STATE_TERMINATED: &str = "terminated";

/// Lifecycle state of one phone call.
///
/// Calls move forward through `Incoming -> Answering -> Answered ->
/// Recognizing -> Closing -> Closed`. `Failed` can be entered from any
/// non-terminal state. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// An incoming notification was received; nothing has been done yet.
    Incoming,
    /// Credential acquisition and the answer request are in flight.
    Answering,
    /// The call was answered; recognition has not started yet.
    Answered,
    /// A recognition session is bound to the call and accepting audio.
    Recognizing,
    /// The call is being torn down.
    Closing,
    /// The call ended normally.
    Closed,
    /// The call was aborted by an unrecoverable error.
    Failed,
}

impl CallState {
    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Returns the snake_case label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Answering => "answering",
            Self::Answered => "answered",
            Self::Recognizing => "recognizing",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of recognized speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    /// `false` for interim hypotheses that may still change.
    pub is_final: bool,
}

impl TranscriptEvent {
    /// Creates a final transcript event without speaker attribution.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: None,
            is_final: true,
        }
    }

    /// Creates an interim (partial) transcript event.
    pub fn partial_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: None,
            is_final: false,
        }
    }
}

/// Body of a change notification POSTed to the calling webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallNotificationBatch {
    #[serde(default)]
    pub value: Vec<CallNotification>,
}

/// One change notification about a call resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNotification {
    #[serde(default)]
    pub change_type: String,
    /// Resource path, e.g. `/app/calls/{id}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<CallResource>,
}

impl CallNotification {
    /// Returns `true` if this notification announces a newly created resource.
    pub fn is_created(&self) -> bool {
        self.change_type.eq_ignore_ascii_case(CHANGE_TYPE_CREATED)
    }
}

/// The call resource embedded in a notification.
///
/// Only the fields VoxCall routes on are typed; everything else the
/// telephony platform sends is preserved in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CallResource {
    /// Returns `true` if the call is waiting to be answered.
    pub fn is_incoming(&self) -> bool {
        self.state == CALL_STATE_INCOMING
    }

    /// Returns `true` if the remote side has ended the call.
    pub fn is_terminated(&self) -> bool {
        self.state == CALL_STATE_TERMINATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_incoming_call_notification() {
        let body = r##"{
            "value": [{
                "changeType": "created",
                "resource": "/app/calls/abc",
                "resourceData": {
                    "@odata.type": "#microsoft.graph.call",
                    "id": "abc",
                    "state": "incoming",
                    "tenantId": "tenant-1",
                    "direction": "incoming"
                }
            }]
        }"##;

        let batch: CallNotificationBatch = serde_json::from_str(body).unwrap();
        assert_eq!(batch.value.len(), 1);

        let note = &batch.value[0];
        assert!(note.is_created());
        let call = note.resource_data.as_ref().unwrap();
        assert_eq!(call.id, "abc");
        assert!(call.is_incoming());
        assert_eq!(call.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(call.extra["direction"], "incoming");
    }

    #[test]
    fn tolerates_missing_fields() {
        let batch: CallNotificationBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.value.is_empty());

        let batch: CallNotificationBatch =
            serde_json::from_str(r#"{"value":[{"changeType":"updated"}]}"#).unwrap();
        assert!(!batch.value[0].is_created());
        assert!(batch.value[0].resource_data.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(CallState::Closed.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::Recognizing.is_terminal());
        assert_eq!(CallState::Recognizing.to_string(), "recognizing");
    }

    #[test]
    fn transcript_event_uses_camel_case() {
        let event = TranscriptEvent {
            text: "hi".to_string(),
            speaker_id: Some("Guest-1".to_string()),
            is_final: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["speakerId"], "Guest-1");
        assert_eq!(json["isFinal"], true);
    }
}
