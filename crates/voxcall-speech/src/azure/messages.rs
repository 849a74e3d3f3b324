//! Text frames received from the recognition websocket.
//!
//! Frames are header-prefixed: a block of `Name:value` lines containing
//! `Path:`, a blank line, then a JSON body.
//!
//! ```text
//! X-RequestId:5c1a...
//! Path:speech.phrase
//! Content-Type:application/json; charset=utf-8
//!
//! {"RecognitionStatus":"Success","DisplayText":"Hello.", ...}
//! ```

use serde::Deserialize;
use thiserror::Error;
use voxcall_types::TranscriptEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message has no Path header")]
    MissingPath,
    #[error("invalid {path} body: {reason}")]
    InvalidBody { path: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Hypothesis {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NBestEntry {
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub display: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Phrase {
    pub recognition_status: String,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default, rename = "NBest")]
    pub n_best: Vec<NBestEntry>,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

impl Phrase {
    pub fn is_success(&self) -> bool {
        self.recognition_status == "Success"
    }

    /// `Error` and any status the service documents as a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self.recognition_status.as_str(),
            "Error" | "BadRequest" | "Forbidden" | "TooManyRequests" | "ServiceUnavailable"
        )
    }

    /// Highest-confidence alternative, falling back to `DisplayText`.
    pub fn best_text(&self) -> Option<&str> {
        self.n_best
            .iter()
            .filter(|entry| !entry.display.is_empty())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|entry| entry.display.as_str())
            .or(self.display_text.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    TurnStart,
    TurnEnd,
    SpeechStartDetected,
    SpeechEndDetected,
    Hypothesis(Hypothesis),
    Phrase(Phrase),
    Other(String),
}

impl ServiceMessage {
    pub fn parse(frame: &str) -> Result<Self, MessageError> {
        let (headers, body) = match frame.find("\r\n\r\n") {
            Some(pos) => (&frame[..pos], &frame[pos + 4..]),
            None => match frame.find("\n\n") {
                Some(pos) => (&frame[..pos], &frame[pos + 2..]),
                None => (frame, ""),
            },
        };

        let path = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("path"))
            .map(|(_, value)| value.trim().to_string())
            .ok_or(MessageError::MissingPath)?;

        let invalid = |e: serde_json::Error| MessageError::InvalidBody {
            path: path.clone(),
            reason: e.to_string(),
        };

        Ok(match path.to_ascii_lowercase().as_str() {
            "turn.start" => Self::TurnStart,
            "turn.end" => Self::TurnEnd,
            "speech.startdetected" => Self::SpeechStartDetected,
            "speech.enddetected" => Self::SpeechEndDetected,
            "speech.hypothesis" => Self::Hypothesis(serde_json::from_str(body.trim()).map_err(invalid)?),
            "speech.phrase" => Self::Phrase(serde_json::from_str(body.trim()).map_err(invalid)?),
            _ => Self::Other(path),
        })
    }

    /// Transcript carried by this message, if any.
    pub fn transcript(&self) -> Option<TranscriptEvent> {
        match self {
            Self::Hypothesis(h) if !h.text.trim().is_empty() => Some(TranscriptEvent {
                text: h.text.clone(),
                speaker_id: h.speaker_id.clone(),
                is_final: false,
            }),
            Self::Phrase(p) if p.is_success() => p.best_text().map(|text| TranscriptEvent {
                text: text.to_string(),
                speaker_id: p.speaker_id.clone(),
                is_final: true,
            }),
            _ => None,
        }
    }
}
