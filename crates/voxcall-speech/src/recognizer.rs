//! Backend seam for streaming speech recognition.
//!
//! A backend consumes audio from a [`PushAudioSource`] and reports what
//! happens through a single ordered channel of [`RecognizerEvent`]s, in place
//! of separately registered callbacks.

use crate::error::SpeechError;
use crate::push_stream::PushAudioSource;
use async_trait::async_trait;
use tokio::sync::mpsc;
use voxcall_types::{AudioFormat, TranscriptEvent};

/// Lifecycle and result notifications raised by a recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// The backend accepted the session and is consuming audio.
    SessionStarted { session_id: String },
    /// The backend finished the session.
    SessionStopped { session_id: String },
    /// The backend aborted the session.
    Canceled { error_details: String },
    /// A partial or final recognition result.
    Transcribed(TranscriptEvent),
}

pub type RecognizerEventSender = mpsc::UnboundedSender<RecognizerEvent>;

/// Opens recognition sessions against a speech service.
#[async_trait]
pub trait RecognizerBackend: Send + Sync {
    /// Starts recognizing audio read from `audio`.
    ///
    /// The backend must send [`RecognizerEvent::SessionStarted`] once the
    /// service has confirmed the session. Dropping every clone of `events`
    /// marks the end of the session.
    async fn open(
        &self,
        format: &AudioFormat,
        audio: PushAudioSource,
        events: RecognizerEventSender,
    ) -> Result<Box<dyn RecognizerHandle>, SpeechError>;
}

/// Control handle for one open recognition session.
#[async_trait]
pub trait RecognizerHandle: Send {
    /// Asks the backend to finish the session. Resolves when the backend has
    /// confirmed the stop.
    async fn stop(&mut self) -> Result<(), SpeechError>;
}
