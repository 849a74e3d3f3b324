use thiserror::Error;
use voxcall_speech::SpeechError;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Credential acquisition failed: {0}")]
    Credential(String),

    #[error("Answering call failed: {0}")]
    Answer(String),

    #[error("Recognition error: {0}")]
    Recognition(#[from] SpeechError),

    #[error("Reply generation failed: {0}")]
    Reply(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Media delivery failed: {0}")]
    Media(String),

    #[error("Invalid notification: {0}")]
    Invalid(String),
}
