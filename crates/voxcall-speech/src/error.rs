use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported audio chunk type: {0}")]
    UnsupportedChunkType(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Recognition start failed: {0}")]
    StartFailure(String),

    #[error("Recognition stop failed: {0}")]
    StopFailure(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Speech synthesis text is empty")]
    EmptyText,

    #[error("Recognition canceled by backend: {0}")]
    BackendCancellation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Speech transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SpeechResult<T> = Result<T, SpeechError>;
