//! Speech infrastructure for VoxCall.
//!
//! Normalizes inbound call audio, runs streaming speech-to-text sessions fed
//! from a push stream, and renders text to audio through a synthesizer. The
//! cloud speech service sits behind two async trait seams,
//! [`RecognizerBackend`] and [`SynthesisBackend`], so the session and
//! synthesis lifecycles can be exercised against the in-memory backends in
//! [`testing`].

pub mod azure;
pub mod config;
pub mod error;
pub mod push_stream;
pub mod recognizer;
pub mod session;
pub mod sink;
pub mod synthesis;
pub mod testing;
pub mod transcribe;

pub use azure::{AzureRecognizer, AzureSynthesizer};
pub use config::SpeechConfig;
pub use error::{SpeechError, SpeechResult};
pub use push_stream::{push_stream, PushAudioSource, PushAudioStream, WriteRejected};
pub use recognizer::{RecognizerBackend, RecognizerEvent, RecognizerEventSender, RecognizerHandle};
pub use session::{FeedOutcome, RecognitionSession, SessionState, TranscriptReceiver};
pub use sink::{normalize, AudioChunk, BinaryBlob};
pub use synthesis::{
    escape_xml, generate_ssml, save_audio_to_file, AudioBuffer, SynthesisBackend,
    SynthesisReason, SynthesisResult, SynthesisService, Synthesizer,
};
pub use transcribe::{parse_wav, transcribe_file, WavAudio};
