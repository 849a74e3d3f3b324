//! Normalization of inbound audio fragments.
//!
//! Media bridges deliver call audio in several shapes: raw binary frames,
//! base64 text, or JSON-encoded buffers. Everything is reduced to a single
//! contiguous byte buffer before it reaches a recognition session.

use crate::error::SpeechError;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

/// A fixed-size binary wrapper (typed array or serialized buffer) around the
/// audio bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBlob {
    data: Vec<u8>,
}

impl BinaryBlob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// One inbound audio fragment, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioChunk {
    /// Raw bytes, passed through unchanged.
    Bytes(Bytes),
    /// Base64-encoded bytes.
    Base64(String),
    /// A binary wrapper unwrapped to its bytes.
    Blob(BinaryBlob),
    /// A shape that cannot carry audio. Holds a short description of it.
    Other(&'static str),
}

impl AudioChunk {
    /// Classifies a JSON value received from a media bridge.
    ///
    /// Strings are base64 and arrays are byte lists. Objects of the form
    /// `{"type":"Buffer","data":[..]}` or `{"buffer":[..]}` are blobs.
    /// Everything else becomes [`AudioChunk::Other`].
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Base64(s.clone()),
            Value::Array(items) => match byte_list(items) {
                Some(bytes) => Self::Bytes(Bytes::from(bytes)),
                None => Self::Other("array of non-byte values"),
            },
            Value::Object(map) => {
                let inner = map
                    .get("data")
                    .filter(|_| map.get("type").and_then(Value::as_str) == Some("Buffer"))
                    .or_else(|| map.get("buffer"));
                match inner {
                    Some(Value::Array(items)) => match byte_list(items) {
                        Some(bytes) => Self::Blob(BinaryBlob::new(bytes)),
                        None => Self::Other("buffer of non-byte values"),
                    },
                    _ => Self::Other("object"),
                }
            }
            Value::Null => Self::Other("null"),
            Value::Bool(_) => Self::Other("boolean"),
            Value::Number(_) => Self::Other("number"),
        }
    }

    /// Short name of the chunk shape, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Base64(_) => "base64",
            Self::Blob(_) => "blob",
            Self::Other(kind) => kind,
        }
    }
}

impl From<Bytes> for AudioChunk {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for AudioChunk {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<BinaryBlob> for AudioChunk {
    fn from(blob: BinaryBlob) -> Self {
        Self::Blob(blob)
    }
}

fn byte_list(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// Reduces a chunk to its canonical byte buffer.
///
/// # Errors
///
/// Returns `SpeechError::UnsupportedChunkType` for [`AudioChunk::Other`] and
/// for base64 text that does not decode.
pub fn normalize(chunk: AudioChunk) -> Result<Bytes, SpeechError> {
    match chunk {
        AudioChunk::Bytes(bytes) => Ok(bytes),
        AudioChunk::Base64(text) => base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map(Bytes::from)
            .map_err(|e| SpeechError::UnsupportedChunkType(format!("invalid base64 audio: {}", e))),
        AudioChunk::Blob(blob) => Ok(Bytes::from(blob.into_inner())),
        AudioChunk::Other(kind) => Err(SpeechError::UnsupportedChunkType(kind.to_string())),
    }
}
