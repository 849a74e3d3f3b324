//! Batch transcription of WAV files through a recognition session.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::recognizer::RecognizerBackend;
use crate::session::{FeedOutcome, RecognitionSession};
use crate::sink::AudioChunk;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use voxcall_types::AudioFormat;

const CHUNK_MILLIS: u64 = 100;
const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// PCM samples and their layout, extracted from a RIFF/WAVE container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    pub format: AudioFormat,
    pub samples: Bytes,
}

fn invalid(reason: impl Into<String>) -> SpeechError {
    SpeechError::InvalidAudio(reason.into())
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parses a PCM WAV file.
///
/// # Errors
///
/// Returns `SpeechError::InvalidAudio` if the header is not RIFF/WAVE, the
/// `fmt ` chunk is missing or not integer PCM, the layout is outside
/// [`AudioFormat::is_supported`], or there is no `data` chunk.
pub fn parse_wav(bytes: Bytes) -> Result<WavAudio, SpeechError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("not a RIFF/WAVE file"));
    }

    let mut format = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let declared = u32_at(&bytes, offset + 4) as usize;
        let body = offset + 8;
        let remaining = bytes.len() - body;

        match id {
            b"fmt " => {
                if declared < 16 || remaining < 16 {
                    return Err(invalid("fmt chunk is truncated"));
                }
                let tag = u16_at(&bytes, body);
                if tag != WAVE_FORMAT_PCM && tag != WAVE_FORMAT_EXTENSIBLE {
                    return Err(invalid(format!("unsupported WAV encoding {:#06x}", tag)));
                }
                let channels = u16_at(&bytes, body + 2);
                let sample_rate = u32_at(&bytes, body + 4);
                let bits_per_sample = u16_at(&bytes, body + 14);
                let layout = AudioFormat {
                    sample_rate,
                    bits_per_sample,
                    channels,
                };
                if !layout.is_supported() {
                    return Err(invalid(format!(
                        "unsupported layout: {} Hz, {} bits, {} channels",
                        sample_rate, bits_per_sample, channels
                    )));
                }
                format = Some(layout);
            }
            b"data" => {
                let format = format.ok_or_else(|| invalid("data chunk precedes fmt chunk"))?;
                // Streamed WAVs leave the size unset.
                let len = if declared == u32::MAX as usize || declared == 0 {
                    remaining
                } else if declared > remaining {
                    return Err(invalid("data chunk is truncated"));
                } else {
                    declared
                };
                return Ok(WavAudio {
                    format,
                    samples: bytes.slice(body..body + len),
                });
            }
            _ => {}
        }

        if declared > remaining {
            break;
        }
        offset = body + declared + (declared & 1);
    }

    Err(invalid("no data chunk"))
}

/// Transcribes the WAV file at `path` and returns the final transcripts
/// joined by single spaces.
///
/// The samples are fed in 100 ms chunks through a fresh
/// [`RecognitionSession`], which is then stopped. Transcripts are collected
/// for at most the configured stop timeout after that.
pub async fn transcribe_file(
    config: Arc<SpeechConfig>,
    backend: Arc<dyn RecognizerBackend>,
    path: impl AsRef<Path>,
) -> Result<String, SpeechError> {
    let path = path.as_ref();
    let wav = parse_wav(Bytes::from(tokio::fs::read(path).await?))?;
    info!(
        path = %path.display(),
        sample_rate = wav.format.sample_rate,
        channels = wav.format.channels,
        bytes = wav.samples.len(),
        "transcribing file"
    );

    let session = RecognitionSession::with_name(
        path.display().to_string(),
        Arc::clone(&config),
        backend,
    );
    let mut transcripts = session.start(wav.format).await?;

    let chunk_len = wav.format.bytes_for_millis(CHUNK_MILLIS);
    let mut dropped = 0usize;
    let mut start = 0;
    while start < wav.samples.len() {
        let end = (start + chunk_len).min(wav.samples.len());
        match session.feed(AudioChunk::Bytes(wav.samples.slice(start..end))).await {
            FeedOutcome::Written => {}
            FeedOutcome::Dropped => dropped += 1,
            FeedOutcome::Inactive => break,
        }
        start = end;
    }
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "some audio chunks were dropped");
    }

    let stopped = session.stop().await;

    let mut texts = Vec::new();
    let collect = async {
        while let Some(event) = transcripts.recv().await {
            texts.push(event.text);
        }
    };
    if tokio::time::timeout(config.stop_timeout(), collect).await.is_err() {
        warn!(path = %path.display(), "transcript stream did not end in time");
        session.close();
    }
    stopped?;

    let text = texts.join(" ");
    info!(path = %path.display(), segments = texts.len(), "file transcribed");
    Ok(text)
}
