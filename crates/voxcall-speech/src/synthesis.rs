//! Text-to-speech: SSML generation and synthesizer lifecycle.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use voxcall_types::OutputFormat;

/// Encoded audio produced by a synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub bytes: Bytes,
    pub format: OutputFormat,
}

impl AudioBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisReason {
    Completed,
    Canceled,
}

/// Raw outcome reported by a synthesizer for one SSML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    pub reason: SynthesisReason,
    pub audio: Bytes,
    pub error_details: Option<String>,
}

impl SynthesisResult {
    pub fn completed(audio: impl Into<Bytes>) -> Self {
        Self {
            reason: SynthesisReason::Completed,
            audio: audio.into(),
            error_details: None,
        }
    }

    pub fn canceled(details: impl Into<String>) -> Self {
        Self {
            reason: SynthesisReason::Canceled,
            audio: Bytes::new(),
            error_details: Some(details.into()),
        }
    }
}

/// Creates one synthesizer per synthesis request.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn create(&self, config: &SpeechConfig) -> Result<Box<dyn Synthesizer>, SpeechError>;
}

/// A single-use synthesizer handle. `close` is always called once the
/// request is over, whether it succeeded or not.
#[async_trait]
pub trait Synthesizer: Send {
    async fn speak_ssml(&mut self, ssml: &str) -> Result<SynthesisResult, SpeechError>;

    async fn close(&mut self);
}

/// Converts text into spoken audio.
pub struct SynthesisService {
    config: Option<Arc<SpeechConfig>>,
    backend: Arc<dyn SynthesisBackend>,
}

impl SynthesisService {
    /// `config` is `None` when speech was never configured; every request
    /// then fails with `SpeechError::Configuration`.
    pub fn new(config: Option<Arc<SpeechConfig>>, backend: Arc<dyn SynthesisBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> Option<&SpeechConfig> {
        self.config.as_deref()
    }

    /// Synthesizes `text` with `voice_name`, or the configured voice.
    ///
    /// # Errors
    ///
    /// - `SpeechError::Configuration` if speech was never configured.
    /// - `SpeechError::EmptyText` if `text` is empty or whitespace.
    /// - `SpeechError::Synthesis` if the backend did not complete.
    ///
    /// The first two are checked before the backend is touched.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_name: Option<&str>,
    ) -> Result<AudioBuffer, SpeechError> {
        let config = self.config.as_deref().ok_or_else(|| {
            SpeechError::Configuration("speech service is not initialized".to_string())
        })?;
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }

        let voice = voice_name
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&config.voice);
        let ssml = generate_ssml(text, voice, &config.language);

        let mut synthesizer = self.backend.create(config).await?;
        let outcome = synthesizer.speak_ssml(&ssml).await;
        synthesizer.close().await;

        let result = match outcome {
            Ok(result) => result,
            Err(SpeechError::Synthesis(details)) => return Err(SpeechError::Synthesis(details)),
            Err(e) => {
                error!(voice = %voice, error = %e, "speech synthesis request failed");
                return Err(SpeechError::Synthesis(e.to_string()));
            }
        };

        match result.reason {
            SynthesisReason::Completed => {
                info!(voice = %voice, bytes = result.audio.len(), "speech synthesized");
                Ok(AudioBuffer {
                    bytes: result.audio,
                    format: config.output_format,
                })
            }
            SynthesisReason::Canceled => {
                let details = result
                    .error_details
                    .unwrap_or_else(|| "synthesis canceled".to_string());
                error!(voice = %voice, details = %details, "speech synthesis canceled");
                Err(SpeechError::Synthesis(details))
            }
        }
    }
}

/// Escapes the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Wraps `text` in an SSML document for `voice`.
pub fn generate_ssml(text: &str, voice: &str, language: &str) -> String {
    format!(
        r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="{}"><voice name="{}"><prosody rate="medium" pitch="medium">{}</prosody></voice></speak>"#,
        escape_xml(language),
        escape_xml(voice),
        escape_xml(text)
    )
}

/// Writes synthesized audio to `path`.
pub async fn save_audio_to_file(
    audio: &AudioBuffer,
    path: impl AsRef<Path>,
) -> Result<(), SpeechError> {
    let path = path.as_ref();
    if let Err(e) = tokio::fs::write(path, &audio.bytes).await {
        error!(path = %path.display(), error = %e, "failed to save audio");
        return Err(e.into());
    }
    info!(path = %path.display(), size = audio.len(), "audio saved to file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_exactly_the_five_specials() {
        assert_eq!(
            escape_xml(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&apos;s&lt;/a&gt;"
        );
        assert_eq!(escape_xml("plain text, 100%"), "plain text, 100%");
    }

    #[test]
    fn ampersand_is_escaped_once() {
        assert_eq!(escape_xml("&amp;"), "&amp;amp;");
    }

    #[test]
    fn ssml_carries_voice_language_and_prosody() {
        let ssml = generate_ssml("Hi <there>", "en-GB-SoniaNeural", "en-GB");
        assert!(ssml.starts_with(r#"<speak version="1.0""#));
        assert!(ssml.contains(r#"xml:lang="en-GB""#));
        assert!(ssml.contains(r#"<voice name="en-GB-SoniaNeural">"#));
        assert!(ssml.contains(
            r#"<prosody rate="medium" pitch="medium">Hi &lt;there&gt;</prosody>"#
        ));
        assert!(ssml.ends_with("</voice></speak>"));
    }
}
