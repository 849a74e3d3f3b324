use crate::error::SpeechError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use voxcall_types::{AudioFormat, OutputFormat};

fn default_language() -> String {
    "en-US".to_string()
}

fn default_voice() -> String {
    "en-US-JennyNeural".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_start_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    250
}

fn default_push_buffer_chunks() -> usize {
    64
}

/// Process-wide speech settings.
///
/// Built once at startup and shared read-only (`Arc<SpeechConfig>`) by every
/// recognition session and the synthesis service.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Azure region hosting the speech resource, e.g. `eastus`.
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing)]
    pub subscription_key: String,
    /// BCP-47 recognition and synthesis language.
    #[serde(default = "default_language")]
    pub language: String,
    /// Default synthesis voice.
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Sample rate of PCM audio bridged in from calls.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// How long to wait for the backend to confirm a recognition start.
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    /// How long to wait for the backend to confirm a stop before local
    /// resources are closed anyway.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Upper bound on a single push-stream write when the buffer is full.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Capacity of the push stream, in chunks.
    #[serde(default = "default_push_buffer_chunks")]
    pub push_buffer_chunks: usize,
    /// Overrides the regional synthesis endpoint (used by tests and proxies).
    #[serde(default)]
    pub synthesis_endpoint: Option<String>,
    /// Overrides the regional recognition websocket endpoint.
    #[serde(default)]
    pub recognition_endpoint: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            subscription_key: String::new(),
            language: default_language(),
            voice: default_voice(),
            output_format: OutputFormat::default(),
            sample_rate: default_sample_rate(),
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            push_buffer_chunks: default_push_buffer_chunks(),
            synthesis_endpoint: None,
            recognition_endpoint: None,
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("region", &self.region)
            .field("subscription_key", &"[REDACTED]")
            .field("language", &self.language)
            .field("voice", &self.voice)
            .field("output_format", &self.output_format)
            .field("sample_rate", &self.sample_rate)
            .field("start_timeout_ms", &self.start_timeout_ms)
            .field("stop_timeout_ms", &self.stop_timeout_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("push_buffer_chunks", &self.push_buffer_chunks)
            .finish()
    }
}

impl SpeechConfig {
    pub fn new(region: impl Into<String>, subscription_key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            subscription_key: subscription_key.into(),
            ..Default::default()
        }
    }

    /// Checks that credentials and limits are usable.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the region or subscription key
    /// is missing, or a timeout or buffer size is zero.
    pub fn validate(&self) -> Result<(), SpeechError> {
        if self.region.trim().is_empty() || self.subscription_key.trim().is_empty() {
            return Err(SpeechError::Configuration(
                "speech service key and region must be configured".to_string(),
            ));
        }
        if self.push_buffer_chunks == 0 {
            return Err(SpeechError::Configuration(
                "push_buffer_chunks must be at least 1".to_string(),
            ));
        }
        if self.start_timeout_ms == 0 || self.stop_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(SpeechError::Configuration(
                "speech timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// PCM format that call audio is expected in.
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            ..AudioFormat::PCM_16K_MONO
        }
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// REST endpoint for text-to-speech.
    pub fn synthesis_url(&self) -> String {
        match &self.synthesis_endpoint {
            Some(url) => url.clone(),
            None => format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                self.region
            ),
        }
    }

    /// Websocket endpoint for streaming recognition, including query
    /// parameters.
    pub fn recognition_url(&self) -> String {
        let base = match &self.recognition_endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                self.region
            ),
        };
        format!("{}?language={}&format=detailed", base, self.language)
    }

    /// Host name of the recognition endpoint.
    pub fn recognition_host(&self) -> String {
        format!("{}.stt.speech.microsoft.com", self.region)
    }
}
