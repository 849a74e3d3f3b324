//! Audio format descriptors for recognition input and synthesis output.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// PCM layout of audio written into a recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// 16 kHz, 16-bit, mono PCM. The format telephony media is bridged in.
    pub const PCM_16K_MONO: Self = Self {
        sample_rate: 16_000,
        bits_per_sample: 16,
        channels: 1,
    };

    pub const MAX_SAMPLE_RATE: u32 = 192_000;
    pub const MAX_BITS_PER_SAMPLE: u16 = 32;
    pub const MAX_CHANNELS: u16 = 8;

    /// Returns `true` for whole-byte PCM layouts within the ranges speech
    /// recognition accepts.
    pub fn is_supported(&self) -> bool {
        (1..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate)
            && (1..=Self::MAX_CHANNELS).contains(&self.channels)
            && (8..=Self::MAX_BITS_PER_SAMPLE).contains(&self.bits_per_sample)
            && self.bits_per_sample % 8 == 0
    }

    fn frame_len(&self) -> usize {
        (self.channels as usize).saturating_mul(self.bits_per_sample as usize / 8)
    }

    /// Number of bytes making up one second of audio. Saturates for layouts
    /// outside [`is_supported`](Self::is_supported).
    pub fn bytes_per_second(&self) -> usize {
        (self.sample_rate as usize).saturating_mul(self.frame_len())
    }

    /// Number of bytes making up `millis` milliseconds of audio, rounded down
    /// to a whole frame.
    pub fn bytes_for_millis(&self, millis: u64) -> usize {
        let frame = self.frame_len().max(1);
        let raw = (self.bytes_per_second() as u64).saturating_mul(millis) / 1000;
        let raw = usize::try_from(raw).unwrap_or(usize::MAX);
        (raw / frame).max(1).saturating_mul(frame)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::PCM_16K_MONO
    }
}

/// Encoded audio format produced by synthesis.
///
/// The serialized names match the values of the `X-Microsoft-OutputFormat`
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "audio-16khz-32kbitrate-mono-mp3")]
    Audio16Khz32KBitRateMonoMp3,
    #[serde(rename = "audio-24khz-48kbitrate-mono-mp3")]
    Audio24Khz48KBitRateMonoMp3,
    #[serde(rename = "riff-16khz-16bit-mono-pcm")]
    Riff16Khz16BitMonoPcm,
    #[serde(rename = "raw-16khz-16bit-mono-pcm")]
    Raw16Khz16BitMonoPcm,
}

impl OutputFormat {
    /// Header value understood by the synthesis endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio16Khz32KBitRateMonoMp3 => "audio-16khz-32kbitrate-mono-mp3",
            Self::Audio24Khz48KBitRateMonoMp3 => "audio-24khz-48kbitrate-mono-mp3",
            Self::Riff16Khz16BitMonoPcm => "riff-16khz-16bit-mono-pcm",
            Self::Raw16Khz16BitMonoPcm => "raw-16khz-16bit-mono-pcm",
        }
    }

    /// MIME type for HTTP responses carrying this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Audio16Khz32KBitRateMonoMp3 | Self::Audio24Khz48KBitRateMonoMp3 => "audio/mpeg",
            Self::Riff16Khz16BitMonoPcm => "audio/wav",
            Self::Raw16Khz16BitMonoPcm => "audio/L16; rate=16000; channels=1",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown output format: {0}")]
pub struct UnknownOutputFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownOutputFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio-16khz-32kbitrate-mono-mp3" => Ok(Self::Audio16Khz32KBitRateMonoMp3),
            "audio-24khz-48kbitrate-mono-mp3" => Ok(Self::Audio24Khz48KBitRateMonoMp3),
            "riff-16khz-16bit-mono-pcm" => Ok(Self::Riff16Khz16BitMonoPcm),
            "raw-16khz-16bit-mono-pcm" => Ok(Self::Raw16Khz16BitMonoPcm),
            other => Err(UnknownOutputFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_16k_byte_math() {
        let format = AudioFormat::PCM_16K_MONO;
        assert_eq!(format.bytes_per_second(), 32_000);
        assert_eq!(format.bytes_for_millis(100), 3_200);
        assert!(format.is_supported());
    }

    #[test]
    fn oversized_layouts_saturate_and_are_unsupported() {
        let format = AudioFormat {
            sample_rate: u32::MAX,
            bits_per_sample: 65_528,
            channels: u16::MAX,
        };
        assert!(!format.is_supported());
        assert!(format.bytes_for_millis(100) > 0);

        for format in [
            AudioFormat { sample_rate: 384_000, ..AudioFormat::PCM_16K_MONO },
            AudioFormat { channels: 16, ..AudioFormat::PCM_16K_MONO },
            AudioFormat { bits_per_sample: 64, ..AudioFormat::PCM_16K_MONO },
            AudioFormat { bits_per_sample: 12, ..AudioFormat::PCM_16K_MONO },
        ] {
            assert!(!format.is_supported(), "{:?}", format);
        }
    }

    #[test]
    fn output_format_parses_header_names() {
        for format in [
            OutputFormat::Audio16Khz32KBitRateMonoMp3,
            OutputFormat::Audio24Khz48KBitRateMonoMp3,
            OutputFormat::Riff16Khz16BitMonoPcm,
            OutputFormat::Raw16Khz16BitMonoPcm,
        ] {
            assert_eq!(format.as_str().parse::<OutputFormat>().unwrap(), format);
        }
        assert!("ogg-vorbis".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn output_format_serializes_as_header_value() {
        let json = serde_json::to_string(&OutputFormat::default()).unwrap();
        assert_eq!(json, "\"audio-16khz-32kbitrate-mono-mp3\"");
    }
}
