use crate::error::CallError;
use async_trait::async_trait;
use voxcall_speech::AudioBuffer;

/// Delivers replies into a live call.
#[async_trait]
pub trait MediaChannel: Send + Sync {
    /// Plays synthesized audio to the caller.
    async fn play_audio(&self, call_id: &str, audio: AudioBuffer) -> Result<(), CallError>;

    /// Sends a reply as text when it could not be spoken.
    async fn send_text(&self, call_id: &str, text: &str) -> Result<(), CallError>;
}
