//! Fan-out of replies to the media bridges attached to each call.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use voxcall_calls::{CallError, MediaChannel};
use voxcall_speech::AudioBuffer;

/// Frames queued per bridge before a slow bridge starts losing replies.
const BRIDGE_BUFFER: usize = 32;

/// One reply headed for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    Audio(Bytes),
    Text(String),
}

/// Routes replies to the websocket bridges connected for each call.
#[derive(Default)]
pub struct MediaHub {
    channels: Mutex<HashMap<String, broadcast::Sender<MediaFrame>>>,
}

impl MediaHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<MediaFrame>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attaches a bridge to `call_id`.
    pub fn subscribe(&self, call_id: &str) -> broadcast::Receiver<MediaFrame> {
        self.channels()
            .entry(call_id.to_string())
            .or_insert_with(|| broadcast::channel(BRIDGE_BUFFER).0)
            .subscribe()
    }

    /// Forgets `call_id` once its last bridge has gone away.
    pub fn release(&self, call_id: &str) {
        let mut channels = self.channels();
        if channels
            .get(call_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(call_id);
        }
    }

    pub fn bridges(&self, call_id: &str) -> usize {
        self.channels()
            .get(call_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn deliver(&self, call_id: &str, frame: MediaFrame) -> Result<usize, CallError> {
        let tx = self.channels().get(call_id).cloned();
        tx.and_then(|tx| tx.send(frame).ok())
            .ok_or_else(|| CallError::Media(format!("no media bridge connected for call {}", call_id)))
    }
}

#[async_trait]
impl MediaChannel for MediaHub {
    async fn play_audio(&self, call_id: &str, audio: AudioBuffer) -> Result<(), CallError> {
        let bytes = audio.len();
        let bridges = self.deliver(call_id, MediaFrame::Audio(audio.bytes))?;
        tracing::debug!(call_id, bytes, bridges, "queued reply audio");
        Ok(())
    }

    async fn send_text(&self, call_id: &str, text: &str) -> Result<(), CallError> {
        let bridges = self.deliver(call_id, MediaFrame::Text(text.to_string()))?;
        tracing::debug!(call_id, bridges, "queued text reply");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcall_types::OutputFormat;

    #[tokio::test]
    async fn delivers_to_every_bridge_of_the_call() {
        let hub = MediaHub::new();
        let mut first = hub.subscribe("call-1");
        let mut second = hub.subscribe("call-1");
        let mut other = hub.subscribe("call-2");

        hub.play_audio(
            "call-1",
            AudioBuffer {
                bytes: Bytes::from_static(b"mp3"),
                format: OutputFormat::default(),
            },
        )
        .await
        .unwrap();

        assert_eq!(first.recv().await.unwrap(), MediaFrame::Audio(Bytes::from_static(b"mp3")));
        assert_eq!(second.recv().await.unwrap(), MediaFrame::Audio(Bytes::from_static(b"mp3")));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn unbridged_call_is_a_media_error() {
        let hub = MediaHub::new();
        assert!(matches!(
            hub.send_text("nobody", "hello").await,
            Err(CallError::Media(_))
        ));
    }

    #[tokio::test]
    async fn release_waits_for_last_bridge() {
        let hub = MediaHub::new();
        let first = hub.subscribe("call-1");
        let second = hub.subscribe("call-1");

        drop(first);
        hub.release("call-1");
        assert_eq!(hub.bridges("call-1"), 1);

        drop(second);
        hub.release("call-1");
        assert_eq!(hub.bridges("call-1"), 0);
        assert!(hub.channels().is_empty());
    }
}
