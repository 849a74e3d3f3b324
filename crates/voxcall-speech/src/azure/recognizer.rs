//! Streaming recognition over the speech service websocket.

use super::messages::ServiceMessage;
use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::push_stream::PushAudioSource;
use crate::recognizer::{RecognizerBackend, RecognizerEvent, RecognizerEventSender, RecognizerHandle};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use voxcall_types::AudioFormat;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type StopReply = oneshot::Sender<Result<(), SpeechError>>;

const KEEPALIVE_AFTER: Duration = Duration::from_secs(5);
const KEEPALIVE_FRAME_BYTES: usize = 64;

fn content_type(format: &AudioFormat) -> String {
    format!(
        "audio/wav; codecs=audio/pcm; samplerate={}",
        format.sample_rate
    )
}

/// Recognizer backed by the regional speech-to-text websocket.
pub struct AzureRecognizer {
    config: Arc<SpeechConfig>,
}

impl AzureRecognizer {
    pub fn new(config: Arc<SpeechConfig>) -> Self {
        Self { config }
    }

    fn build_request(
        &self,
        format: &AudioFormat,
        connection_id: &str,
    ) -> Result<Request<()>, SpeechError> {
        Request::builder()
            .method("GET")
            .uri(self.config.recognition_url())
            .header("Host", self.config.recognition_host())
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("X-ConnectionId", connection_id)
            .header("Content-Type", content_type(format))
            .body(())
            .map_err(|e| SpeechError::Configuration(format!("invalid recognition request: {}", e)))
    }
}

#[async_trait]
impl RecognizerBackend for AzureRecognizer {
    async fn open(
        &self,
        format: &AudioFormat,
        audio: PushAudioSource,
        events: RecognizerEventSender,
    ) -> Result<Box<dyn RecognizerHandle>, SpeechError> {
        let connection_id = Uuid::new_v4().simple().to_string();
        let request = self.build_request(format, &connection_id)?;

        let connect_timeout = self.config.start_timeout();
        let (socket, _response) = match timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(classify_connect_error(e)),
            Err(_) => {
                return Err(SpeechError::Timeout(format!(
                    "connecting to the recognition service took longer than {} ms",
                    connect_timeout.as_millis()
                )))
            }
        };
        info!(connection_id = %connection_id, "connected to speech recognition service");

        let _ = events.send(RecognizerEvent::SessionStarted {
            session_id: connection_id.clone(),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(run_connection(
            socket,
            audio,
            events,
            stop_rx,
            connection_id,
            self.config.stop_timeout(),
        ));

        Ok(Box::new(AzureRecognizerHandle {
            stop_tx: Some(stop_tx),
        }))
    }
}

fn classify_connect_error(e: tokio_tungstenite::tungstenite::Error) -> SpeechError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                SpeechError::Configuration(format!(
                    "recognition service rejected credentials ({}); check the subscription key and region",
                    status
                ))
            } else {
                SpeechError::Transport(format!("recognition handshake failed: {}", status))
            }
        }
        other => SpeechError::Transport(format!("failed to connect to recognition service: {}", other)),
    }
}

struct AzureRecognizerHandle {
    stop_tx: Option<oneshot::Sender<StopReply>>,
}

#[async_trait]
impl RecognizerHandle for AzureRecognizerHandle {
    async fn stop(&mut self) -> Result<(), SpeechError> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if stop_tx.send(reply_tx).is_err() {
            // Connection task already ended.
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }
}

enum Flow {
    Continue,
    TurnEnd,
    Canceled(String),
}

fn handle_text(text: &str, events: &RecognizerEventSender, session_id: &str) -> Flow {
    let message = match ServiceMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(session_id, error = %e, "ignoring unparseable service message");
            return Flow::Continue;
        }
    };

    if let ServiceMessage::Phrase(phrase) = &message {
        if phrase.is_error() {
            return Flow::Canceled(format!(
                "recognition failed with status {}",
                phrase.recognition_status
            ));
        }
    }
    if message == ServiceMessage::TurnEnd {
        return Flow::TurnEnd;
    }
    if let Some(transcript) = message.transcript() {
        let _ = events.send(RecognizerEvent::Transcribed(transcript));
    }
    Flow::Continue
}

fn cancel(events: &RecognizerEventSender, session_id: &str, details: String) {
    error!(session_id, details = %details, "recognition connection failed");
    let _ = events.send(RecognizerEvent::Canceled {
        error_details: details,
    });
}

async fn run_connection(
    socket: Socket,
    mut audio: PushAudioSource,
    events: RecognizerEventSender,
    mut stop_rx: oneshot::Receiver<StopReply>,
    session_id: String,
    turn_end_timeout: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = interval(Duration::from_secs(1));
    let mut last_audio = Instant::now();
    let mut audio_open = true;

    loop {
        tokio::select! {
            biased;

            request = &mut stop_rx => {
                let reply = request.ok();
                let result = match reply {
                    Some(_) => finish_turn(&mut sink, &mut stream, &mut audio, &events, &session_id, turn_end_timeout).await,
                    None => Ok(()),
                };
                let _ = sink.send(Message::Close(None)).await;
                let _ = events.send(RecognizerEvent::SessionStopped { session_id: session_id.clone() });
                info!(session_id = %session_id, "recognition connection closed");
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                return;
            }

            chunk = audio.next(), if audio_open => match chunk {
                Some(bytes) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        cancel(&events, &session_id, format!("failed to send audio: {}", e));
                        return;
                    }
                    last_audio = Instant::now();
                }
                None => audio_open = false,
            },

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match handle_text(text.as_str(), &events, &session_id) {
                    Flow::Continue => {}
                    Flow::TurnEnd => {
                        info!(session_id = %session_id, "service ended the recognition turn");
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = events.send(RecognizerEvent::SessionStopped { session_id: session_id.clone() });
                        return;
                    }
                    Flow::Canceled(details) => {
                        cancel(&events, &session_id, details);
                        return;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "no reason given".to_string());
                    cancel(&events, &session_id, format!("service closed the connection: {}", reason));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    cancel(&events, &session_id, format!("websocket error: {}", e));
                    return;
                }
                None => {
                    cancel(&events, &session_id, "websocket stream ended".to_string());
                    return;
                }
            },

            _ = keepalive.tick() => {
                if audio_open && last_audio.elapsed() >= KEEPALIVE_AFTER {
                    let silence = Bytes::from(vec![0u8; KEEPALIVE_FRAME_BYTES]);
                    if let Err(e) = sink.send(Message::Binary(silence)).await {
                        cancel(&events, &session_id, format!("failed to send keep-alive: {}", e));
                        return;
                    }
                    debug!(session_id = %session_id, "sent keep-alive silence");
                    last_audio = Instant::now();
                }
            }
        }
    }
}

/// Flushes buffered audio, signals end of audio and waits for `turn.end`.
async fn finish_turn(
    sink: &mut futures_util::stream::SplitSink<Socket, Message>,
    stream: &mut futures_util::stream::SplitStream<Socket>,
    audio: &mut PushAudioSource,
    events: &RecognizerEventSender,
    session_id: &str,
    turn_end_timeout: Duration,
) -> Result<(), SpeechError> {
    while let Some(bytes) = audio.try_next() {
        sink.send(Message::Binary(bytes))
            .await
            .map_err(|e| SpeechError::Transport(format!("failed to flush audio: {}", e)))?;
    }
    sink.send(Message::Binary(Bytes::new()))
        .await
        .map_err(|e| SpeechError::Transport(format!("failed to send end of audio: {}", e)))?;

    let wait = async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match handle_text(text.as_str(), events, session_id) {
                    Flow::Continue => {}
                    Flow::TurnEnd => return Ok(()),
                    Flow::Canceled(details) => return Err(SpeechError::BackendCancellation(details)),
                },
                Ok(Message::Close(_)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(SpeechError::Transport(format!("websocket error: {}", e))),
            }
        }
        Ok(())
    };

    match timeout(turn_end_timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            warn!(session_id, "service did not end the turn in time");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_service_headers() {
        let config = Arc::new(SpeechConfig::new("eastus", "secret-key"));
        let recognizer = AzureRecognizer::new(config);
        let request = recognizer
            .build_request(&AudioFormat::PCM_16K_MONO, "conn-1")
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers["Ocp-Apim-Subscription-Key"], "secret-key");
        assert_eq!(headers["X-ConnectionId"], "conn-1");
        assert_eq!(
            headers["Content-Type"],
            "audio/wav; codecs=audio/pcm; samplerate=16000"
        );
        assert!(request
            .uri()
            .to_string()
            .starts_with("wss://eastus.stt.speech.microsoft.com/"));
    }
}
