//! Streaming recognition session bound to one push audio source.
//!
//! ```text
//!  Idle ──start()──▶ Starting ──SessionStarted──▶ Active ──stop()/Canceled──▶ Stopping ──▶ Closed
//!                        │                                                                 ▲
//!                        └──────────── start failure / timeout ────────────────────────────┘
//! ```
//!
//! All state transitions happen under a short-lived std mutex that is never
//! held across an `.await`. Backend events are consumed by one task in
//! arrival order. Every path, including backend cancellation and a backend
//! that never confirms a stop, ends in `Closed` within the configured stop
//! timeout.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::push_stream::{push_stream, PushAudioStream};
use crate::recognizer::{RecognizerBackend, RecognizerEvent, RecognizerHandle};
use crate::sink::{normalize, AudioChunk};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use voxcall_types::{AudioFormat, TranscriptEvent};

/// Lifecycle state of a [`RecognitionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Closed,
}

/// What happened to a chunk passed to [`RecognitionSession::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The chunk was written to the push stream.
    Written,
    /// The chunk was unusable or could not be written in time, and was
    /// discarded. The session keeps running.
    Dropped,
    /// The session is not active; nothing was written.
    Inactive,
}

impl FeedOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Dropped => "dropped",
            Self::Inactive => "inactive",
        }
    }
}

/// Receives the final transcripts of a session. Ends once the session closes.
pub type TranscriptReceiver = mpsc::UnboundedReceiver<TranscriptEvent>;

struct Lifecycle {
    state: SessionState,
    push: Option<Arc<PushAudioStream>>,
    handle: Option<Box<dyn RecognizerHandle>>,
}

type Released = (Option<Arc<PushAudioStream>>, Option<Box<dyn RecognizerHandle>>);

struct Shared {
    name: String,
    config: Arc<SpeechConfig>,
    backend: Arc<dyn RecognizerBackend>,
    lifecycle: Mutex<Lifecycle>,
    /// Set when a stop or close is requested while a start or stop is
    /// already in flight.
    pending_close: AtomicBool,
    state_tx: watch::Sender<SessionState>,
}

/// One streaming speech-to-text session.
///
/// The session exclusively owns its push stream and backend handle. `feed`,
/// `stop` and `close` may be called concurrently from independent tasks.
pub struct RecognitionSession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl RecognitionSession {
    pub fn new(config: Arc<SpeechConfig>, backend: Arc<dyn RecognizerBackend>) -> Self {
        Self::with_name("recognition", config, backend)
    }

    /// Creates a session whose log lines carry `name` (usually the call id).
    pub fn with_name(
        name: impl Into<String>,
        config: Arc<SpeechConfig>,
        backend: Arc<dyn RecognizerBackend>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                backend,
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::Idle,
                    push: None,
                    handle: None,
                }),
                pending_close: AtomicBool::new(false),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Returns `true` if a close was requested while a start or stop was in
    /// flight and has not been carried out yet.
    pub fn is_close_pending(&self) -> bool {
        self.shared.pending_close.load(Ordering::Acquire)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Waits until the session reaches `Closed`. Returns `false` on timeout.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        let closed = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == SessionState::Closed)).await,
            Ok(Ok(_))
        );
        closed
    }

    /// Opens the push stream and recognizer, and waits for the backend to
    /// confirm the session.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::StartFailure` if the session was already started,
    /// the backend refused to open, cancelled before confirming, or did not
    /// confirm within the start timeout. A failed session is `Closed` and is
    /// never retried.
    pub async fn start(&self, format: AudioFormat) -> Result<TranscriptReceiver, SpeechError> {
        let shared = &self.shared;
        let (push, source) = push_stream(shared.config.push_buffer_chunks);
        let push = Arc::new(push);
        {
            let mut lifecycle = shared.lock();
            if lifecycle.state != SessionState::Idle {
                return Err(SpeechError::StartFailure(format!(
                    "session is already {:?}",
                    lifecycle.state
                )));
            }
            lifecycle.state = SessionState::Starting;
            lifecycle.push = Some(Arc::clone(&push));
        }
        shared.publish(SessionState::Starting);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handle = match shared.backend.open(&format, source, event_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(session = %shared.name, error = %e, "recognizer failed to open");
                shared.release();
                return Err(SpeechError::StartFailure(e.to_string()));
            }
        };

        let timeout = shared.config.start_timeout();
        let session_id = match tokio::time::timeout(timeout, wait_for_start(&mut event_rx)).await
        {
            Ok(Ok(session_id)) => session_id,
            Ok(Err(details)) => {
                error!(session = %shared.name, details = %details, "recognition failed to start");
                drop(handle);
                shared.release();
                return Err(SpeechError::StartFailure(details));
            }
            Err(_) => {
                error!(
                    session = %shared.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "recognizer did not confirm start"
                );
                drop(handle);
                shared.release();
                return Err(SpeechError::StartFailure(format!(
                    "backend did not confirm start within {} ms",
                    timeout.as_millis()
                )));
            }
        };

        {
            let mut lifecycle = shared.lock();
            if lifecycle.state != SessionState::Starting {
                return Err(SpeechError::StartFailure(format!(
                    "session became {:?} while starting",
                    lifecycle.state
                )));
            }
            lifecycle.handle = Some(handle);
            lifecycle.state = SessionState::Active;
        }
        shared.publish(SessionState::Active);
        info!(session = %shared.name, session_id = %session_id, "recognition session active");

        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_events(Arc::clone(shared), event_rx, transcript_tx));

        if shared.pending_close.swap(false, Ordering::AcqRel) {
            info!(session = %shared.name, "close was requested during start, stopping");
            if let Err(e) = shared.stop().await {
                warn!(session = %shared.name, error = %e, "deferred stop failed");
            }
        }

        Ok(transcript_rx)
    }

    /// Normalizes `chunk` and writes it to the push stream.
    ///
    /// Never fails: unusable chunks and writes that hit the write timeout are
    /// logged and dropped, and feeding an inactive session does nothing.
    pub async fn feed(&self, chunk: AudioChunk) -> FeedOutcome {
        let shared = &self.shared;
        let push = {
            let lifecycle = shared.lock();
            if lifecycle.state != SessionState::Active {
                return FeedOutcome::Inactive;
            }
            lifecycle.push.clone()
        };
        let Some(push) = push else {
            return FeedOutcome::Inactive;
        };

        let kind = chunk.kind();
        let bytes = match normalize(chunk) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session = %shared.name, chunk_kind = kind, error = %e, "dropping audio chunk");
                return FeedOutcome::Dropped;
            }
        };
        if bytes.is_empty() {
            debug!(session = %shared.name, "ignoring empty audio chunk");
            return FeedOutcome::Dropped;
        }

        let len = bytes.len();
        match push.write(bytes, shared.config.write_timeout()).await {
            Ok(()) => FeedOutcome::Written,
            Err(e) => {
                warn!(session = %shared.name, bytes = len, error = %e, "dropping audio chunk");
                FeedOutcome::Dropped
            }
        }
    }

    /// Asks the backend to stop and closes the push stream once it confirms.
    ///
    /// Calling `stop` while a stop is already in flight, or after the session
    /// closed, succeeds immediately. If the backend does not confirm within
    /// the stop timeout, local resources are closed anyway.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::StopFailure` if the backend reported an error
    /// while stopping. The session is `Closed` regardless.
    pub async fn stop(&self) -> Result<(), SpeechError> {
        self.shared.stop().await
    }

    /// Releases the push stream and backend handle without waiting for the
    /// backend.
    ///
    /// Idempotent. Returns `true` only for the call that released the
    /// resources. While a start or stop is in flight the close is recorded as
    /// pending and carried out by that path instead, and `false` is returned.
    pub fn close(&self) -> bool {
        let shared = &self.shared;
        let released = {
            let mut lifecycle = shared.lock();
            match lifecycle.state {
                SessionState::Starting | SessionState::Stopping => {
                    shared.pending_close.store(true, Ordering::Release);
                    None
                }
                _ => take_for_release(&mut lifecycle),
            }
        };
        match released {
            Some(parts) => {
                shared.finish_release(parts);
                true
            }
            None => false,
        }
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if self.shared.release() {
            debug!(session = %self.shared.name, "session dropped before close");
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        let handle = {
            let mut lifecycle = self.lock();
            match lifecycle.state {
                SessionState::Closed => return Ok(()),
                SessionState::Starting | SessionState::Stopping => {
                    self.pending_close.store(true, Ordering::Release);
                    return Ok(());
                }
                SessionState::Idle => {
                    let released = take_for_release(&mut lifecycle);
                    drop(lifecycle);
                    if let Some(parts) = released {
                        self.finish_release(parts);
                    }
                    return Ok(());
                }
                SessionState::Active => {
                    lifecycle.state = SessionState::Stopping;
                    lifecycle.handle.take()
                }
            }
        };
        self.publish(SessionState::Stopping);
        debug!(session = %self.name, "stopping recognition");

        let timeout = self.config.stop_timeout();
        let result = match handle {
            Some(mut handle) => match tokio::time::timeout(timeout, handle.stop()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(session = %self.name, error = %e, "recognizer failed to stop");
                    Err(SpeechError::StopFailure(e.to_string()))
                }
                Err(_) => {
                    warn!(
                        session = %self.name,
                        timeout_ms = timeout.as_millis() as u64,
                        "recognizer did not confirm stop, closing local resources"
                    );
                    Ok(())
                }
            },
            None => Ok(()),
        };

        self.release();
        result
    }

    /// Moves the session to `Closed`, closing the push stream and dropping the
    /// backend handle. Returns `true` if this call performed the release.
    fn release(&self) -> bool {
        let released = take_for_release(&mut self.lock());
        match released {
            Some(parts) => {
                self.finish_release(parts);
                true
            }
            None => false,
        }
    }

    fn finish_release(&self, (push, handle): Released) {
        self.publish(SessionState::Closed);
        let stream_closed = push.map(|p| p.close()).unwrap_or(false);
        drop(handle);
        let was_pending = self.pending_close.swap(false, Ordering::AcqRel);
        info!(
            session = %self.name,
            stream_closed,
            pending_close = was_pending,
            "recognition session closed"
        );
    }
}

fn take_for_release(lifecycle: &mut Lifecycle) -> Option<Released> {
    if lifecycle.state == SessionState::Closed {
        return None;
    }
    lifecycle.state = SessionState::Closed;
    Some((lifecycle.push.take(), lifecycle.handle.take()))
}

async fn wait_for_start(
    events: &mut mpsc::UnboundedReceiver<RecognizerEvent>,
) -> Result<String, String> {
    while let Some(event) = events.recv().await {
        match event {
            RecognizerEvent::SessionStarted { session_id } => return Ok(session_id),
            RecognizerEvent::Canceled { error_details } => return Err(error_details),
            RecognizerEvent::SessionStopped { .. } => {
                return Err("session stopped before it started".to_string())
            }
            RecognizerEvent::Transcribed(_) => {
                debug!("ignoring transcript received before session start");
            }
        }
    }
    Err("recognizer closed its event stream before confirming start".to_string())
}

async fn run_events(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<RecognizerEvent>,
    transcripts: mpsc::UnboundedSender<TranscriptEvent>,
) {
    let mut state_rx = shared.state_tx.subscribe();

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RecognizerEvent::Transcribed(transcript) => {
                        if transcript.text.trim().is_empty() {
                            continue;
                        }
                        if transcript.is_final {
                            info!(
                                session = %shared.name,
                                text = %transcript.text,
                                speaker_id = transcript.speaker_id.as_deref().unwrap_or(""),
                                "final transcript"
                            );
                            if transcripts.send(transcript).is_err() {
                                debug!(session = %shared.name, "transcript receiver dropped");
                            }
                        } else {
                            debug!(session = %shared.name, text = %transcript.text, "partial transcript");
                        }
                    }
                    RecognizerEvent::Canceled { error_details } => {
                        error!(
                            session = %shared.name,
                            error_details = %error_details,
                            "recognition canceled by backend"
                        );
                        if let Err(e) = shared.stop().await {
                            warn!(session = %shared.name, error = %e, "stop after cancellation failed");
                        }
                    }
                    RecognizerEvent::SessionStopped { session_id } => {
                        info!(session = %shared.name, session_id = %session_id, "recognizer session stopped");
                        if let Err(e) = shared.stop().await {
                            warn!(session = %shared.name, error = %e, "stop after session end failed");
                        }
                    }
                    RecognizerEvent::SessionStarted { session_id } => {
                        debug!(session = %shared.name, session_id = %session_id, "duplicate session start ignored");
                    }
                }
            }

            _ = async {
                let _ = state_rx.wait_for(|s| *s == SessionState::Closed).await;
            } => break,
        }
    }

    if shared.release() {
        warn!(session = %shared.name, "recognizer event stream ended, session force-closed");
    }
}
