//! In-memory speech backends for tests and offline development.
//!
//! [`ScriptedRecognizer`] records the audio it is fed and emits events on
//! demand. [`ScriptedSynthesizer`] returns canned audio or a failure. Both
//! count how they were used so callers can assert on resource handling.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::push_stream::PushAudioSource;
use crate::recognizer::{RecognizerBackend, RecognizerEvent, RecognizerEventSender, RecognizerHandle};
use crate::synthesis::{SynthesisBackend, SynthesisResult, Synthesizer};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use voxcall_types::{AudioFormat, TranscriptEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone)]
enum StartBehavior {
    Confirm,
    Delay(Duration),
    Refuse(String),
    Cancel(String),
    Silent,
}

#[derive(Debug, Clone)]
enum StopBehavior {
    Confirm,
    Delay(Duration),
    Fail(String),
    Hang,
}

struct Slot {
    session_id: String,
    events: Option<RecognizerEventSender>,
}

struct RecognizerState {
    start: Mutex<StartBehavior>,
    stop: Mutex<StopBehavior>,
    finals_on_stop: Mutex<Vec<String>>,
    slots: Mutex<Vec<Slot>>,
    formats: Mutex<Vec<AudioFormat>>,
    audio: Mutex<Vec<u8>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    chunks: AtomicUsize,
    streams_ended: AtomicUsize,
    opens: AtomicUsize,
    stops: AtomicUsize,
}

/// Recognizer backend driven by the test.
///
/// Every `open` is a new session slot, numbered from zero in open order.
/// The `emit_*` helpers target the most recently opened session.
#[derive(Clone)]
pub struct ScriptedRecognizer {
    state: Arc<RecognizerState>,
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RecognizerState {
                start: Mutex::new(StartBehavior::Confirm),
                stop: Mutex::new(StopBehavior::Confirm),
                finals_on_stop: Mutex::new(Vec::new()),
                slots: Mutex::new(Vec::new()),
                formats: Mutex::new(Vec::new()),
                audio: Mutex::new(Vec::new()),
                readers: Mutex::new(Vec::new()),
                chunks: AtomicUsize::new(0),
                streams_ended: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }),
        }
    }

    /// `open` fails outright.
    pub fn refuse_start(self, reason: impl Into<String>) -> Self {
        *lock(&self.state.start) = StartBehavior::Refuse(reason.into());
        self
    }

    /// The session is cancelled instead of confirmed.
    pub fn cancel_on_start(self, details: impl Into<String>) -> Self {
        *lock(&self.state.start) = StartBehavior::Cancel(details.into());
        self
    }

    /// The session is never confirmed.
    pub fn never_confirm_start(self) -> Self {
        *lock(&self.state.start) = StartBehavior::Silent;
        self
    }

    pub fn delay_start(self, delay: Duration) -> Self {
        *lock(&self.state.start) = StartBehavior::Delay(delay);
        self
    }

    /// `stop` never resolves.
    pub fn hang_on_stop(self) -> Self {
        *lock(&self.state.stop) = StopBehavior::Hang;
        self
    }

    pub fn delay_stop(self, delay: Duration) -> Self {
        *lock(&self.state.stop) = StopBehavior::Delay(delay);
        self
    }

    pub fn fail_stop(self, reason: impl Into<String>) -> Self {
        *lock(&self.state.stop) = StopBehavior::Fail(reason.into());
        self
    }

    /// Final transcripts flushed when a session is stopped.
    pub fn finals_on_stop<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.state.finals_on_stop) = texts.into_iter().map(Into::into).collect();
        self
    }

    /// Sends `event` to the latest session. Returns `false` if it has ended.
    pub fn emit(&self, event: RecognizerEvent) -> bool {
        let slots = lock(&self.state.slots);
        match slots.last().and_then(|slot| slot.events.as_ref()) {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Sends `event` to the session opened `index`-th.
    pub fn emit_to(&self, index: usize, event: RecognizerEvent) -> bool {
        let slots = lock(&self.state.slots);
        match slots.get(index).and_then(|slot| slot.events.as_ref()) {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn emit_final(&self, text: &str) -> bool {
        self.emit(RecognizerEvent::Transcribed(TranscriptEvent::final_text(text)))
    }

    pub fn emit_partial(&self, text: &str) -> bool {
        self.emit(RecognizerEvent::Transcribed(TranscriptEvent::partial_text(text)))
    }

    pub fn cancel(&self, details: &str) -> bool {
        self.emit(RecognizerEvent::Canceled {
            error_details: details.to_string(),
        })
    }

    /// Drops the latest session's event sender without any stop event.
    pub fn disconnect(&self) {
        if let Some(slot) = lock(&self.state.slots).last_mut() {
            slot.events = None;
        }
    }

    /// Waits until every audio reader has seen the end of its push stream.
    pub async fn drain(&self) {
        let readers: Vec<_> = lock(&self.state.readers).drain(..).collect();
        for reader in readers {
            let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
        }
    }

    pub fn written_audio(&self) -> Vec<u8> {
        lock(&self.state.audio).clone()
    }

    pub fn chunks_received(&self) -> usize {
        self.state.chunks.load(Ordering::SeqCst)
    }

    /// Number of audio readers that saw their push stream end.
    pub fn streams_ended(&self) -> usize {
        self.state.streams_ended.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn formats(&self) -> Vec<AudioFormat> {
        lock(&self.state.formats).clone()
    }
}

#[async_trait]
impl RecognizerBackend for ScriptedRecognizer {
    async fn open(
        &self,
        format: &AudioFormat,
        mut audio: PushAudioSource,
        events: RecognizerEventSender,
    ) -> Result<Box<dyn RecognizerHandle>, SpeechError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.formats).push(*format);

        let start = lock(&self.state.start).clone();
        if let StartBehavior::Refuse(reason) = start {
            return Err(SpeechError::Transport(reason));
        }

        let state = Arc::clone(&self.state);
        let reader = tokio::spawn(async move {
            while let Some(chunk) = audio.next().await {
                state.chunks.fetch_add(1, Ordering::SeqCst);
                lock(&state.audio).extend_from_slice(&chunk);
            }
            state.streams_ended.fetch_add(1, Ordering::SeqCst);
        });
        lock(&self.state.readers).push(reader);

        let index = {
            let mut slots = lock(&self.state.slots);
            let index = slots.len();
            slots.push(Slot {
                session_id: format!("scripted-{}", index),
                events: Some(events.clone()),
            });
            index
        };
        let session_id = format!("scripted-{}", index);

        match start {
            StartBehavior::Confirm => {
                let _ = events.send(RecognizerEvent::SessionStarted { session_id });
            }
            StartBehavior::Delay(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(RecognizerEvent::SessionStarted { session_id });
                });
            }
            StartBehavior::Cancel(error_details) => {
                let _ = events.send(RecognizerEvent::Canceled { error_details });
            }
            StartBehavior::Silent | StartBehavior::Refuse(_) => {}
        }

        Ok(Box::new(ScriptedHandle {
            state: Arc::clone(&self.state),
            index,
        }))
    }
}

struct ScriptedHandle {
    state: Arc<RecognizerState>,
    index: usize,
}

impl ScriptedHandle {
    fn take_events(&self) -> Option<(String, RecognizerEventSender)> {
        let mut slots = lock(&self.state.slots);
        let slot = slots.get_mut(self.index)?;
        let events = slot.events.take()?;
        Some((slot.session_id.clone(), events))
    }
}

#[async_trait]
impl RecognizerHandle for ScriptedHandle {
    async fn stop(&mut self) -> Result<(), SpeechError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.state.stop).clone();
        match behavior {
            StopBehavior::Confirm => {}
            StopBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            StopBehavior::Fail(reason) => {
                self.take_events();
                return Err(SpeechError::Transport(reason));
            }
            StopBehavior::Hang => std::future::pending::<()>().await,
        }

        let finals = lock(&self.state.finals_on_stop).clone();
        if let Some((session_id, events)) = self.take_events() {
            for text in finals {
                let _ = events.send(RecognizerEvent::Transcribed(TranscriptEvent::final_text(text)));
            }
            let _ = events.send(RecognizerEvent::SessionStopped { session_id });
        }
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.take_events();
    }
}

#[derive(Debug, Clone)]
enum SynthesisOutcome {
    Audio(Bytes),
    Cancel(String),
    Error(String),
    RefuseCreate(String),
}

struct SynthesizerState {
    outcome: Mutex<SynthesisOutcome>,
    spoken: Mutex<Vec<String>>,
    created: AtomicUsize,
    closed: AtomicUsize,
}

/// Synthesis backend returning a fixed outcome.
#[derive(Clone)]
pub struct ScriptedSynthesizer {
    state: Arc<SynthesizerState>,
}

impl ScriptedSynthesizer {
    fn with_outcome(outcome: SynthesisOutcome) -> Self {
        Self {
            state: Arc::new(SynthesizerState {
                outcome: Mutex::new(outcome),
                spoken: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    /// Completes every request with `audio`.
    pub fn returning(audio: impl Into<Bytes>) -> Self {
        Self::with_outcome(SynthesisOutcome::Audio(audio.into()))
    }

    /// Cancels every request with `details`.
    pub fn canceling(details: impl Into<String>) -> Self {
        Self::with_outcome(SynthesisOutcome::Cancel(details.into()))
    }

    /// Fails every request with a transport error.
    pub fn erroring(reason: impl Into<String>) -> Self {
        Self::with_outcome(SynthesisOutcome::Error(reason.into()))
    }

    /// Fails to create a synthesizer at all.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::with_outcome(SynthesisOutcome::RefuseCreate(reason.into()))
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn spoken(&self) -> usize {
        lock(&self.state.spoken).len()
    }

    pub fn last_ssml(&self) -> Option<String> {
        lock(&self.state.spoken).last().cloned()
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedSynthesizer {
    async fn create(&self, _config: &SpeechConfig) -> Result<Box<dyn Synthesizer>, SpeechError> {
        if let SynthesisOutcome::RefuseCreate(reason) = &*lock(&self.state.outcome) {
            return Err(SpeechError::Configuration(reason.clone()));
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSynthesisHandle {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedSynthesisHandle {
    state: Arc<SynthesizerState>,
}

#[async_trait]
impl Synthesizer for ScriptedSynthesisHandle {
    async fn speak_ssml(&mut self, ssml: &str) -> Result<SynthesisResult, SpeechError> {
        lock(&self.state.spoken).push(ssml.to_string());
        let outcome = lock(&self.state.outcome).clone();
        match outcome {
            SynthesisOutcome::Audio(audio) => Ok(SynthesisResult::completed(audio)),
            SynthesisOutcome::Cancel(details) => Ok(SynthesisResult::canceled(details)),
            SynthesisOutcome::Error(reason) | SynthesisOutcome::RefuseCreate(reason) => {
                Err(SpeechError::Transport(reason))
            }
        }
    }

    async fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}
