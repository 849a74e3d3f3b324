//! Per-call lifecycle: answer, recognize, reply, tear down.
//!
//! Every call is its own state machine. Notifications for one call are
//! handled strictly in arrival order behind a FIFO sequencer, while audio
//! feeding bypasses the sequencer so it never waits on an answer or stop in
//! flight. A failure in one call is logged and confined to that call.

use crate::assistant::ReplyProducer;
use crate::error::CallError;
use crate::graph::CallingClient;
use crate::media::MediaChannel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};
use voxcall_speech::{
    AudioChunk, FeedOutcome, RecognitionSession, RecognizerBackend, SessionState, SpeechConfig,
    SynthesisService, TranscriptReceiver,
};
use voxcall_types::{AudioFormat, CallNotification, CallNotificationBatch, CallState};

pub const DEFAULT_FALLBACK_NOTICE: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Where the telephony platform should deliver notifications for
    /// answered calls.
    pub callback_uri: String,
    /// Spoken when no reply could be produced.
    pub fallback_notice: String,
    /// PCM layout of audio bridged in from calls.
    pub audio_format: AudioFormat,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            callback_uri: String::new(),
            fallback_notice: DEFAULT_FALLBACK_NOTICE.to_string(),
            audio_format: AudioFormat::PCM_16K_MONO,
        }
    }
}

/// External services a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub calling: Arc<dyn CallingClient>,
    pub replies: Arc<dyn ReplyProducer>,
    pub synthesis: Arc<SynthesisService>,
    pub recognizer: Arc<dyn RecognizerBackend>,
    pub media: Arc<dyn MediaChannel>,
    pub speech: Arc<SpeechConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    MissingResource,
    NotCreated,
    NotIncoming,
    Duplicate,
}

/// What the controller did with one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Ignored {
        reason: IgnoreReason,
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    Recognizing {
        #[serde(rename = "callId")]
        call_id: String,
    },
    Failed {
        #[serde(rename = "callId")]
        call_id: String,
        error: String,
    },
    Ended {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

impl NotificationOutcome {
    fn ignored(reason: IgnoreReason, call_id: Option<&str>) -> Self {
        Self::Ignored {
            reason,
            call_id: call_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct CallStatus {
    state: CallState,
    finished_at: Option<DateTime<Utc>>,
}

struct CallEntry {
    call_id: String,
    tenant_id: Option<String>,
    created_at: DateTime<Utc>,
    status: Mutex<CallStatus>,
    recognition: Mutex<Option<Arc<RecognitionSession>>>,
    sequencer: tokio::sync::Mutex<()>,
}

impl CallEntry {
    fn new(call_id: String, tenant_id: Option<String>) -> Self {
        Self {
            call_id,
            tenant_id,
            created_at: Utc::now(),
            status: Mutex::new(CallStatus {
                state: CallState::Incoming,
                finished_at: None,
            }),
            recognition: Mutex::new(None),
            sequencer: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> CallState {
        lock(&self.status).state
    }

    fn set_state(&self, state: CallState) {
        let mut status = lock(&self.status);
        status.state = state;
        if state.is_terminal() && status.finished_at.is_none() {
            status.finished_at = Some(Utc::now());
        }
    }

    /// Moves to `Closed` unless the call already reached a terminal state.
    fn close_if_live(&self) -> bool {
        let mut status = lock(&self.status);
        if status.state.is_terminal() {
            return false;
        }
        status.state = CallState::Closed;
        status.finished_at = Some(Utc::now());
        true
    }

    fn take_recognition(&self) -> Option<Arc<RecognitionSession>> {
        lock(&self.recognition).take()
    }

    /// `true` once the call holds no session that is still winding down.
    fn recognition_closed(&self) -> bool {
        lock(&self.recognition)
            .as_ref()
            .map_or(true, |session| session.state() == SessionState::Closed)
    }

    fn summary(&self) -> CallSummary {
        let status = lock(&self.status);
        CallSummary {
            call_id: self.call_id.clone(),
            tenant_id: self.tenant_id.clone(),
            state: status.state,
            created_at: self.created_at,
            finished_at: status.finished_at,
        }
    }
}

struct Inner {
    collaborators: Collaborators,
    settings: ControllerSettings,
    calls: Mutex<HashMap<String, Arc<CallEntry>>>,
}

/// Drives every call from its incoming notification to teardown.
#[derive(Clone)]
pub struct CallLifecycleController {
    inner: Arc<Inner>,
}

impl CallLifecycleController {
    pub fn new(collaborators: Collaborators, settings: ControllerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                settings,
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    /// Processes a notification batch in order. Never fails: errors are
    /// reported per notification in the returned outcomes.
    pub async fn on_notification(&self, batch: &CallNotificationBatch) -> Vec<NotificationOutcome> {
        let mut outcomes = Vec::with_capacity(batch.value.len());
        for notification in &batch.value {
            outcomes.push(self.handle(notification).await);
        }
        outcomes
    }

    async fn handle(&self, notification: &CallNotification) -> NotificationOutcome {
        let Some(resource) = notification.resource_data.as_ref().filter(|r| !r.id.is_empty())
        else {
            info!(
                change_type = %notification.change_type,
                "ignoring notification without call resource"
            );
            return NotificationOutcome::ignored(IgnoreReason::MissingResource, None);
        };
        let call_id = resource.id.as_str();

        if !notification.is_created() {
            if resource.is_terminated() && self.inner.entry(call_id).is_some() {
                info!(call_id, "remote side ended the call");
                if let Err(e) = self.end_call(call_id).await {
                    warn!(call_id, error = %e, "failed to end terminated call");
                }
                return NotificationOutcome::Ended {
                    call_id: call_id.to_string(),
                };
            }
            info!(
                call_id,
                change_type = %notification.change_type,
                state = %resource.state,
                "ignoring notification that is not a call creation"
            );
            return NotificationOutcome::ignored(IgnoreReason::NotCreated, Some(call_id));
        }

        if !resource.is_incoming() {
            info!(call_id, state = %resource.state, "ignoring call that is not incoming");
            return NotificationOutcome::ignored(IgnoreReason::NotIncoming, Some(call_id));
        }

        let entry = {
            let mut calls = lock(&self.inner.calls);
            if let Some(existing) = calls.get(call_id) {
                if !existing.state().is_terminal() {
                    info!(call_id, state = %existing.state(), "ignoring duplicate incoming notification");
                    return NotificationOutcome::ignored(IgnoreReason::Duplicate, Some(call_id));
                }
                if !existing.recognition_closed() {
                    info!(call_id, "previous recognition still closing, ignoring incoming notification");
                    return NotificationOutcome::ignored(IgnoreReason::Duplicate, Some(call_id));
                }
            }
            let entry = Arc::new(CallEntry::new(
                call_id.to_string(),
                resource.tenant_id.clone(),
            ));
            calls.insert(call_id.to_string(), Arc::clone(&entry));
            entry
        };
        info!(
            call_id,
            tenant_id = entry.tenant_id.as_deref().unwrap_or(""),
            "incoming call"
        );

        let _turn = entry.sequencer.lock().await;
        self.inner.establish(&entry).await
    }

    /// Writes one chunk of caller audio into the call's recognition session.
    ///
    /// # Errors
    ///
    /// Returns `CallError::UnknownCall` if no call with `call_id` exists.
    pub async fn feed_audio(&self, call_id: &str, chunk: AudioChunk) -> Result<FeedOutcome, CallError> {
        let entry = self
            .inner
            .entry(call_id)
            .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;
        let session = lock(&entry.recognition).clone();
        match session {
            Some(session) => Ok(session.feed(chunk).await),
            None => Ok(FeedOutcome::Inactive),
        }
    }

    /// Stops recognition and closes the call. Ending a call that is already
    /// closed or failed succeeds without doing anything.
    pub async fn end_call(&self, call_id: &str) -> Result<(), CallError> {
        let entry = self
            .inner
            .entry(call_id)
            .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;
        let _turn = entry.sequencer.lock().await;
        if entry.state().is_terminal() {
            return Ok(());
        }

        entry.set_state(CallState::Closing);
        let session = lock(&entry.recognition).clone();
        if let Some(session) = session {
            if let Err(e) = session.stop().await {
                error!(call_id, error = %e, "recognition did not stop cleanly");
            }
            // A stop already in flight returns at once.
            let timeout = self.inner.collaborators.speech.stop_timeout();
            if !session.wait_closed(timeout).await {
                warn!(call_id, state = ?session.state(), "recognition still closing after stop timeout");
            }
        }
        entry.close_if_live();
        info!(call_id, "call ended");
        Ok(())
    }

    pub fn call_state(&self, call_id: &str) -> Option<CallState> {
        self.inner.entry(call_id).map(|entry| entry.state())
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.entry(call_id).is_some()
    }

    /// Snapshot of every tracked call, oldest first.
    pub fn calls(&self) -> Vec<CallSummary> {
        let mut calls: Vec<_> = lock(&self.inner.calls)
            .values()
            .map(|entry| entry.summary())
            .collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        calls
    }

    /// Forgets calls that finished more than `older_than` ago. Returns how
    /// many were removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut calls = lock(&self.inner.calls);
        let before = calls.len();
        calls.retain(|_, entry| {
            let status = lock(&entry.status);
            !(status.state.is_terminal() && status.finished_at.is_some_and(|at| at <= cutoff))
        });
        before - calls.len()
    }

    /// Ends every call that is still live.
    pub async fn shutdown(&self) {
        let live: Vec<String> = lock(&self.inner.calls)
            .values()
            .filter(|entry| !entry.state().is_terminal())
            .map(|entry| entry.call_id.clone())
            .collect();
        for call_id in live {
            if let Err(e) = self.end_call(&call_id).await {
                warn!(call_id = %call_id, error = %e, "failed to end call during shutdown");
            }
        }
    }
}

impl Inner {
    fn entry(&self, call_id: &str) -> Option<Arc<CallEntry>> {
        lock(&self.calls).get(call_id).cloned()
    }

    fn fail(&self, entry: &CallEntry, error: CallError) -> NotificationOutcome {
        error!(
            call_id = %entry.call_id,
            tenant_id = entry.tenant_id.as_deref().unwrap_or(""),
            error = %error,
            "call failed"
        );
        entry.set_state(CallState::Failed);
        NotificationOutcome::Failed {
            call_id: entry.call_id.clone(),
            error: error.to_string(),
        }
    }

    async fn establish(self: &Arc<Self>, entry: &Arc<CallEntry>) -> NotificationOutcome {
        let call_id = entry.call_id.as_str();
        let calling = &self.collaborators.calling;

        entry.set_state(CallState::Answering);
        let tenant_id = entry.tenant_id.as_deref().unwrap_or("");
        let token = match calling.acquire_token(tenant_id).await {
            Ok(token) => token,
            Err(e) => return self.fail(entry, e),
        };
        if let Err(e) = calling
            .answer_call(call_id, &token, &self.settings.callback_uri)
            .await
        {
            return self.fail(entry, e);
        }
        entry.set_state(CallState::Answered);

        let session = Arc::new(RecognitionSession::with_name(
            call_id,
            Arc::clone(&self.collaborators.speech),
            Arc::clone(&self.collaborators.recognizer),
        ));
        *lock(&entry.recognition) = Some(Arc::clone(&session));

        let transcripts = match session.start(self.settings.audio_format).await {
            Ok(transcripts) => transcripts,
            Err(e) => {
                entry.take_recognition();
                return self.fail(entry, CallError::Recognition(e));
            }
        };

        entry.set_state(CallState::Recognizing);
        info!(call_id, "call answered, recognizing speech");
        tokio::spawn(run_transcripts(Arc::clone(self), Arc::clone(entry), transcripts));

        NotificationOutcome::Recognizing {
            call_id: call_id.to_string(),
        }
    }

    async fn respond(&self, call_id: &str, text: &str) {
        let collaborators = &self.collaborators;
        info!(call_id, text, "caller said");

        let reply = match collaborators.replies.reply(text).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!(call_id, "assistant returned an empty reply, using fallback notice");
                self.settings.fallback_notice.clone()
            }
            Err(e) => {
                error!(call_id, error = %e, "reply generation failed, using fallback notice");
                self.settings.fallback_notice.clone()
            }
        };

        match collaborators.synthesis.synthesize(&reply, None).await {
            Ok(audio) => {
                let bytes = audio.len();
                match collaborators.media.play_audio(call_id, audio).await {
                    Ok(()) => info!(call_id, bytes, "reply played"),
                    Err(e) => error!(call_id, error = %e, "failed to play reply"),
                }
            }
            Err(e) => {
                warn!(call_id, error = %e, "synthesis failed, sending reply as text");
                if let Err(e) = collaborators.media.send_text(call_id, &reply).await {
                    error!(call_id, error = %e, "failed to send text reply");
                }
            }
        }
    }
}

async fn run_transcripts(inner: Arc<Inner>, entry: Arc<CallEntry>, mut transcripts: TranscriptReceiver) {
    while let Some(event) = transcripts.recv().await {
        inner.respond(&entry.call_id, &event.text).await;
    }

    if let Some(session) = entry.take_recognition() {
        session.close();
    }
    if entry.close_if_live() {
        info!(call_id = %entry.call_id, "recognition ended, call closed");
    }
}
