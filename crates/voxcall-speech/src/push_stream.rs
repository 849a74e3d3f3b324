//! Push-style audio source feeding a recognizer.
//!
//! The writer half is owned by a single recognition session; the reader half
//! is handed to the recognizer backend. The channel between them is bounded,
//! so a slow backend applies backpressure to writers instead of growing
//! memory without limit.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError};

/// Why a write did not reach the recognizer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteRejected {
    #[error("push stream is closed")]
    Closed,
    #[error("push stream buffer stayed full for {0:?}")]
    Timeout(Duration),
}

/// Creates a connected writer/reader pair holding at most `capacity` chunks.
pub fn push_stream(capacity: usize) -> (PushAudioStream, PushAudioSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PushAudioStream {
            sender: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        },
        PushAudioSource { receiver: rx },
    )
}

/// Writer half of a push stream.
#[derive(Debug)]
pub struct PushAudioStream {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl PushAudioStream {
    /// Writes one chunk, waiting at most `timeout` for buffer space.
    pub async fn write(&self, bytes: Bytes, timeout: Duration) -> Result<(), WriteRejected> {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let sender = sender.ok_or(WriteRejected::Closed)?;

        match sender.send_timeout(bytes, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(WriteRejected::Timeout(timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(WriteRejected::Closed),
        }
    }

    /// Signals end-of-stream to the reader.
    ///
    /// Returns `true` only for the call that released the writer; every later
    /// or concurrent call returns `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Reader half of a push stream, consumed by a recognizer backend.
#[derive(Debug)]
pub struct PushAudioSource {
    receiver: mpsc::Receiver<Bytes>,
}

impl PushAudioSource {
    /// Waits for the next chunk. Returns `None` once the writer has closed
    /// and all buffered chunks were read.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Returns an already-buffered chunk without waiting.
    pub fn try_next(&mut self) -> Option<Bytes> {
        match self.receiver.try_recv() {
            Ok(bytes) => Some(bytes),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
