//! Call orchestration for VoxCall.
//!
//! Turns telephony notifications into answered calls with a live
//! recognition session each, and feeds every final transcript through the
//! reply pipeline: assistant reply, speech synthesis, media playback.
//! External services sit behind the [`CallingClient`], [`ReplyProducer`] and
//! [`MediaChannel`] traits; Microsoft Graph and Azure AI Foundry
//! implementations are provided.

pub mod assistant;
pub mod controller;
pub mod error;
pub mod graph;
pub mod media;
pub mod poll;

pub use assistant::{FoundryAssistant, FoundrySettings, ReplyProducer, NO_ASSISTANT_RESPONSE};
pub use controller::{
    CallLifecycleController, CallSummary, Collaborators, ControllerSettings, IgnoreReason,
    NotificationOutcome, DEFAULT_FALLBACK_NOTICE,
};
pub use error::CallError;
pub use graph::{CallingClient, GraphCallingClient, GraphSettings};
pub use media::MediaChannel;
pub use poll::{poll_until, PollError, PollPolicy, PollStatus};
