//! Error types for the voice session engine.
//!
//! Device and channel failures never cross component boundaries as errors;
//! the session turns them into a transition to `SessionState::Error`. These
//! types exist for the trait seams and for logging.

use crate::state::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No {0} device available")]
    Unavailable(&'static str),

    #[error("Audio device not found: {0}")]
    NotFound(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}

impl DeviceError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::Stream(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Channel already closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("PCM16 payload has odd byte length {0}")]
    OddLength(usize),

    #[error("Empty audio payload")]
    Empty,
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}
