//! Events consumed by the session's single dispatch point.
//!
//! Device callbacks, the output render loop and the channel worker never
//! touch session state directly. They push a `SessionEvent` onto the queue
//! and the session thread applies it.

use crossbeam_channel::{Receiver, Sender};
use std::fmt;

/// Handle of one scheduled playback segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment#{}", self.0)
    }
}

/// One fixed-size block of 16kHz mono microphone samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}

/// Messages from the remote service that do not change the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Base64 PCM16, 24kHz mono.
    Audio(String),
    /// Barge-in: the user started talking over synthesized audio.
    Interrupted,
    TurnComplete,
    Text(String),
    GoAway { time_left: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ChannelOpened,
    ChannelMessage(InboundMessage),
    ChannelClosed { reason: Option<String> },
    ChannelError(String),
    DeviceFailed(String),
    CaptureBlock(AudioFrame),
    SegmentFinished(SegmentId),
    Tick,
    CloseRequested,
}

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

/// Creates the session's single-consumer event queue.
pub fn event_queue() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
