//! Seams between the session and the outside world.
//!
//! The session only talks to these traits. The application implements them
//! with cpal streams and a WebSocket; tests implement them with fakes.

use crate::codec::EncodedChunk;
use crate::error::{ChannelError, DeviceError};
use crate::event::{EventSender, SegmentId};
use crate::protocol::SetupMessage;
use crate::state::StateWatch;
use std::sync::Arc;

/// A live microphone feeding `SessionEvent::CaptureBlock` events.
pub trait InputDevice {
    /// Begins delivering capture blocks. Called once the channel is open.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stops capture and gives the device back to the system.
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// A playback clock that can schedule buffers at explicit times.
///
/// Each scheduled buffer produces exactly one `SessionEvent::SegmentFinished`
/// when it plays to the end. Stopped buffers produce none.
pub trait OutputDevice {
    /// Device clock in seconds.
    fn now(&self) -> f64;

    fn schedule(
        &mut self,
        id: SegmentId,
        start_time: f64,
        samples: Arc<[f32]>,
    ) -> Result<(), DeviceError>;

    /// Stopping a segment that already finished is not an error.
    fn stop(&mut self, id: SegmentId) -> Result<(), DeviceError>;

    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Outbound half of the connection to the remote service.
///
/// Inbound traffic arrives on the event queue handed to `Backend::connect`.
pub trait SessionChannel {
    fn send(&mut self, chunk: EncodedChunk) -> Result<(), ChannelError>;

    fn close(&mut self) -> Result<(), ChannelError>;
}

/// Acquires everything a session needs.
pub trait Backend {
    fn acquire_output(&mut self, events: EventSender) -> Result<Box<dyn OutputDevice>, DeviceError>;

    /// `state` lets the capture side drop audio until the session is connected.
    fn acquire_input(
        &mut self,
        events: EventSender,
        state: StateWatch,
    ) -> Result<Box<dyn InputDevice>, DeviceError>;

    /// Must return without waiting for the handshake. The channel reports
    /// `ChannelOpened`, `ChannelError` or `ChannelClosed` on `events`.
    fn connect(
        &mut self,
        setup: &SetupMessage,
        events: EventSender,
    ) -> Result<Box<dyn SessionChannel>, ChannelError>;
}
