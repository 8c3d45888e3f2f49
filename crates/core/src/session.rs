//! The voice session aggregate.
//!
//! A `Session` owns the devices, the channel and the playback schedule for one
//! call. All of them are fed through `dispatch`, one event at a time, on the
//! thread that owns the session. Nothing escapes it: teardown takes every
//! handle back and releases it, and dropping the session tears down too.

use crate::capture::CapturePipeline;
use crate::config::SessionConfig;
use crate::constants::{OUTPUT_SAMPLE_RATE, TICK_INTERVAL_MS};
use crate::device::{Backend, InputDevice, OutputDevice, SessionChannel};
use crate::error::PlaybackError;
use crate::event::{
    event_queue, AudioFrame, EventReceiver, EventSender, InboundMessage, SessionEvent,
};
use crate::playback::PlaybackScheduler;
use crate::protocol::SetupMessage;
use crate::state::{SessionState, StateMachine, StateWatch};
use crate::volume::VolumeMeter;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, error, info, warn};
use std::time::Duration;

/// Cloneable remote control for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: EventSender,
}

impl SessionHandle {
    /// Asks the session to hang up. A no-op once the session is gone.
    pub fn close(&self) {
        let _ = self.events.send(SessionEvent::CloseRequested);
    }
}

pub struct Session {
    machine: StateMachine,
    capture: CapturePipeline,
    scheduler: PlaybackScheduler,
    input: Option<Box<dyn InputDevice>>,
    output: Option<Box<dyn OutputDevice>>,
    channel: Option<Box<dyn SessionChannel>>,
    forwarding: bool,
    torn_down: bool,
    volume: VolumeMeter,
    events: EventSender,
    receiver: EventReceiver,
}

impl Session {
    /// Enters `Connecting`, acquires both devices and starts connecting.
    ///
    /// Never fails outright: if any resource cannot be acquired the session
    /// comes back in `Error` with everything it did acquire already released.
    pub fn open(config: SessionConfig, backend: &mut dyn Backend) -> Self {
        let (events, receiver) = event_queue();
        let volume = VolumeMeter::new();
        let mut session = Self {
            machine: StateMachine::new(),
            capture: CapturePipeline::new(config.volume_gain, volume.clone()),
            scheduler: PlaybackScheduler::new(OUTPUT_SAMPLE_RATE, volume.clone()),
            input: None,
            output: None,
            channel: None,
            forwarding: false,
            torn_down: false,
            volume,
            events,
            receiver,
        };
        info!("Opening voice session (model {})", config.model);

        match backend.acquire_output(session.events.clone()) {
            Ok(output) => session.output = Some(output),
            Err(e) => {
                error!("Output device unavailable: {}", e);
                session.fail();
                return session;
            }
        }

        match backend.acquire_input(session.events.clone(), session.machine.watch()) {
            Ok(input) => session.input = Some(input),
            Err(e) => {
                error!("Input device unavailable: {}", e);
                session.fail();
                return session;
            }
        }

        let setup = SetupMessage::from_config(&config);
        match backend.connect(&setup, session.events.clone()) {
            Ok(channel) => session.channel = Some(channel),
            Err(e) => {
                error!("Could not start connecting: {}", e);
                session.fail();
            }
        }

        session
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn state_watch(&self) -> StateWatch {
        self.machine.watch()
    }

    pub fn volume(&self) -> VolumeMeter {
        self.volume.clone()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.events.clone(),
        }
    }

    /// Sender for injecting events from outside the session thread.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn active_segments(&self) -> usize {
        self.scheduler.schedule().active_len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.scheduler.schedule().next_start_time()
    }

    /// True once teardown has released every device and the channel.
    pub fn is_released(&self) -> bool {
        self.torn_down && self.input.is_none() && self.output.is_none() && self.channel.is_none()
    }

    /// Processes events until the session reaches a terminal state. Emits a
    /// `Tick` whenever the queue is idle for `TICK_INTERVAL_MS`.
    pub fn run(&mut self) {
        let interval = Duration::from_millis(TICK_INTERVAL_MS);
        while !self.torn_down {
            match self.receiver.recv_timeout(interval) {
                Ok(event) => self.dispatch(event),
                Err(RecvTimeoutError::Timeout) => self.dispatch(SessionEvent::Tick),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Applies whatever is already queued without blocking.
    pub fn pump(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.dispatch(event);
        }
    }

    /// The single entry point for every event.
    pub fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ChannelOpened => self.on_open(),
            SessionEvent::ChannelMessage(message) => self.on_message(message),
            SessionEvent::ChannelClosed { reason } => {
                let reason = reason.map(|r| format!(": {}", r)).unwrap_or_default();
                if self.state() == SessionState::Connecting {
                    // The service turned the setup down
                    error!("Session channel closed before setup completed{}", reason);
                    self.finish(SessionState::Error);
                } else {
                    info!("Session channel closed{}", reason);
                    self.finish(SessionState::Disconnected);
                }
            }
            SessionEvent::ChannelError(e) => {
                error!("Session channel error: {}", e);
                self.finish(SessionState::Error);
            }
            SessionEvent::DeviceFailed(e) => {
                error!("Audio device failed: {}", e);
                self.finish(SessionState::Error);
            }
            SessionEvent::CaptureBlock(frame) => self.on_capture(frame),
            SessionEvent::SegmentFinished(id) => self.scheduler.segment_finished(id),
            SessionEvent::Tick => {
                if self.state() == SessionState::Connected {
                    self.scheduler.tick();
                }
            }
            SessionEvent::CloseRequested => self.close(),
        }
    }

    /// Hangs up. Safe from any state and any number of times.
    pub fn close(&mut self) {
        if !self.state().is_terminal() {
            info!("Closing voice session");
        }
        self.finish(SessionState::Disconnected);
    }

    fn on_open(&mut self) {
        if let Err(e) = self.machine.transition(SessionState::Connected) {
            debug!("Ignoring channel open: {}", e);
            return;
        }
        info!("Voice session connected");

        let started = match self.input.as_deref_mut() {
            Some(input) => input.start(),
            None => return,
        };
        match started {
            Ok(()) => self.forwarding = true,
            Err(e) => {
                error!("Could not start capture: {}", e);
                self.finish(SessionState::Error);
            }
        }
    }

    fn on_message(&mut self, message: InboundMessage) {
        if self.state() != SessionState::Connected {
            debug!("Dropping {:?} outside connected state", message);
            return;
        }
        match message {
            InboundMessage::Audio(payload) => {
                let Some(output) = self.output.as_deref_mut() else {
                    return;
                };
                match self.scheduler.enqueue_payload(output, &payload) {
                    Ok(placed) => debug!(
                        "Scheduled {} at {:.3}s for {:.3}s",
                        placed.id, placed.start_time, placed.duration
                    ),
                    Err(PlaybackError::Decode(e)) => warn!("Dropping audio payload: {}", e),
                    Err(PlaybackError::Device(e)) => warn!("Output refused segment: {}", e),
                }
            }
            InboundMessage::Interrupted => {
                let stopped = match self.output.as_deref_mut() {
                    Some(output) => self.scheduler.interrupt(output),
                    None => 0,
                };
                info!("Interrupted, flushed {} segment(s)", stopped);
            }
            InboundMessage::TurnComplete => debug!("Turn complete"),
            InboundMessage::Text(text) => info!("Assistant: {}", text),
            InboundMessage::GoAway { time_left } => warn!(
                "Service is going away (time left: {})",
                time_left.as_deref().unwrap_or("unknown")
            ),
        }
    }

    fn on_capture(&mut self, frame: AudioFrame) {
        if !self.forwarding || self.state() != SessionState::Connected {
            return;
        }
        let Some(chunk) = self.capture.process(frame) else {
            return;
        };
        let sent = match self.channel.as_deref_mut() {
            Some(channel) => channel.send(chunk),
            None => return,
        };
        if let Err(e) = sent {
            error!("Failed to send capture block: {}", e);
            self.finish(SessionState::Error);
        }
    }

    fn fail(&mut self) {
        self.finish(SessionState::Error);
    }

    fn finish(&mut self, state: SessionState) {
        if let Err(e) = self.machine.transition(state) {
            debug!("{}", e);
        }
        self.teardown();
    }

    /// Runs at most once. Every step is attempted even if an earlier one
    /// fails.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.forwarding = false;

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.release() {
                warn!("Failed to release input device: {}", e);
            }
        }

        match self.output.as_deref_mut() {
            Some(output) => {
                self.scheduler.interrupt(output);
            }
            None => self.scheduler.clear(),
        }

        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.release() {
                warn!("Failed to release output device: {}", e);
            }
        }

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close() {
                warn!("Failed to close session channel: {}", e);
            }
        }

        self.volume.reset();
        info!(
            "Voice session ended ({}, {} capture blocks sent)",
            self.state().as_str(),
            self.capture.blocks_encoded()
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
