pub mod capture;
pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod event;
pub mod mixer;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod state;
pub mod volume;

pub use capture::CapturePipeline;
pub use codec::EncodedChunk;
pub use config::SessionConfig;
pub use device::{Backend, InputDevice, OutputDevice, SessionChannel};
pub use event::{AudioFrame, EventSender, InboundMessage, SegmentId, SessionEvent};
pub use mixer::Mixer;
pub use playback::PlaybackScheduler;
pub use session::{Session, SessionHandle};
pub use state::{SessionState, StateWatch};
pub use volume::VolumeMeter;
