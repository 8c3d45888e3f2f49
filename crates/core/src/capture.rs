//! Capture pipeline: microphone block -> volume reading + wire chunk.

use crate::codec::EncodedChunk;
use crate::event::AudioFrame;
use crate::volume::{rms, scaled_volume, VolumeMeter};

pub struct CapturePipeline {
    gain: f32,
    volume: VolumeMeter,
    blocks_encoded: u64,
}

impl CapturePipeline {
    pub fn new(gain: f32, volume: VolumeMeter) -> Self {
        Self {
            gain,
            volume,
            blocks_encoded: 0,
        }
    }

    /// Publishes the block's scaled RMS and encodes it for the channel.
    ///
    /// Returns `None` for an empty frame; nothing is published or sent.
    pub fn process(&mut self, frame: AudioFrame) -> Option<EncodedChunk> {
        if frame.samples.is_empty() {
            return None;
        }
        self.volume
            .set(scaled_volume(rms(&frame.samples), self.gain));
        self.blocks_encoded += 1;
        Some(EncodedChunk::from_samples(&frame.samples))
    }

    pub fn blocks_encoded(&self) -> u64 {
        self.blocks_encoded
    }
}
