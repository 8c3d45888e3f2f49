//! Gapless playback scheduling and barge-in flushing.
//!
//! Every inbound segment starts at `max(next_start_time, now)` and pushes the
//! cursor forward by exactly its duration, so consecutive segments butt up
//! against each other with no gap and no overlap. An interruption stops all
//! active segments and pulls the cursor back to the device clock.

use crate::codec::decode_base64_pcm16;
use crate::device::OutputDevice;
use crate::error::PlaybackError;
use crate::event::SegmentId;
use crate::volume::{SyntheticVolume, VolumeMeter};
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Decoded synthesized audio, mono at the output rate.
#[derive(Debug, Clone)]
pub struct InboundSegment {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl InboundSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where the scheduled segment landed on the device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start_time: f64,
    pub duration: f64,
}

#[derive(Debug, Default)]
pub struct PlaybackSchedule {
    next_start_time: f64,
    active: BTreeSet<SegmentId>,
}

impl PlaybackSchedule {
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

pub struct PlaybackScheduler {
    schedule: PlaybackSchedule,
    sample_rate: u32,
    next_id: u64,
    volume: VolumeMeter,
    synthetic: SyntheticVolume,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, volume: VolumeMeter) -> Self {
        Self {
            schedule: PlaybackSchedule::default(),
            sample_rate,
            next_id: 0,
            volume,
            synthetic: SyntheticVolume::default(),
        }
    }

    pub fn schedule(&self) -> &PlaybackSchedule {
        &self.schedule
    }

    /// Decodes a base64 PCM16 payload and queues it behind what is already
    /// scheduled. On error the schedule is left exactly as it was.
    pub fn enqueue_payload(
        &mut self,
        output: &mut dyn OutputDevice,
        payload: &str,
    ) -> Result<ScheduledSegment, PlaybackError> {
        let samples = decode_base64_pcm16(payload)?;
        self.enqueue(output, InboundSegment::new(samples, self.sample_rate))
    }

    pub fn enqueue(
        &mut self,
        output: &mut dyn OutputDevice,
        segment: InboundSegment,
    ) -> Result<ScheduledSegment, PlaybackError> {
        let start_time = self.schedule.next_start_time.max(output.now());
        let duration = segment.duration();
        let id = SegmentId(self.next_id);

        output.schedule(id, start_time, segment.samples)?;

        self.next_id += 1;
        self.schedule.active.insert(id);
        self.schedule.next_start_time = start_time + duration;
        self.volume.set(self.synthetic.next_level());

        Ok(ScheduledSegment {
            id,
            start_time,
            duration,
        })
    }

    /// Completion report from the output device. Unknown ids (already
    /// flushed) are ignored.
    pub fn segment_finished(&mut self, id: SegmentId) {
        if !self.schedule.active.remove(&id) {
            debug!("Ignoring completion of inactive {}", id);
            return;
        }
        if self.schedule.active.is_empty() {
            self.volume.reset();
        }
    }

    /// Refreshes the synthetic level while anything is playing.
    pub fn tick(&mut self) {
        if !self.schedule.active.is_empty() {
            self.volume.set(self.synthetic.next_level());
        }
    }

    /// Barge-in: stop everything, drop the backlog. Returns how many segments
    /// were stopped. Safe to repeat.
    pub fn interrupt(&mut self, output: &mut dyn OutputDevice) -> usize {
        let stopped = std::mem::take(&mut self.schedule.active);
        for id in &stopped {
            if let Err(e) = output.stop(*id) {
                debug!("Stop of {} ignored: {}", id, e);
            }
        }
        self.schedule.next_start_time = output.now();
        self.volume.reset();
        stopped.len()
    }

    /// Flush used when no output device is left to stop segments on.
    pub fn clear(&mut self) {
        self.schedule.active.clear();
        self.volume.reset();
    }
}
