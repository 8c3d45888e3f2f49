//! Sample-accurate output mixer behind the output device boundary.
//!
//! The device clock is the number of samples rendered so far. Buffers are
//! placed at an absolute start sample and mixed into whatever callback buffer
//! covers them.

use crate::event::SegmentId;
use log::debug;
use std::sync::Arc;

struct Voice {
    id: SegmentId,
    start: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

pub struct Mixer {
    sample_rate: u32,
    position: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::with_capacity(32),
        }
    }

    /// Device clock in seconds.
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Places a buffer at `start_time` seconds. The start is kept even if the
    /// clock already passed it: the missed head is skipped, so the buffer
    /// still ends at `start + len` and cannot overlap whatever follows it.
    pub fn schedule(&mut self, id: SegmentId, start_time: f64, samples: Arc<[f32]>) {
        let start = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        if start < self.position {
            debug!(
                "{} is {} samples late, skipping its head",
                id,
                self.position - start
            );
        }
        self.voices.push(Voice { id, start, samples });
    }

    /// Returns `false` if the segment already finished or was never scheduled.
    pub fn stop(&mut self, id: SegmentId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|voice| voice.id != id);
        self.voices.len() != before
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_len(&self) -> usize {
        self.voices.len()
    }

    /// Fills `out` with the next block and advances the clock. Segments that
    /// played their last sample in this block are appended to `finished`.
    pub fn render(&mut self, out: &mut [f32], finished: &mut Vec<SegmentId>) {
        out.fill(0.0);
        let block_start = self.position;
        let block_end = block_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start.max(block_start);
            let to = voice.end().min(block_end);
            if from >= to {
                continue;
            }
            let src = (from - voice.start) as usize;
            let dst = (from - block_start) as usize;
            let len = (to - from) as usize;
            for (o, s) in out[dst..dst + len]
                .iter_mut()
                .zip(&voice.samples[src..src + len])
            {
                *o += *s;
            }
        }

        self.voices.retain(|voice| {
            if voice.end() <= block_end {
                finished.push(voice.id);
                false
            } else {
                true
            }
        });

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.position = block_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize, value: f32) -> Arc<[f32]> {
        vec![value; len].into()
    }

    #[test]
    fn test_clock_advances_with_rendering() {
        let mut mixer = Mixer::new(24_000);
        let mut out = [0.0f32; 480];
        let mut finished = Vec::new();
        assert_eq!(mixer.now(), 0.0);
        for _ in 0..50 {
            mixer.render(&mut out, &mut finished);
        }
        assert_eq!(mixer.now(), 1.0);
    }

    #[test]
    fn test_segment_starts_at_exact_sample() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        // start_time 0.05s at 100Hz -> sample 5
        mixer.schedule(SegmentId(1), 0.05, buffer(3, 0.5));

        let mut out = [0.0f32; 10];
        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(finished, vec![SegmentId(1)]);
        assert_eq!(mixer.active_len(), 0);
    }

    #[test]
    fn test_segment_spanning_blocks_finishes_once() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        mixer.schedule(SegmentId(7), 0.0, buffer(6, 0.25));

        let mut out = [0.0f32; 4];
        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.25; 4]);
        assert!(finished.is_empty());

        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.25, 0.25, 0.0, 0.0]);
        assert_eq!(finished, vec![SegmentId(7)]);

        mixer.render(&mut out, &mut finished);
        assert_eq!(finished, vec![SegmentId(7)]);
    }

    #[test]
    fn test_back_to_back_segments_have_no_gap() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        mixer.schedule(SegmentId(0), 0.0, buffer(3, 0.1));
        mixer.schedule(SegmentId(1), 0.03, buffer(3, 0.2));

        let mut out = [0.0f32; 6];
        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
        assert_eq!(finished, vec![SegmentId(0), SegmentId(1)]);
    }

    #[test]
    fn test_late_start_skips_missed_head() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        let mut out = [0.0f32; 10];
        mixer.render(&mut out, &mut finished);

        // Starts at sample 8, clock is at 10: two samples are already gone
        mixer.schedule(SegmentId(2), 0.08, buffer(5, 0.3));
        mixer.render(&mut out, &mut finished);
        assert_eq!(out[..4], [0.3, 0.3, 0.3, 0.0]);
        assert_eq!(finished, vec![SegmentId(2)]);
    }

    #[test]
    fn test_fully_missed_segment_finishes_silently() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        let mut out = [0.0f32; 10];
        mixer.render(&mut out, &mut finished);

        mixer.schedule(SegmentId(4), 0.01, buffer(2, 0.3));
        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.0; 10]);
        assert_eq!(finished, vec![SegmentId(4)]);
    }

    #[test]
    fn test_render_between_clock_read_and_schedule_keeps_segments_apart() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();

        // The cursor is read, then a callback renders before the buffer lands
        let start = mixer.now();
        let mut block = [0.0f32; 4];
        mixer.render(&mut block, &mut finished);
        mixer.schedule(SegmentId(0), start, buffer(6, 0.25));
        mixer.schedule(SegmentId(1), start + 0.06, buffer(6, 0.5));

        let mut out = [0.0f32; 10];
        mixer.render(&mut out, &mut finished);
        assert_eq!(
            out,
            [0.25, 0.25, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]
        );
        assert_eq!(finished, vec![SegmentId(0), SegmentId(1)]);
    }

    #[test]
    fn test_stop_silences_and_reports_nothing() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        mixer.schedule(SegmentId(3), 0.0, buffer(20, 0.5));

        let mut out = [0.0f32; 5];
        mixer.render(&mut out, &mut finished);
        assert!(mixer.stop(SegmentId(3)));
        assert!(!mixer.stop(SegmentId(3)));

        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [0.0; 5]);
        assert!(finished.is_empty());
    }

    #[test]
    fn test_overlapping_output_is_clamped() {
        let mut mixer = Mixer::new(100);
        let mut finished = Vec::new();
        mixer.schedule(SegmentId(0), 0.0, buffer(2, 0.8));
        mixer.schedule(SegmentId(1), 0.0, buffer(2, 0.8));

        let mut out = [0.0f32; 2];
        mixer.render(&mut out, &mut finished);
        assert_eq!(out, [1.0, 1.0]);
    }
}
