//! Volume readout shared with the front end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Latest volume sample in `[0, 1]`, stored as `f32` bits so the front end
/// can poll it from another thread.
#[derive(Clone, Default)]
pub struct VolumeMeter {
    level: Arc<AtomicU32>,
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.level.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Root-mean-square of a block. Empty blocks are silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Scales an RMS value into a `[0, 1]` meter reading.
pub fn scaled_volume(rms: f32, gain: f32) -> f32 {
    (rms * gain).clamp(0.0, 1.0)
}

/// Stand-in level while synthesized audio plays.
///
/// Output buffers are never tapped for analysis, so this is a periodic
/// wobble in `[0.5, 1.0]`, not a measurement.
#[derive(Default)]
pub struct SyntheticVolume {
    phase: u32,
}

impl SyntheticVolume {
    pub fn next_level(&mut self) -> f32 {
        self.phase = self.phase.wrapping_add(1);
        let t = self.phase as f32 * 0.9;
        0.75 + 0.25 * t.sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(rms(&[0.0; 4096]), 0.0);
        assert_eq!(scaled_volume(rms(&[0.0; 4096]), 10.0), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_volume_monotonic_in_amplitude() {
        let mut previous = 0.0;
        for amplitude in [0.001f32, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128] {
            let block = vec![amplitude; 1024];
            let volume = scaled_volume(rms(&block), 10.0);
            assert!(volume >= previous, "{} < {}", volume, previous);
            previous = volume;
        }
    }

    #[test]
    fn test_constant_block_rms() {
        let block = vec![-0.05f32; 256];
        assert!((rms(&block) - 0.05).abs() < 1e-6);
        assert!((scaled_volume(rms(&block), 10.0) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_loud_input_clamps_to_one() {
        assert_eq!(scaled_volume(rms(&[0.9; 64]), 10.0), 1.0);
    }

    #[test]
    fn test_meter_clamps_and_shares() {
        let meter = VolumeMeter::new();
        let reader = meter.clone();
        meter.set(3.0);
        assert_eq!(reader.get(), 1.0);
        meter.set(-1.0);
        assert_eq!(reader.get(), 0.0);
        meter.set(f32::NAN);
        assert_eq!(reader.get(), 0.0);
    }

    #[test]
    fn test_synthetic_level_stays_in_band() {
        let mut synthetic = SyntheticVolume::default();
        for _ in 0..1000 {
            let level = synthetic.next_level();
            assert!((0.5..=1.0).contains(&level), "{}", level);
        }
    }
}
