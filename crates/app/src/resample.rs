//! Rate and channel conversion between device formats and the call's fixed
//! 16kHz capture and 24kHz playback.

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Streaming mono resampler. Accepts input of any length and keeps the
/// remainder until a full chunk is available.
pub struct MonoResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        anyhow::ensure!(
            source_rate > 0 && target_rate > 0,
            "Sample rate cannot be zero"
        );
        anyhow::ensure!(chunk_size > 0, "Chunk size cannot be zero");

        let inner = if source_rate == target_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(
                target_rate as f64 / source_rate as f64,
                1.0,
                params,
                chunk_size,
                1,
            )
            .with_context(|| {
                format!("Failed to create resampler {} Hz -> {} Hz", source_rate, target_rate)
            })?;
            Some(resampler)
        };

        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let planes = inner.process(&[chunk], None).context("Resampling failed")?;
            out.extend_from_slice(&planes[0]);
        }
        Ok(out)
    }
}

/// Averages each interleaved frame down to one sample.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Writes each mono sample to every channel of its frame.
pub fn upmix(mono: &[f32], channels: usize, out: &mut [f32]) {
    for (frame, sample) in out.chunks_mut(channels.max(1)).zip(mono) {
        frame.fill(*sample);
    }
}
