//! Shared constants for the Atlas voice session engine.

/// Microphone capture rate expected by the remote service (16kHz)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of the synthesized audio streamed back by the remote service (24kHz)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture block (256ms at 16kHz)
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Gain applied to input RMS before it is published as a volume level
pub const VOLUME_GAIN: f32 = 10.0;

/// Scale between normalized f32 samples and signed 16-bit PCM
pub const PCM16_SCALE: f32 = 32768.0;

/// Media type tag attached to every outbound capture chunk
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Upper bound between two `Tick` events while a session is running (ms)
pub const TICK_INTERVAL_MS: u64 = 50;
