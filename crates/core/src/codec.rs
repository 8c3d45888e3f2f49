//! PCM16 wire codec.
//!
//! Outbound audio is normalized f32 scaled by 32768, truncated to signed
//! 16-bit little-endian and base64 encoded. Inbound audio is the reverse.

use crate::constants::{INPUT_MIME_TYPE, PCM16_SCALE};
use crate::error::DecodeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

/// A capture block packed for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    pub data: String,
    pub mime_type: String,
}

impl EncodedChunk {
    /// Encodes a block of 16kHz samples.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: STANDARD.encode(encode_pcm16(samples)),
            mime_type: INPUT_MIME_TYPE.to_string(),
        }
    }
}

/// Converts one sample, truncating toward zero.
///
/// `+1.0` would land on 32768, one past `i16::MAX`, so the result is clamped
/// to the signed 16-bit range.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    (sample * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn pcm16_to_sample(value: i16) -> f32 {
    value as f32 / PCM16_SCALE
}

/// Packs samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Unpacks little-endian PCM16 bytes into normalized samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Decodes a base64 PCM16 payload as delivered by the remote service.
pub fn decode_base64_pcm16(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    decode_pcm16(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / PCM16_SCALE;

    #[test]
    fn test_round_trip_within_one_step() {
        let block: Vec<f32> = (0..512)
            .map(|i| ((i as f32) * 0.037).sin() * 0.9)
            .collect();
        let decoded = decode_pcm16(&encode_pcm16(&block)).unwrap();

        assert_eq!(decoded.len(), block.len());
        for (original, restored) in block.iter().zip(decoded.iter()) {
            assert!(
                (original - restored).abs() <= STEP,
                "{} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_full_scale_boundaries_clamp() {
        assert_eq!(sample_to_pcm16(1.0), i16::MAX);
        assert_eq!(sample_to_pcm16(-1.0), i16::MIN);
        assert_eq!(sample_to_pcm16(1.5), i16::MAX);
        assert_eq!(sample_to_pcm16(-2.0), i16::MIN);
    }

    #[test]
    fn test_conversion_truncates() {
        // 0.5 / 32768 * 32768 = 0.5 -> 0, not rounded up
        assert_eq!(sample_to_pcm16(0.5 * STEP), 0);
        assert_eq!(sample_to_pcm16(1.9 * STEP), 1);
        assert_eq!(sample_to_pcm16(-1.9 * STEP), -1);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_pcm16(&[STEP, -STEP]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_chunk_carries_mime_type_and_base64() {
        let chunk = EncodedChunk::from_samples(&[0.0, 0.0]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(chunk.data, "AAAAAA==");

        let json = serde_json::to_string(&chunk).unwrap();
        assert_eq!(json, r#"{"data":"AAAAAA==","mimeType":"audio/pcm;rate=16000"}"#);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert_eq!(decode_base64_pcm16(""), Err(DecodeError::Empty));
        assert_eq!(decode_pcm16(&[1, 2, 3]), Err(DecodeError::OddLength(3)));
        assert!(matches!(
            decode_base64_pcm16("not base64!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_base64_payload() {
        // 0x4000 = 16384 -> 0.5
        let samples = decode_base64_pcm16("AEAAwA==").unwrap();
        assert_eq!(samples, vec![0.5, -0.5]);
    }
}
