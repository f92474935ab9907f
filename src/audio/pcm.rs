// PCM16 codec helpers shared by the capture and playback paths.
//
// Quantization is asymmetric: negative samples scale by 32768 and
// non-negative samples by 32767, so -1.0 maps to i16::MIN and 1.0 to i16::MAX.
// Decoding uses the same split, which keeps encode/decode within one step.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::time::Duration;

const NEGATIVE_SCALE: f32 = 32768.0;
const POSITIVE_SCALE: f32 = 32767.0;

/// Bytes per 16-bit sample
pub const SAMPLE_WIDTH: usize = 2;

/// Quantize floating samples to signed 16-bit PCM
///
/// Samples are clipped to [-1, 1] before scaling.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * NEGATIVE_SCALE) as i16
            } else {
                (s * POSITIVE_SCALE) as i16
            }
        })
        .collect()
}

/// Inverse of [`float_to_pcm16`]
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            if s < 0 {
                s as f32 / NEGATIVE_SCALE
            } else {
                s as f32 / POSITIVE_SCALE
            }
        })
        .collect()
}

/// Pack samples as little-endian bytes
pub fn encode_pcm16_le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Unpack little-endian bytes into samples
///
/// Fails when the byte length is not a multiple of the sample width; a
/// truncated sample means the chunk was corrupted in transit.
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        bail!(
            "Invalid PCM data: byte length {} is not a multiple of {} (required for 16-bit samples)",
            bytes.len(),
            SAMPLE_WIDTH
        );
    }

    Ok(bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// An immutable buffer of mono PCM16LE audio
///
/// Produced by the capture encoder or received from the remote endpoint.
/// Each chunk is consumed once by the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    bytes: Vec<u8>,
}

impl AudioChunk {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Quantize and pack floating samples
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            bytes: encode_pcm16_le(&float_to_pcm16(samples)),
        }
    }

    /// Decode the base64 wire form
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("Failed to decode base64 audio payload")?;
        Ok(Self { bytes })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Decode back to floating samples
    pub fn decode(&self) -> Result<Vec<f32>> {
        let samples = decode_pcm16_le(&self.bytes)?;
        Ok(pcm16_to_float(&samples))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whole samples contained in the chunk
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / SAMPLE_WIDTH
    }

    /// Playback duration at the given sample rate
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_extremes() {
        let pcm = float_to_pcm16(&[-1.0, 1.0, 0.0, -2.5, 3.0]);
        assert_eq!(pcm, vec![i16::MIN, i16::MAX, 0, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_asymmetric_scale() {
        // -0.5 * 32768 = -16384, 0.5 * 32767 = 16383.5 -> 16383
        assert_eq!(float_to_pcm16(&[-0.5, 0.5]), vec![-16384, 16383]);
        let decoded = pcm16_to_float(&[i16::MIN, i16::MAX]);
        assert_eq!(decoded, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let input: Vec<f32> = (0..=2000).map(|i| (i as f32 / 1000.0) - 1.0).collect();
        let chunk = AudioChunk::from_samples(&input);
        let output = chunk.decode().unwrap();

        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(output.iter()) {
            // One step is 1/32768 below zero and 1/32767 at or above it,
            // since non-negative samples scale by i16::MAX
            let step = if *a < 0.0 { 1.0 / NEGATIVE_SCALE } else { 1.0 / POSITIVE_SCALE };
            assert!((a - b).abs() <= step, "{a} decoded as {b}");
            assert!(a * b >= 0.0, "sign flipped: {a} -> {b}");
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_pcm16_le(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(decode_pcm16_le(&bytes).unwrap(), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_odd_length_fails() {
        let err = decode_pcm16_le(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(err.to_string().contains("not a multiple of 2"));

        let chunk = AudioChunk::from_bytes(vec![0; 7]);
        assert!(chunk.decode().is_err());
    }

    #[test]
    fn test_base64_wire_form() {
        let chunk = AudioChunk::from_bytes(vec![0x01, 0x00, 0xFF, 0x7F]);
        let wire = chunk.to_base64();
        assert_eq!(wire, "AQD/fw==");
        assert_eq!(AudioChunk::from_base64(&wire).unwrap(), chunk);
        assert!(AudioChunk::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::from_bytes(vec![0; 4800]); // 2400 samples
        assert_eq!(chunk.sample_count(), 2400);
        assert_eq!(chunk.duration(24000), Duration::from_millis(100));
        assert_eq!(chunk.duration(0), Duration::ZERO);
    }
}
