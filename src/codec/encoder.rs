//! Integer PCM encoder
//!
//! Interleaves per-channel f32 buffers and quantizes to little-endian
//! integer PCM for the wire.

use bytes::BytesMut;

use crate::protocol::SampleFormat;

/// PCM encoder.
///
/// Quantization mirrors the decoder's convention: samples are clamped to
/// [-1.0, 1.0] and multiplied by the positive maximum of the target width.
pub struct PcmEncoder {
    /// Frames encoded
    frames_encoded: u64,
    /// Total payload bytes produced
    bytes_produced: u64,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self {
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Interleave and quantize `frames` frames from per-channel buffers,
    /// starting at `offset`, appending the payload bytes to `out`.
    ///
    /// Every channel buffer must hold at least `offset + frames` samples.
    pub fn encode_into(
        &mut self,
        channels: &[Vec<f32>],
        offset: usize,
        frames: usize,
        format: SampleFormat,
        out: &mut BytesMut,
    ) {
        match format {
            SampleFormat::Int16 => {
                for i in offset..offset + frames {
                    for channel in channels {
                        let value = (channel[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        out.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
            SampleFormat::Int32 => {
                for i in offset..offset + frames {
                    for channel in channels {
                        let value = (channel[i].clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                        out.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
        }

        self.frames_encoded += frames as u64;
        self.bytes_produced += (frames * channels.len() * format.bytes_per_sample()) as u64;
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
