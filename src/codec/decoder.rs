//! Integer PCM decoder
//!
//! Deinterleaves VBAN payloads and converts to floating point in one pass.

use crate::error::WireError;
use crate::protocol::{SampleFormat, VbanHeader};

/// PCM decoder with reusable per-channel output buffers.
///
/// The scratch buffers are grown on demand and kept between packets, so a
/// steady stream with a stable shape does not allocate.
pub struct PcmDecoder {
    /// Per-channel decode buffers (reused to avoid allocations)
    buffers: Vec<Vec<f32>>,
    /// Frames decoded
    frames_decoded: u64,
    /// Total samples produced across all channels
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            frames_decoded: 0,
            samples_produced: 0,
        }
    }

    /// Decode a payload described by `header` into per-channel f32 buffers.
    ///
    /// Returns one buffer per channel, each `header.frames_per_packet()`
    /// samples long. The payload length must match the header exactly.
    ///
    /// Integer samples are divided by the positive maximum of their width,
    /// not `2^(n-1)`. The most negative wire value therefore maps slightly
    /// below -1.0; this matches what VBAN peers put on the wire and is kept
    /// for interop.
    pub fn decode(&mut self, header: &VbanHeader, payload: &[u8]) -> Result<&[Vec<f32>], WireError> {
        let frames = header.frames_per_packet();
        let channels = header.channels();
        let expected = header.payload_len();
        if payload.len() != expected {
            return Err(WireError::BadPayloadLength {
                expected,
                actual: payload.len(),
            });
        }

        self.buffers.resize_with(channels, Vec::new);
        for buffer in &mut self.buffers[..channels] {
            buffer.resize(frames, 0.0);
        }

        match header.format {
            SampleFormat::Int16 => {
                for (i, frame) in payload.chunks_exact(2 * channels).enumerate() {
                    for (channel, sample) in frame.chunks_exact(2).enumerate() {
                        let value = i16::from_le_bytes([sample[0], sample[1]]);
                        self.buffers[channel][i] = value as f32 / i16::MAX as f32;
                    }
                }
            }
            SampleFormat::Int32 => {
                for (i, frame) in payload.chunks_exact(4 * channels).enumerate() {
                    for (channel, sample) in frame.chunks_exact(4).enumerate() {
                        let value =
                            i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                        self.buffers[channel][i] = (value as f64 / i32::MAX as f64) as f32;
                    }
                }
            }
        }

        self.frames_decoded += frames as u64;
        self.samples_produced += (frames * channels) as u64;

        Ok(&self.buffers[..channels])
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            samples_produced: self.samples_produced,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.samples_produced = 0;
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub samples_produced: u64,
}
