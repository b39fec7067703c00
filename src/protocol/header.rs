//! VBAN header parsing and encoding

use crate::error::WireError;

use super::{
    BIT_RESOLUTION_MASK, CODEC_MASK, CODEC_PCM, PROTOCOL_AUDIO, PROTOCOL_MASK, SAMPLE_RATE_MASK,
    SampleFormat, STREAM_NAME_SIZE, VBAN_HEADER_SIZE, VBAN_MAGIC,
};

/// A validated VBAN packet header.
///
/// Field layout on the wire (all little-endian):
///
/// ```text
/// offset  size  field
///      0     4  "VBAN"
///      4     1  format_SR   (protocol | sample rate index)
///      5     1  format_nbs  (frames per packet - 1)
///      6     1  format_nbc  (channels - 1)
///      7     1  format_bit  (codec | bit resolution)
///      8    16  streamname  (zero padded ASCII)
///     24     4  nuFrame     (packet counter, first packet = 0)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbanHeader {
    /// Sample rate index into [`super::SAMPLE_RATES`]
    pub sample_rate_index: u8,
    /// Frames per packet minus one
    pub frames_minus_one: u8,
    /// Channels minus one
    pub channels_minus_one: u8,
    /// Sample encoding of the payload
    pub format: SampleFormat,
    /// Stream name, zero padded
    pub stream_name: [u8; STREAM_NAME_SIZE],
    /// Packet counter, starts at 0
    pub frame_counter: u32,
}

impl VbanHeader {
    /// Parse and validate the first 28 bytes of a datagram.
    ///
    /// Performs semantic validation only; callers gate on the maximum
    /// datagram size before handing bytes in.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < VBAN_HEADER_SIZE {
            return Err(WireError::TooShort(data.len()));
        }

        if &data[0..4] != VBAN_MAGIC {
            return Err(WireError::BadMagic);
        }

        let protocol = data[4] & PROTOCOL_MASK;
        if protocol != PROTOCOL_AUDIO {
            return Err(WireError::UnsupportedProtocol(protocol));
        }

        let codec = data[7] & CODEC_MASK;
        if codec != CODEC_PCM {
            return Err(WireError::UnsupportedCodec(codec));
        }

        let resolution = data[7] & BIT_RESOLUTION_MASK;
        let format = SampleFormat::from_wire_code(resolution)
            .ok_or(WireError::UnsupportedBitDepth(resolution))?;

        let sample_rate_index = data[4] & SAMPLE_RATE_MASK;
        if super::sample_rate_from_index(sample_rate_index).is_none() {
            return Err(WireError::UnsupportedSampleRate(sample_rate_index));
        }

        let mut stream_name = [0u8; STREAM_NAME_SIZE];
        stream_name.copy_from_slice(&data[8..24]);

        Ok(Self {
            sample_rate_index,
            frames_minus_one: data[5],
            channels_minus_one: data[6],
            format,
            stream_name,
            frame_counter: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Encode to the 28-byte wire layout
    pub fn encode(&self) -> [u8; VBAN_HEADER_SIZE] {
        let mut buf = [0u8; VBAN_HEADER_SIZE];
        buf[0..4].copy_from_slice(VBAN_MAGIC);
        buf[4] = PROTOCOL_AUDIO | (self.sample_rate_index & SAMPLE_RATE_MASK);
        buf[5] = self.frames_minus_one;
        buf[6] = self.channels_minus_one;
        buf[7] = CODEC_PCM | self.format.wire_code();
        buf[8..24].copy_from_slice(&self.stream_name);
        buf[24..28].copy_from_slice(&self.frame_counter.to_le_bytes());
        buf
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        // The index was validated at parse time.
        super::SAMPLE_RATES[self.sample_rate_index as usize]
    }

    /// Frames (samples per channel) carried by the packet, 1..=256
    pub fn frames_per_packet(&self) -> usize {
        self.frames_minus_one as usize + 1
    }

    /// Channel count, 1..=256
    pub fn channels(&self) -> usize {
        self.channels_minus_one as usize + 1
    }

    /// Payload size in bytes declared by the header
    pub fn payload_len(&self) -> usize {
        self.frames_per_packet() * self.channels() * self.format.bytes_per_sample()
    }

    /// Position of the packet's first frame on the stream timeline
    pub fn sample_time(&self) -> u64 {
        self.frame_counter as u64 * self.frames_per_packet() as u64
    }

    /// Stream name as a string slice, up to the first NUL
    pub fn stream_name(&self) -> &str {
        let end = self
            .stream_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STREAM_NAME_SIZE);
        std::str::from_utf8(&self.stream_name[..end]).unwrap_or("")
    }

    /// Zero-padded name field from a string, truncating past 16 bytes
    pub fn name_field(name: &str) -> [u8; STREAM_NAME_SIZE] {
        let mut field = [0u8; STREAM_NAME_SIZE];
        let len = name.len().min(STREAM_NAME_SIZE);
        field[..len].copy_from_slice(&name.as_bytes()[..len]);
        field
    }
}
