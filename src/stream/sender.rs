//! Sender-side stream encoder
//!
//! Runs inside the audio callback: accumulates the callback's output
//! frames, assembles VBAN datagrams once a full packet's worth is
//! available, and submits them to the UDP client. The packet counter
//! advances by one per datagram, so receivers can reconstruct the absolute
//! sample time as `counter x frames_per_packet`.

use std::sync::Arc;

use bytes::BytesMut;

use crate::audio::AudioFormat;
use crate::codec::PcmEncoder;
use crate::config::SenderConfig;
use crate::error::ConfigError;
use crate::network::VbanUdpSender;
use crate::protocol::{
    sample_rate_index, SampleFormat, VbanHeader, MAX_FRAMES_PER_PACKET, STREAM_NAME_SIZE,
    VBAN_DATA_MAX_SIZE, VBAN_HEADER_SIZE,
};

/// Audio node that streams its input channels to one VBAN destination.
pub struct StreamSender {
    udp: Arc<VbanUdpSender>,
    encoder: PcmEncoder,
    format: SampleFormat,
    stream_name: [u8; STREAM_NAME_SIZE],
    sample_rate_index: u8,
    /// Frames per packet as configured, before the payload-size clamp
    configured_frames: usize,
    frames_per_packet: usize,
    channels: usize,
    /// Per-channel accumulation across callbacks
    pending: Vec<Vec<f32>>,
    frame_counter: u32,
    /// Reusable datagram assembly buffer
    packet: BytesMut,
}

impl StreamSender {
    pub fn new(
        config: SenderConfig,
        format: AudioFormat,
        udp: Arc<VbanUdpSender>,
    ) -> Result<Self, ConfigError> {
        if config.stream_name.len() > STREAM_NAME_SIZE {
            return Err(ConfigError::StreamNameTooLong(config.stream_name));
        }
        let rate_index = sample_rate_index(format.sample_rate)
            .ok_or(ConfigError::UnsupportedSampleRate(format.sample_rate))?;

        Ok(Self {
            udp,
            encoder: PcmEncoder::new(),
            format: config.format,
            stream_name: VbanHeader::name_field(&config.stream_name),
            sample_rate_index: rate_index,
            configured_frames: config.frames_per_packet.clamp(1, MAX_FRAMES_PER_PACKET),
            frames_per_packet: 0,
            channels: 0,
            pending: Vec::new(),
            frame_counter: 0,
            packet: BytesMut::new(),
        })
    }

    /// Adopt a new engine format.
    ///
    /// Accumulated frames are discarded; the packet counter keeps running
    /// so the receiver sees a timeline jump rather than a restart.
    pub fn set_format(&mut self, format: AudioFormat) -> Result<(), ConfigError> {
        self.sample_rate_index = sample_rate_index(format.sample_rate)
            .ok_or(ConfigError::UnsupportedSampleRate(format.sample_rate))?;
        for channel in &mut self.pending {
            channel.clear();
        }
        Ok(())
    }

    /// Frames carried per datagram at the current channel count
    pub fn frames_per_packet(&self) -> usize {
        self.frames_per_packet
    }

    /// Packet counter of the next datagram
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Feed one audio period of per-channel input buffers.
    ///
    /// A change in the number of input channels reconfigures the packet
    /// layout and discards partial accumulation.
    pub fn process(&mut self, inputs: &[&[f32]]) {
        if inputs.is_empty() {
            return;
        }
        if inputs.len() != self.channels {
            if inputs.len() > 256 {
                tracing::warn!(channels = inputs.len(), "too many channels for VBAN");
                return;
            }
            self.channels = inputs.len();
            self.pending = vec![Vec::new(); self.channels];
            // Frames per packet are bounded by the counter field and by
            // what fits in one datagram at this channel count and width.
            let max_fitting =
                VBAN_DATA_MAX_SIZE / (self.channels * self.format.bytes_per_sample());
            self.frames_per_packet = self.configured_frames.min(max_fitting).max(1);
        }

        for (channel, input) in self.pending.iter_mut().zip(inputs) {
            channel.extend_from_slice(input);
        }

        let frames_per_packet = self.frames_per_packet;
        let mut offset = 0;
        while self.pending[0].len() - offset >= frames_per_packet {
            self.emit(offset, frames_per_packet);
            offset += frames_per_packet;
        }
        if offset > 0 {
            for channel in &mut self.pending {
                channel.drain(..offset);
            }
        }
    }

    fn emit(&mut self, offset: usize, frames: usize) {
        let header = VbanHeader {
            sample_rate_index: self.sample_rate_index,
            frames_minus_one: (frames - 1) as u8,
            channels_minus_one: (self.channels - 1) as u8,
            format: self.format,
            stream_name: self.stream_name,
            frame_counter: self.frame_counter,
        };

        self.packet
            .reserve(VBAN_HEADER_SIZE + frames * self.channels * self.format.bytes_per_sample());
        self.packet.extend_from_slice(&header.encode());
        self.encoder
            .encode_into(&self.pending, offset, frames, self.format, &mut self.packet);

        let datagram = self.packet.split().freeze();
        if let Err(e) = self.udp.send(&datagram) {
            // The audio path never surfaces errors; VBAN is best effort.
            tracing::warn!("failed to send packet: {}", e);
        }
        self.frame_counter = self.frame_counter.wrapping_add(1);
    }
}
