//! Receiving façade for the shared-timeline path
//!
//! Subscribes to the UDP receiver and, for every datagram: validates the
//! header, checks the sample rate against the audio engine's, decodes the
//! PCM payload and writes it into the circular buffer at the packet's
//! sample time. The control thread manages stream membership and latency
//! through this type and polls the most recent error.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::circular::WriteOutcome;
use crate::audio::{AudioFormat, CircularBuffer};
use crate::codec::PcmDecoder;
use crate::config::ReceiverConfig;
use crate::error::{ConfigError, WireError};
use crate::network::PacketListener;
use crate::protocol::{VbanHeader, VBAN_HEADER_SIZE};

/// Receives all VBAN streams of one sender into a [`CircularBuffer`].
pub struct StreamReceiver {
    buffer: Arc<CircularBuffer>,
    engine_sample_rate: AtomicU32,
    /// Receive-thread decode scratch
    decoder: Mutex<PcmDecoder>,
    /// Most recent packet error; cleared by a fully handled packet
    error_message: Mutex<String>,
}

impl StreamReceiver {
    pub fn new(format: AudioFormat, config: &ReceiverConfig) -> Self {
        Self {
            buffer: Arc::new(CircularBuffer::new(
                format,
                config.capacity,
                config.max_latency_samples,
            )),
            engine_sample_rate: AtomicU32::new(format.sample_rate),
            decoder: Mutex::new(PcmDecoder::new()),
            error_message: Mutex::new(String::new()),
        }
    }

    /// The shared circular buffer, for wiring up readers and the audio
    /// process
    pub fn circular_buffer(&self) -> Arc<CircularBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Adopt a new engine format
    pub fn set_format(&self, format: AudioFormat) {
        self.engine_sample_rate
            .store(format.sample_rate, Ordering::Relaxed);
        self.buffer.set_format(format);
    }

    // Control surface, delegating to the circular buffer.

    pub fn add_stream(&self, name: &str, channels: usize) {
        self.buffer.add_stream(name, channels);
    }

    pub fn remove_stream(&self, name: &str) {
        self.buffer.remove_stream(name);
    }

    pub fn set_stream_channel_count(&self, name: &str, channels: usize) {
        self.buffer.set_stream_channel_count(name, channels);
    }

    pub fn set_latency_ms(&self, latency: f32) {
        self.buffer.set_latency_ms(latency);
    }

    pub fn calibrate_latency(&self) {
        self.buffer.calibrate_latency();
    }

    pub fn latency_ms(&self) -> f32 {
        self.buffer.latency_ms()
    }

    pub fn stream_count(&self) -> usize {
        self.buffer.stream_count()
    }

    /// Most recent packet error; `None` when healthy or when the message
    /// is briefly contended
    pub fn error_message(&self) -> Option<String> {
        self.error_message
            .try_lock()
            .map(|message| message.clone())
            .filter(|message| !message.is_empty())
    }

    fn record_error(&self, message: String) {
        tracing::debug!(error = %message, "dropping VBAN packet");
        *self.error_message.lock() = message;
    }

    fn clear_error(&self) {
        let mut message = self.error_message.lock();
        if !message.is_empty() {
            message.clear();
        }
    }
}

impl PacketListener for StreamReceiver {
    fn packet_received(&self, data: &[u8], _source: SocketAddr) {
        let header = match VbanHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                self.record_error(e.to_string());
                return;
            }
        };

        let engine_rate = self.engine_sample_rate.load(Ordering::Relaxed);
        if header.sample_rate() != engine_rate {
            self.record_error(
                WireError::SampleRateMismatch {
                    stream: header.stream_name().to_string(),
                    packet: header.sample_rate(),
                    engine: engine_rate,
                }
                .to_string(),
            );
            return;
        }

        let mut decoder = self.decoder.lock();
        let buffers = match decoder.decode(&header, &data[VBAN_HEADER_SIZE..]) {
            Ok(buffers) => buffers,
            Err(e) => {
                self.record_error(e.to_string());
                return;
            }
        };

        let name = header.stream_name();
        match self.buffer.write(name, header.sample_time(), buffers) {
            WriteOutcome::Written => self.clear_error(),
            WriteOutcome::UnknownStream => {
                self.record_error(WireError::UnknownStream(name.to_string()).to_string());
            }
            WriteOutcome::ChannelMismatch { expected, actual } => {
                self.record_error(
                    ConfigError::ChannelMismatch {
                        stream: name.to_string(),
                        expected,
                        actual,
                    }
                    .to_string(),
                );
            }
        }
    }
}
