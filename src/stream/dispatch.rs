//! Per-stream packet dispatch
//!
//! Receive path for senders without a shared timeline: each datagram is
//! validated and decoded once, then routed by stream name to the
//! registered listeners, which feed their own playout queues.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::PcmDecoder;
use crate::error::{ConfigError, WireError};
use crate::network::PacketListener;
use crate::protocol::{VbanHeader, VBAN_HEADER_SIZE};

/// Handles decoded audio for one named VBAN stream.
///
/// Called on the receive thread; implementations must not block.
pub trait StreamListener: Send + Sync {
    /// Name of the stream this listener handles
    fn stream_name(&self) -> &str;

    /// Sample rate the listener runs at; packets with another rate are
    /// rejected
    fn sample_rate(&self) -> u32;

    /// Take one packet's worth of per-channel audio
    fn push_buffers(&self, buffers: &[Vec<f32>]) -> Result<(), ConfigError>;

    /// Additional playout latency, in audio periods
    fn set_latency(&self, buffers: usize);

    /// Drop buffered audio and rebuild the pre-roll
    fn clear_spare(&self);
}

/// Routes validated VBAN packets to per-stream listeners.
///
/// Health is tracked as a count of consecutively handled packets measured
/// against the number of listeners: any validation or routing failure
/// zeroes it, and [`PacketDispatcher::has_errors`] reports trouble until
/// every stream has delivered a good packet again.
pub struct PacketDispatcher {
    listeners: Mutex<Vec<Arc<dyn StreamListener>>>,
    listener_count: AtomicUsize,
    decoder: Mutex<PcmDecoder>,
    error_message: Mutex<String>,
    healthy_packets: AtomicUsize,
    latency_buffers: AtomicUsize,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            listener_count: AtomicUsize::new(0),
            decoder: Mutex::new(PcmDecoder::new()),
            error_message: Mutex::new(String::new()),
            healthy_packets: AtomicUsize::new(0),
            latency_buffers: AtomicUsize::new(1),
        }
    }

    /// Register a listener for its stream name
    pub fn register_listener(&self, listener: Arc<dyn StreamListener>) {
        let mut listeners = self.listeners.lock();
        listeners.push(listener);
        self.listener_count.store(listeners.len(), Ordering::Relaxed);
    }

    /// Unregister a previously registered listener
    pub fn remove_listener(&self, listener: &Arc<dyn StreamListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|candidate| !Arc::ptr_eq(candidate, listener));
        self.listener_count.store(listeners.len(), Ordering::Relaxed);
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::Relaxed)
    }

    /// Set the playout latency on every listener, in audio periods
    pub fn set_latency(&self, buffers: usize) {
        self.latency_buffers.store(buffers, Ordering::Relaxed);
        for listener in self.listeners.lock().iter() {
            listener.set_latency(buffers);
        }
    }

    /// Latency last set through [`Self::set_latency`], in audio periods
    pub fn latency(&self) -> usize {
        self.latency_buffers.load(Ordering::Relaxed)
    }

    /// Clear the pre-roll reserve of every listener
    pub fn clear_spare_buffers(&self) {
        for listener in self.listeners.lock().iter() {
            listener.clear_spare();
        }
    }

    /// True while incoming packets are not being handled cleanly
    pub fn has_errors(&self) -> bool {
        self.healthy_packets.load(Ordering::Relaxed) < self.listener_count.load(Ordering::Relaxed)
    }

    /// Most recent error message; `None` when healthy or when the message
    /// is briefly contended
    pub fn error_message(&self) -> Option<String> {
        if !self.has_errors() {
            return None;
        }
        self.error_message
            .try_lock()
            .map(|message| message.clone())
            .filter(|message| !message.is_empty())
    }

    fn record_error(&self, message: String) {
        tracing::debug!(error = %message, "dropping VBAN packet");
        *self.error_message.lock() = message;
        self.healthy_packets.store(0, Ordering::Relaxed);
    }

    fn record_healthy(&self) {
        let count = self.listener_count.load(Ordering::Relaxed);
        let healthy = self.healthy_packets.load(Ordering::Relaxed);
        if healthy < count {
            self.healthy_packets.store(healthy + 1, Ordering::Relaxed);
        }
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketListener for PacketDispatcher {
    fn packet_received(&self, data: &[u8], _source: SocketAddr) {
        let header = match VbanHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                self.record_error(e.to_string());
                return;
            }
        };

        let name = header.stream_name();
        let listeners = self.listeners.lock();
        let mut found = false;

        for listener in listeners.iter() {
            if listener.stream_name() != name {
                continue;
            }
            found = true;

            if header.sample_rate() != listener.sample_rate() {
                self.record_error(
                    WireError::SampleRateMismatch {
                        stream: name.to_string(),
                        packet: header.sample_rate(),
                        engine: listener.sample_rate(),
                    }
                    .to_string(),
                );
                continue;
            }

            let mut decoder = self.decoder.lock();
            match decoder.decode(&header, &data[VBAN_HEADER_SIZE..]) {
                Ok(buffers) => match listener.push_buffers(buffers) {
                    Ok(()) => self.record_healthy(),
                    Err(e) => self.record_error(format!("{}: {}", name, e)),
                },
                Err(e) => self.record_error(e.to_string()),
            }
        }

        if !found {
            self.record_error(WireError::UnknownStream(name.to_string()).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleFormat;
    use bytes::BytesMut;

    struct Sink {
        name: String,
        sample_rate: u32,
        received: Mutex<Vec<Vec<Vec<f32>>>>,
    }

    impl Sink {
        fn new(name: &str, sample_rate: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                sample_rate,
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl StreamListener for Sink {
        fn stream_name(&self) -> &str {
            &self.name
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn push_buffers(&self, buffers: &[Vec<f32>]) -> Result<(), ConfigError> {
            self.received.lock().push(buffers.to_vec());
            Ok(())
        }

        fn set_latency(&self, _buffers: usize) {}

        fn clear_spare(&self) {}
    }

    fn packet(name: &str, rate_index: u8, frames: usize, value: f32) -> Vec<u8> {
        let header = VbanHeader {
            sample_rate_index: rate_index,
            frames_minus_one: (frames - 1) as u8,
            channels_minus_one: 0,
            format: SampleFormat::Int16,
            stream_name: VbanHeader::name_field(name),
            frame_counter: 0,
        };
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&header.encode());
        let mut encoder = crate::codec::PcmEncoder::new();
        encoder.encode_into(&[vec![value; frames]], 0, frames, SampleFormat::Int16, &mut bytes);
        bytes.to_vec()
    }

    fn source() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_routes_by_stream_name() {
        let dispatcher = PacketDispatcher::new();
        let one = Sink::new("one", 48000);
        let two = Sink::new("two", 48000);
        dispatcher.register_listener(one.clone());
        dispatcher.register_listener(two.clone());

        dispatcher.packet_received(&packet("one", 3, 64, 0.5), source());
        assert_eq!(one.received.lock().len(), 1);
        assert!(two.received.lock().is_empty());

        let buffers = one.received.lock();
        assert_eq!(buffers[0].len(), 1);
        assert!((buffers[0][0][0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_unknown_stream_records_error() {
        let dispatcher = PacketDispatcher::new();
        let sink = Sink::new("known", 48000);
        dispatcher.register_listener(sink);

        dispatcher.packet_received(&packet("mystery", 3, 64, 0.1), source());
        assert!(dispatcher.has_errors());
        assert!(dispatcher.error_message().unwrap().contains("mystery"));
    }

    #[test]
    fn test_sample_rate_mismatch_records_error() {
        let dispatcher = PacketDispatcher::new();
        let sink = Sink::new("s", 48000);
        dispatcher.register_listener(sink.clone());

        // Rate index 16 is 44100 Hz.
        dispatcher.packet_received(&packet("s", 16, 64, 0.1), source());
        assert!(dispatcher.has_errors());
        assert!(sink.received.lock().is_empty());

        // A good packet restores health.
        dispatcher.packet_received(&packet("s", 3, 64, 0.1), source());
        assert!(!dispatcher.has_errors());
        assert_eq!(dispatcher.error_message(), None);
    }

    #[test]
    fn test_malformed_packet_records_error() {
        let dispatcher = PacketDispatcher::new();
        dispatcher.register_listener(Sink::new("s", 48000));

        dispatcher.packet_received(b"not a vban packet at all....", source());
        assert!(dispatcher.has_errors());
    }

    #[test]
    fn test_remove_listener_stops_routing() {
        let dispatcher = PacketDispatcher::new();
        let sink = Sink::new("s", 48000);
        let listener: Arc<dyn StreamListener> = sink.clone();
        dispatcher.register_listener(listener.clone());
        dispatcher.remove_listener(&listener);
        assert_eq!(dispatcher.listener_count(), 0);

        dispatcher.packet_received(&packet("s", 3, 64, 0.1), source());
        assert!(sink.received.lock().is_empty());
    }
}
