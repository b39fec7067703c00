//! Multi-stream circular buffer with a shared, drift-compensated read head
//!
//! All incoming streams of one sender are written into per-stream circular
//! storage indexed by absolute sample time, so that every stream is played
//! back from the same read position. The read head trails the write head by
//! a latency that is either calibrated (grown on underflow up to a cap) or
//! pinned manually; sender/receiver clock drift and writer jumps are
//! absorbed by snapping the read head back to a fixed distance behind the
//! write head.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioFormat, DirtyFlag};

/// Per-stream circular storage.
///
/// The mutex guards the channel layout against resizes from the control
/// thread. The audio read path only ever takes `try_lock` and skips the
/// period on contention.
struct StreamSlot {
    /// channels x capacity samples
    data: Mutex<Vec<Vec<f32>>>,
}

impl StreamSlot {
    fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: Mutex::new(vec![vec![0.0; capacity]; channels]),
        }
    }
}

/// Result of a [`CircularBuffer::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Frames stored and the timeline advanced
    Written,
    /// No such stream; the packet was dropped
    UnknownStream,
    /// The frames did not match the slot's channel count; nothing was
    /// stored but the timeline still advanced
    ChannelMismatch { expected: usize, actual: usize },
}

/// Circular buffer shared between the receive thread (writes), the audio
/// callback (process + reads) and the control thread (stream membership,
/// latency configuration).
pub struct CircularBuffer {
    /// Stream map, locked for structural changes and lookups
    streams: Mutex<HashMap<String, Arc<StreamSlot>>>,
    /// Mirror of the map size for lock-free queries
    stream_count: AtomicUsize,

    /// Capacity in samples per channel per stream
    capacity: usize,
    /// Latency cap for calibration mode, in samples
    max_latency_samples: i64,

    /// Highest sample time seen since the last reset; receive thread owned
    write_position: AtomicU64,
    /// Write position at the end of the previous audio period; used to
    /// tell a stalled writer from real drift. Audio thread owned.
    last_write_position: AtomicU64,
    /// Shared read head; negative right after a reset. Audio thread owned.
    read_position: AtomicI64,

    latency_samples: AtomicI64,
    manual_latency_samples: AtomicI64,
    manual_latency: AtomicBool,
    /// Requests the read position to be recomputed from the write position
    reset: DirtyFlag,

    sample_rate: AtomicU32,
    buffer_size: AtomicUsize,
    /// Samples processed since the last latency log; audio thread owned
    log_counter: AtomicU64,
}

impl CircularBuffer {
    pub fn new(format: AudioFormat, capacity: usize, max_latency_samples: i64) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            stream_count: AtomicUsize::new(0),
            capacity,
            max_latency_samples,
            write_position: AtomicU64::new(0),
            last_write_position: AtomicU64::new(0),
            read_position: AtomicI64::new(0),
            latency_samples: AtomicI64::new(0),
            manual_latency_samples: AtomicI64::new(0),
            manual_latency: AtomicBool::new(false),
            reset: DirtyFlag::new(),
            sample_rate: AtomicU32::new(format.sample_rate),
            buffer_size: AtomicUsize::new(format.buffer_size),
            log_counter: AtomicU64::new(0),
        }
    }

    // --- control thread ---

    /// Add a stream to receive into the buffer.
    ///
    /// Resets the read and write positions; all streams of a sender share
    /// one timeline, so membership changes restart it.
    pub fn add_stream(&self, name: &str, channels: usize) {
        let slot = Arc::new(StreamSlot::new(channels, self.capacity));
        {
            let mut streams = self.streams.lock();
            streams.insert(name.to_string(), slot);
            self.stream_count.store(streams.len(), Ordering::Relaxed);
        }
        self.write_position.store(0, Ordering::Relaxed);
        self.read_position.store(0, Ordering::Relaxed);
    }

    /// Remove a stream
    pub fn remove_stream(&self, name: &str) {
        let mut streams = self.streams.lock();
        streams.remove(name);
        self.stream_count.store(streams.len(), Ordering::Relaxed);
    }

    /// Change the channel count of an existing stream, reallocating its
    /// storage under the slot lock.
    pub fn set_stream_channel_count(&self, name: &str, channels: usize) {
        let streams = self.streams.lock();
        match streams.get(name) {
            Some(slot) => {
                let mut data = slot.data.lock();
                if data.len() != channels {
                    let capacity = self.capacity;
                    data.resize_with(channels, || vec![0.0; capacity]);
                }
            }
            None => tracing::warn!(stream = name, "set_stream_channel_count: unknown stream"),
        }
    }

    /// Channel count of a stream, `None` if it is not present
    pub fn stream_channels(&self, name: &str) -> Option<usize> {
        let streams = self.streams.lock();
        streams.get(name).map(|slot| slot.data.lock().len())
    }

    /// Number of streams currently in the buffer
    pub fn stream_count(&self) -> usize {
        self.stream_count.load(Ordering::Relaxed)
    }

    /// Pin the latency to a fixed value in milliseconds instead of
    /// calibrating it.
    pub fn set_latency_ms(&self, latency: f32) {
        let samples = (latency * self.samples_per_ms()) as i64;
        self.manual_latency_samples.store(samples, Ordering::Relaxed);
        self.manual_latency.store(true, Ordering::Relaxed);
        self.reset.set();
    }

    /// Start calibrating the latency: reset it and grow it on every
    /// underflow until the stream stops underflowing or the cap is hit.
    pub fn calibrate_latency(&self) {
        self.manual_latency.store(false, Ordering::Relaxed);
        self.reset.set();
    }

    /// Current latency between write and read head, in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.latency_samples.load(Ordering::Relaxed) as f32 / self.samples_per_ms()
    }

    /// Force the read position to be recomputed on the next audio period.
    /// Used by the host when an audio callback came in late.
    pub fn reset(&self) {
        self.reset.set();
    }

    /// Adopt a new engine format; the read position is recomputed on the
    /// next period.
    pub fn set_format(&self, format: AudioFormat) {
        self.sample_rate.store(format.sample_rate, Ordering::Relaxed);
        self.buffer_size.store(format.buffer_size, Ordering::Relaxed);
        self.reset.set();
    }

    // --- receive thread ---

    /// Write decoded frames for `name` at absolute sample time `time`.
    ///
    /// Packets for streams the control thread has not added are dropped.
    /// Frames are only stored when the channel count matches the slot, but
    /// the write head advances either way so the timeline keeps moving.
    pub fn write(&self, name: &str, time: u64, frames: &[Vec<f32>]) -> WriteOutcome {
        let slot = {
            let streams = self.streams.lock();
            match streams.get(name) {
                Some(slot) => Arc::clone(slot),
                None => return WriteOutcome::UnknownStream,
            }
        };

        let outcome = {
            let mut data = slot.data.lock();
            if data.len() == frames.len() {
                let frame_count = frames.first().map(|f| f.len()).unwrap_or(0);
                let mut pos = (time % self.capacity as u64) as usize;
                for i in 0..frame_count {
                    for (channel, input) in frames.iter().enumerate() {
                        data[channel][pos] = input[i];
                    }
                    pos += 1;
                    if pos >= self.capacity {
                        pos = 0;
                    }
                }
                WriteOutcome::Written
            } else {
                WriteOutcome::ChannelMismatch {
                    expected: data.len(),
                    actual: frames.len(),
                }
            }
        };

        let write = self.write_position.load(Ordering::Relaxed);
        if time > write {
            self.write_position.store(time, Ordering::Relaxed);
        }

        // Sample time zero on a running timeline means the sender
        // restarted; bring the read position along.
        if time == 0 && write != 0 {
            self.write_position.store(0, Ordering::Relaxed);
            self.reset.set();
        }

        outcome
    }

    // --- audio thread ---

    /// Advance the read head by one audio period and apply the drift
    /// policy. Call once per period, before any [`Self::read`].
    pub fn process(&self) {
        let buffer_size = self.buffer_size.load(Ordering::Relaxed) as i64;
        let write = self.write_position.load(Ordering::Relaxed) as i64;
        let last_write = self.last_write_position.load(Ordering::Relaxed) as i64;

        if self.reset.check() {
            let latency = if self.manual_latency.load(Ordering::Relaxed) {
                self.manual_latency_samples.load(Ordering::Relaxed)
            } else {
                // Initial guess for calibration; grown from here on
                // underflow.
                2 * buffer_size
            };
            self.latency_samples.store(latency, Ordering::Relaxed);
            self.read_position.store(write - latency, Ordering::Relaxed);
            tracing::debug!(latency, "circular buffer: reset read position");
        } else {
            let mut read = self.read_position.load(Ordering::Relaxed) + buffer_size;
            let mut latency = self.latency_samples.load(Ordering::Relaxed);

            let logged = self.log_counter.load(Ordering::Relaxed) + buffer_size as u64;
            if logged >= self.sample_rate.load(Ordering::Relaxed) as u64 {
                self.log_counter.store(0, Ordering::Relaxed);
                tracing::debug!(latency = write - read, "circular buffer: measured latency");
            } else {
                self.log_counter.store(logged, Ordering::Relaxed);
            }

            if read + buffer_size > write {
                if write == last_write {
                    // No data arrived this period. The writer is idle, not
                    // drifting; hold the latency.
                    read = write - latency;
                } else {
                    latency = self.grow_latency(latency, buffer_size);
                    read = write - latency;
                    tracing::debug!(
                        latency,
                        "circular buffer: read position overtook write position"
                    );
                }
            } else if write - read > 2 * latency {
                // Writer jumped ahead, e.g. a sender restart with a
                // non-zero packet counter.
                latency = self.grow_latency(latency, buffer_size);
                read = write - latency;
                tracing::debug!(latency, "circular buffer: read position too far behind");
            }

            self.read_position.store(read, Ordering::Relaxed);
        }

        self.last_write_position.store(write as u64, Ordering::Relaxed);
    }

    fn grow_latency(&self, latency: i64, buffer_size: i64) -> i64 {
        if self.manual_latency.load(Ordering::Relaxed) || latency >= self.max_latency_samples {
            return latency;
        }
        let grown = latency + buffer_size;
        self.latency_samples.store(grown, Ordering::Relaxed);
        grown
    }

    /// Read one channel of a stream at the current read position.
    ///
    /// Consumed samples are zeroed so that positions the writer has not
    /// refreshed on the next wrap play back as silence instead of stale
    /// audio. Unknown streams leave the output untouched; lock contention
    /// skips the period.
    pub fn read(&self, name: &str, channel: usize, out: &mut [f32]) {
        let read = self.read_position.load(Ordering::Relaxed);
        if read < 0 {
            out.fill(0.0);
            return;
        }

        let slot = {
            let Some(streams) = self.streams.try_lock() else {
                return;
            };
            match streams.get(name) {
                Some(slot) => Arc::clone(slot),
                None => return,
            }
        };

        let Some(mut data) = slot.data.try_lock() else {
            return;
        };
        if channel < data.len() {
            let buffer = &mut data[channel];
            let mut pos = (read as u64 % self.capacity as u64) as usize;
            for sample in out.iter_mut() {
                *sample = buffer[pos];
                buffer[pos] = 0.0;
                pos += 1;
                if pos >= self.capacity {
                    pos = 0;
                }
            }
        }
    }

    // --- observability ---

    pub fn write_position(&self) -> u64 {
        self.write_position.load(Ordering::Relaxed)
    }

    pub fn read_position(&self) -> i64 {
        self.read_position.load(Ordering::Relaxed)
    }

    pub fn latency_samples(&self) -> i64 {
        self.latency_samples.load(Ordering::Relaxed)
    }

    fn samples_per_ms(&self) -> f32 {
        self.sample_rate.load(Ordering::Relaxed) as f32 / 1000.0
    }
}

/// Audio node that reads all channels of one stream from a
/// [`CircularBuffer`] into its output buffers, once per audio period.
pub struct CircularBufferReader {
    buffer: Arc<CircularBuffer>,
    stream_name: String,
    outputs: Vec<Vec<f32>>,
    buffer_size: usize,
}

impl CircularBufferReader {
    pub fn new(
        buffer: Arc<CircularBuffer>,
        stream_name: impl Into<String>,
        channels: usize,
        format: AudioFormat,
    ) -> Self {
        Self {
            buffer,
            stream_name: stream_name.into(),
            outputs: vec![vec![0.0; format.buffer_size]; channels],
            buffer_size: format.buffer_size,
        }
    }

    /// Change the number of channels read and output.
    ///
    /// Must match the stream's channel count for reads to produce data.
    pub fn set_channel_count(&mut self, channels: usize) {
        self.outputs = vec![vec![0.0; self.buffer_size]; channels];
    }

    pub fn channel_count(&self) -> usize {
        self.outputs.len()
    }

    /// Pull one period of audio for every channel
    pub fn process(&mut self) {
        for (channel, out) in self.outputs.iter_mut().enumerate() {
            self.buffer.read(&self.stream_name, channel, out);
        }
    }

    /// Output buffer of a channel, valid until the next `process`
    pub fn output(&self, channel: usize) -> &[f32] {
        &self.outputs[channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 48000,
        buffer_size: 256,
    };

    fn buffer() -> CircularBuffer {
        CircularBuffer::new(FORMAT, 8192, 2048)
    }

    /// One packet of `frames` mono frames filled with `value`
    fn mono(frames: usize, value: f32) -> Vec<Vec<f32>> {
        vec![vec![value; frames]]
    }

    #[test]
    fn test_write_position_is_max_time() {
        let buffer = buffer();
        buffer.add_stream("s", 1);

        assert_eq!(buffer.write("s", 0, &mono(256, 0.1)), WriteOutcome::Written);
        assert_eq!(buffer.write_position(), 0);
        assert_eq!(buffer.write("s", 512, &mono(256, 0.2)), WriteOutcome::Written);
        assert_eq!(buffer.write_position(), 512);
        // Out of order: stored, but the head does not move backward.
        assert_eq!(buffer.write("s", 256, &mono(256, 0.3)), WriteOutcome::Written);
        assert_eq!(buffer.write_position(), 512);
    }

    #[test]
    fn test_unknown_stream_write_is_dropped() {
        let buffer = buffer();
        assert_eq!(
            buffer.write("nope", 0, &mono(256, 0.1)),
            WriteOutcome::UnknownStream
        );
        assert_eq!(buffer.write_position(), 0);
    }

    #[test]
    fn test_restart_resets_write_and_read() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process(); // consume the calibration reset

        buffer.write("s", 1000, &mono(256, 0.1));
        assert_eq!(buffer.write_position(), 1000);

        buffer.write("s", 0, &mono(256, 0.1));
        assert_eq!(buffer.write_position(), 0);

        buffer.process();
        assert_eq!(buffer.latency_samples(), 512);
        assert_eq!(buffer.read_position(), -512);
    }

    #[test]
    fn test_negative_read_position_outputs_silence() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process();
        assert!(buffer.read_position() < 0);

        let mut out = vec![1.0f32; 256];
        buffer.read("s", 0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_read_zeroes_consumed_samples() {
        let format = AudioFormat::new(48000, 64);
        let buffer = CircularBuffer::new(format, 8192, 2048);
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();

        // Fill the first 512 samples with a position ramp.
        for packet in 0..8u64 {
            let time = packet * 64;
            let frames: Vec<f32> = (0..64).map(|i| (time + i) as f32).collect();
            buffer.write("s", time, &[frames]);
        }
        assert_eq!(buffer.write_position(), 448);

        buffer.process();
        assert_eq!(buffer.latency_samples(), 128);
        assert_eq!(buffer.read_position(), 320);

        let mut out = vec![0.0f32; 64];
        buffer.read("s", 0, &mut out);
        for (i, &sample) in out.iter().enumerate() {
            assert_eq!(sample, (320 + i) as f32);
        }

        // Same window again without an intervening write: zeroed.
        buffer.read("s", 0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_calibration_grows_latency_on_live_underflow() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process();
        assert_eq!(buffer.latency_samples(), 512);

        // Writer advances 128 frames per period while the reader consumes
        // 256: the reader catches up and must buy itself more latency.
        let mut grew_at = None;
        for period in 1..=7u64 {
            buffer.write("s", period * 128, &mono(128, 0.1));
            buffer.process();
            if buffer.latency_samples() > 512 && grew_at.is_none() {
                grew_at = Some(period);
            }
        }

        assert_eq!(buffer.latency_samples(), 768, "one growth step of buffer_size");
        assert_eq!(grew_at, Some(3));
        // After the snap the reader sits a full latency behind the writer.
        assert!(buffer.read_position() + 256 <= buffer.write_position() as i64);
    }

    #[test]
    fn test_calibration_growth_caps_at_max_latency() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process();

        // A writer that is persistently slower than the reader.
        for period in 1..=200u64 {
            buffer.write("s", period * 64, &mono(64, 0.1));
            buffer.process();
        }
        assert_eq!(buffer.latency_samples(), 2048);
    }

    #[test]
    fn test_stalled_writer_snaps_without_growth() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process();

        for period in 1..=5u64 {
            buffer.write("s", period * 256, &mono(256, 0.1));
            buffer.process();
        }
        let latency = buffer.latency_samples();
        let write = buffer.write_position() as i64;

        // Writer stops; the reader advances until it would pass the write
        // head, then snaps back without buying more latency, so the read
        // position oscillates within one period of `write - latency`.
        for _ in 0..5 {
            buffer.process();
            assert_eq!(buffer.latency_samples(), latency);
            assert!(buffer.read_position() >= write - latency);
            assert!(buffer.read_position() <= write - latency + 256);
        }
    }

    #[test]
    fn test_overshoot_snaps_read_position() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.calibrate_latency();
        buffer.process();

        buffer.write("s", 256, &mono(256, 0.1));
        buffer.process();

        // Sender restart with a non-zero packet counter: the write head
        // jumps far ahead.
        buffer.write("s", 6000, &mono(256, 0.1));
        buffer.process();

        let latency = buffer.latency_samples();
        assert_eq!(latency, 768, "overshoot grows once in calibration mode");
        assert_eq!(buffer.read_position(), 6000 - latency);
    }

    #[test]
    fn test_manual_latency_is_pinned() {
        let buffer = buffer();
        buffer.add_stream("s", 1);
        buffer.set_latency_ms(10.0); // 480 samples at 48 kHz
        buffer.process();
        assert_eq!(buffer.latency_samples(), 480);

        // Live-writer underflow: snap, but never grow.
        for period in 1..=8u64 {
            buffer.write("s", period * 128, &mono(128, 0.1));
            buffer.process();
            assert_eq!(buffer.latency_samples(), 480);
        }
        assert!((buffer.latency_ms() - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_channel_mismatch_skips_data_but_advances_head() {
        let buffer = buffer();
        buffer.add_stream("s", 2);
        assert_eq!(buffer.stream_channels("s"), Some(2));

        // Mono frames into a stereo slot: nothing stored.
        assert_eq!(
            buffer.write("s", 512, &mono(256, 0.5)),
            WriteOutcome::ChannelMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(buffer.write_position(), 512);

        buffer.set_stream_channel_count("s", 1);
        assert_eq!(buffer.stream_channels("s"), Some(1));
    }

    #[test]
    fn test_add_remove_stream_count() {
        let buffer = buffer();
        buffer.add_stream("a", 2);
        buffer.add_stream("b", 1);
        assert_eq!(buffer.stream_count(), 2);
        buffer.remove_stream("a");
        assert_eq!(buffer.stream_count(), 1);
        buffer.remove_stream("missing");
        assert_eq!(buffer.stream_count(), 1);
    }

    #[test]
    fn test_reader_pulls_all_channels() {
        let format = AudioFormat::new(48000, 64);
        let buffer = Arc::new(CircularBuffer::new(format, 8192, 2048));
        buffer.add_stream("s", 2);
        buffer.calibrate_latency();

        for packet in 0..8u64 {
            let time = packet * 64;
            let left = vec![0.25f32; 64];
            let right = vec![-0.25f32; 64];
            buffer.write("s", time, &[left, right]);
        }
        buffer.process();
        assert!(buffer.read_position() >= 0);

        let mut reader = CircularBufferReader::new(Arc::clone(&buffer), "s", 2, format);
        reader.process();
        assert!(reader.output(0).iter().all(|&s| s == 0.25));
        assert!(reader.output(1).iter().all(|&s| s == -0.25));
    }
}
