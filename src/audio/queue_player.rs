//! Lock-free sample queue feeding the audio callback
//!
//! Playout path for senders without a shared timeline: the only signal
//! available is how many samples are queued. A configurable "spare" of
//! queued samples is held back before playback starts, so that irregular
//! packet arrival can be absorbed; an underflow drains the output to
//! silence until the spare has been rebuilt.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

use super::DirtyFlag;

/// Multichannel interleaved sample queue with a pre-roll discipline.
///
/// The producer side (`queue_samples`, `queue_frames`) is called from the
/// network thread, the consumer side (`process`) once per period from the
/// audio callback. There is exactly one consumer; the fields it owns are
/// relaxed atomics plus a scratch buffer it takes with `try_lock`, so the
/// audio path never blocks.
pub struct SampleQueuePlayer {
    /// Interleaved samples, network thread in, audio thread out
    queue: ArrayQueue<f32>,
    channels: usize,

    /// Maximum backlog in audio periods; beyond it incoming buffers are
    /// dropped and the consumer is told to resync.
    max_queue_buffers: AtomicUsize,
    /// Requested spare pre-roll in audio periods
    spare_latency_buffers: AtomicUsize,
    /// Tells the consumer to drain and resync
    clear: DirtyFlag,
    /// Enable drop/underflow logging
    verbose: AtomicBool,

    // Audio thread owned
    buffer_size: AtomicUsize,
    applied_spare_buffers: AtomicUsize,
    saving_spare: AtomicBool,
    /// Dequeue scratch (reused to avoid allocations); held only by the
    /// single consumer, except while `set_buffer_size` resizes it
    scratch: parking_lot::Mutex<Vec<f32>>,
}

impl SampleQueuePlayer {
    /// Create a player for `channels` interleaved channels at the engine's
    /// period length. The queue holds at most `max_queue_buffers` periods;
    /// `spare_latency_buffers` of them are held back as pre-roll.
    pub fn new(
        channels: usize,
        buffer_size: usize,
        max_queue_buffers: usize,
        spare_latency_buffers: usize,
    ) -> Self {
        Self {
            queue: ArrayQueue::new(max_queue_buffers.max(1) * buffer_size * channels),
            channels,
            max_queue_buffers: AtomicUsize::new(max_queue_buffers),
            spare_latency_buffers: AtomicUsize::new(spare_latency_buffers),
            clear: DirtyFlag::new(),
            verbose: AtomicBool::new(false),
            buffer_size: AtomicUsize::new(buffer_size),
            applied_spare_buffers: AtomicUsize::new(spare_latency_buffers),
            saving_spare: AtomicBool::new(true),
            scratch: parking_lot::Mutex::new(vec![0.0; buffer_size * channels]),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Requested spare pre-roll, applied by the consumer on its next period
    pub fn set_spare_latency(&self, buffers: usize) {
        self.spare_latency_buffers.store(buffers, Ordering::Relaxed);
    }

    /// Cap the backlog, in audio periods
    pub fn set_max_queue_buffers(&self, buffers: usize) {
        self.max_queue_buffers.store(buffers, Ordering::Relaxed);
    }

    /// Drop everything queued and rebuild the spare before playing again
    pub fn clear(&self) {
        self.clear.set();
    }

    /// Enable logging of drops and underflows
    pub fn set_verbose(&self, value: bool) {
        self.verbose.store(value, Ordering::Relaxed);
    }

    /// Adopt a new period length: drop queued audio and resync
    pub fn set_buffer_size(&self, buffer_size: usize) {
        let mut scratch = self.scratch.lock();
        self.buffer_size.store(buffer_size, Ordering::Relaxed);
        scratch.resize(buffer_size * self.channels, 0.0);
        self.clear.set();
    }

    // --- network thread ---

    /// Queue interleaved frames for playback.
    ///
    /// When the backlog would exceed the configured maximum the whole
    /// buffer is dropped and the consumer resyncs; the producer clock is
    /// running fast and skipping ahead is the only correction available.
    pub fn queue_samples(&self, interleaved: &[f32]) {
        if !self.reserve(interleaved.len()) {
            return;
        }
        for &sample in interleaved {
            if self.queue.push(sample).is_err() {
                // Queue physically full; consumer will resync.
                self.clear.set();
                return;
            }
        }
    }

    /// Queue per-channel buffers, interleaving on the fly.
    ///
    /// Every channel buffer must be the same length; the channel count
    /// must match the player's.
    pub fn queue_frames(&self, channels: &[Vec<f32>]) {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        if channels.len() != self.channels || !self.reserve(frames * self.channels) {
            return;
        }
        for i in 0..frames {
            for channel in channels {
                if self.queue.push(channel[i]).is_err() {
                    self.clear.set();
                    return;
                }
            }
        }
    }

    fn reserve(&self, incoming: usize) -> bool {
        let max_samples = self.max_queue_buffers.load(Ordering::Relaxed)
            * self.buffer_size.load(Ordering::Relaxed)
            * self.channels;
        if self.queue.len() + incoming > max_samples {
            if self.verbose.load(Ordering::Relaxed) {
                tracing::warn!(
                    queued = self.queue.len(),
                    "sample queue: dropping buffer, queue is getting too big"
                );
            }
            self.clear.set();
            return false;
        }
        true
    }

    // --- audio thread ---

    /// Produce one period of audio into per-channel output buffers.
    ///
    /// Outputs are filled with silence while the spare is being rebuilt,
    /// after a clear request, and on underflow.
    pub fn process(&self, outputs: &mut [&mut [f32]]) {
        debug_assert_eq!(outputs.len(), self.channels);

        // Contended only while the buffer size is being reconfigured.
        let Some(mut scratch) = self.scratch.try_lock() else {
            fill_silence(outputs);
            return;
        };

        let requested_spare = self.spare_latency_buffers.load(Ordering::Relaxed);
        if requested_spare != self.applied_spare_buffers.load(Ordering::Relaxed)
            || self.clear.check()
        {
            self.applied_spare_buffers
                .store(requested_spare, Ordering::Relaxed);
            self.saving_spare.store(true, Ordering::Relaxed);
            while self.queue.pop().is_some() {}
            fill_silence(outputs);
            return;
        }

        let buffer_size = self.buffer_size.load(Ordering::Relaxed);
        let needed = buffer_size * self.channels;
        let spare_samples = requested_spare * buffer_size;

        if self.saving_spare.load(Ordering::Relaxed) {
            if self.queue.len() < (buffer_size + spare_samples) * self.channels {
                fill_silence(outputs);
                return;
            }
            self.saving_spare.store(false, Ordering::Relaxed);
        }

        if self.queue.len() < needed {
            if self.verbose.load(Ordering::Relaxed) {
                tracing::warn!(
                    queued = self.queue.len(),
                    "sample queue: not enough samples, rebuilding spare"
                );
            }
            self.saving_spare.store(true, Ordering::Relaxed);
            fill_silence(outputs);
            return;
        }

        for slot in scratch.iter_mut().take(needed) {
            match self.queue.pop() {
                Some(sample) => *slot = sample,
                // Single consumer, so the length check above makes this
                // unreachable; degrade to silence rather than trust it.
                None => *slot = 0.0,
            }
        }

        for frame in 0..buffer_size {
            for (channel, out) in outputs.iter_mut().enumerate() {
                out[frame] = scratch[frame * self.channels + channel];
            }
        }
    }

    /// Samples currently queued, approximate
    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    /// True while the player is holding back output to rebuild the spare
    pub fn saving_spare(&self) -> bool {
        self.saving_spare.load(Ordering::Relaxed)
    }
}

fn fill_silence(outputs: &mut [&mut [f32]]) {
    for out in outputs.iter_mut() {
        out.fill(0.0);
    }
}
