//! Queue-backed stream playout
//!
//! A [`StreamListener`] that feeds one [`SampleQueuePlayer`]: the receive
//! thread pushes decoded packets into the queue, the audio callback pulls
//! periods out. Used for streams that carry no shared timeline.

use crate::audio::{AudioFormat, SampleQueuePlayer};
use crate::error::ConfigError;

use super::dispatch::StreamListener;

/// Plays one VBAN stream through a lock-free sample queue.
pub struct QueueStreamPlayer {
    stream_name: String,
    sample_rate: u32,
    player: SampleQueuePlayer,
}

impl QueueStreamPlayer {
    /// Create a player for `channels` channels at the engine format.
    ///
    /// `max_queue_buffers` bounds the backlog; `spare_latency_buffers` is
    /// the pre-roll held back before playback starts.
    pub fn new(
        stream_name: impl Into<String>,
        format: AudioFormat,
        channels: usize,
        max_queue_buffers: usize,
        spare_latency_buffers: usize,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            sample_rate: format.sample_rate,
            player: SampleQueuePlayer::new(
                channels,
                format.buffer_size,
                max_queue_buffers,
                spare_latency_buffers,
            ),
        }
    }

    /// The underlying queue player
    pub fn player(&self) -> &SampleQueuePlayer {
        &self.player
    }

    /// Produce one period of audio; call once per audio callback
    pub fn process(&self, outputs: &mut [&mut [f32]]) {
        self.player.process(outputs);
    }
}

impl StreamListener for QueueStreamPlayer {
    fn stream_name(&self) -> &str {
        &self.stream_name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn push_buffers(&self, buffers: &[Vec<f32>]) -> Result<(), ConfigError> {
        let channels = self.player.channels();
        if buffers.len() < channels {
            return Err(ConfigError::ChannelMismatch {
                stream: self.stream_name.clone(),
                expected: channels,
                actual: buffers.len(),
            });
        }
        // Extra channels in the packet are simply not played.
        self.player.queue_frames(&buffers[..channels]);
        Ok(())
    }

    fn set_latency(&self, buffers: usize) {
        self.player.set_spare_latency(buffers);
    }

    fn clear_spare(&self) {
        self.player.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 48000,
        buffer_size: 64,
    };

    fn run_period(player: &QueueStreamPlayer) -> Vec<Vec<f32>> {
        let channels = player.player().channels();
        let mut outs = vec![vec![9.0f32; FORMAT.buffer_size]; channels];
        {
            let mut refs: Vec<&mut [f32]> = outs.iter_mut().map(|o| o.as_mut_slice()).collect();
            player.process(&mut refs);
        }
        outs
    }

    #[test]
    fn test_plays_pushed_buffers() {
        let player = QueueStreamPlayer::new("s", FORMAT, 2, 8, 0);
        player
            .push_buffers(&[vec![0.5; 64], vec![-0.5; 64]])
            .unwrap();

        let outs = run_period(&player);
        assert!(outs[0].iter().all(|&s| s == 0.5));
        assert!(outs[1].iter().all(|&s| s == -0.5));
    }

    #[test]
    fn test_rejects_too_few_channels() {
        let player = QueueStreamPlayer::new("s", FORMAT, 2, 8, 0);
        let result = player.push_buffers(&[vec![0.5; 64]]);
        assert!(matches!(
            result,
            Err(ConfigError::ChannelMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_extra_channels_are_ignored() {
        let player = QueueStreamPlayer::new("s", FORMAT, 1, 8, 0);
        player
            .push_buffers(&[vec![0.25; 64], vec![0.75; 64]])
            .unwrap();

        let outs = run_period(&player);
        assert!(outs[0].iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_latency_fans_into_player() {
        let player = QueueStreamPlayer::new("s", FORMAT, 1, 8, 0);
        player.set_latency(2);
        player.push_buffers(&[vec![0.5; 64]]).unwrap();

        // The new spare applies on the next period: drain and silence.
        let outs = run_period(&player);
        assert!(outs[0].iter().all(|&s| s == 0.0));
        assert!(player.player().saving_spare());
    }
}
