//! # VBAN Stream
//!
//! Low-latency VBAN (VB-Audio Network) PCM streaming over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SENDER                                  │
//! │   audio callback ──▶ StreamSender (stream::sender)                   │
//! │                        accumulate frames │ assemble VBAN datagrams   │
//! │                                          ▼                           │
//! │                      VbanUdpSender (network::sender)                 │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ UDP (port 13251)
//! ┌──────────────────────────────────▼───────────────────────────────────┐
//! │                             RECEIVER                                 │
//! │   VbanUdpReceiver (network::receiver) ── realtime receive thread     │
//! │        │ fan out to listeners                                        │
//! │        ├──▶ StreamReceiver (stream::receiver)                        │
//! │        │      validate ▶ decode ▶ CircularBuffer (audio::circular)   │
//! │        │                             │ shared timeline, drift        │
//! │        │                             ▼ compensation                  │
//! │        │                  CircularBufferReader ──▶ audio callback    │
//! │        │                                                             │
//! │        └──▶ PacketDispatcher (stream::dispatch)                      │
//! │               route by stream name                                   │
//! │                 └──▶ QueueStreamPlayer (stream::player)              │
//! │                        SampleQueuePlayer ──▶ audio callback          │
//! │                        (audio::queue_player, spare pre-roll)         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two receive paths exist. Streams of a sender that shares a timeline
//! (a packet counter common to all its streams) go through the
//! [`audio::CircularBuffer`], which keeps every stream in sync behind one
//! drift-compensated read position. Streams without a shared timeline go
//! through per-stream [`audio::SampleQueuePlayer`]s, which only track how
//! many samples are queued and hold back a configurable pre-roll.
//!
//! The host audio engine is an external collaborator: it owns the audio
//! callback, and once per period it calls the `process` methods of the
//! audio-side objects and reads their output buffers. Nothing on that
//! path blocks or allocates.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod stream;

pub use error::{Error, Result};

/// Crate-wide defaults
pub mod constants {
    /// Default UDP port for VBAN traffic
    pub const DEFAULT_UDP_PORT: u16 = 13251;

    /// Default socket receive buffer size in bytes
    pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1_000_000;

    /// Default circular buffer capacity in samples per channel per stream
    pub const DEFAULT_CIRCULAR_CAPACITY: usize = 8192;

    /// Upper bound for drift-compensated latency in samples
    pub const MAX_LATENCY_SAMPLES: i64 = 2048;
}
