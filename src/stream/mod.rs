//! Stream-level wiring
//!
//! Glues the transport to the audio side: the receiving façades subscribe
//! to a [`crate::network::VbanUdpReceiver`] and turn validated datagrams
//! into circular-buffer writes or per-stream queue pushes; the sender turns
//! audio-callback output into VBAN datagrams.

pub mod dispatch;
pub mod player;
pub mod receiver;
pub mod sender;

pub use dispatch::{PacketDispatcher, StreamListener};
pub use player::QueueStreamPlayer;
pub use receiver::StreamReceiver;
pub use sender::StreamSender;
