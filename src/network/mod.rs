//! Network subsystem for UDP audio transport

pub mod receiver;
pub mod rt;
pub mod sender;

pub use receiver::{PacketListener, VbanUdpReceiver};
pub use sender::VbanUdpSender;
