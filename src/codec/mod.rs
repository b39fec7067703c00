//! PCM codec
//!
//! Converts between the interleaved little-endian integer PCM carried by
//! VBAN payloads and the per-channel f32 buffers used on the audio side.

pub mod decoder;
pub mod encoder;

pub use decoder::PcmDecoder;
pub use encoder::PcmEncoder;
