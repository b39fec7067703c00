//! Error types for the VBAN streaming crate

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-packet validation and decoding failures.
///
/// All of these are non-fatal: the offending datagram is dropped and the
/// most recent message is kept for the control thread to poll.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Packet too small: {0} bytes")]
    TooShort(usize),

    #[error("Invalid VBAN magic")]
    BadMagic,

    #[error("Unsupported protocol 0x{0:02x}, only AUDIO is handled")]
    UnsupportedProtocol(u8),

    #[error("Unsupported codec 0x{0:02x}, only PCM is handled")]
    UnsupportedCodec(u8),

    #[error("Unsupported bit depth code {0}, only 16 and 32 bit signed int are handled")]
    UnsupportedBitDepth(u8),

    #[error("Invalid sample rate index: {0}")]
    UnsupportedSampleRate(u8),

    #[error("Channel count cannot be 0")]
    BadChannelCount,

    #[error("Payload is {actual} bytes but the header declares {expected}")]
    BadPayloadLength { expected: usize, actual: usize },

    #[error("{stream}: sample rate mismatch, packet {packet} Hz vs engine {engine} Hz")]
    SampleRateMismatch {
        stream: String,
        packet: u32,
        engine: u32,
    },

    #[error("Stream name not found: {0}")]
    UnknownStream(String),
}

/// Socket lifecycle failures.
///
/// These are fatal for the receiving or sending endpoint and are surfaced
/// to the caller of `start`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    Bind(std::io::Error),

    #[error("Failed to set socket option: {0}")]
    SocketOption(std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(std::io::Error),

    #[error("Send failed: {0}")]
    Send(std::io::Error),

    #[error("Failed to spawn receive thread: {0}")]
    Thread(std::io::Error),

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),
}

/// Structural configuration failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{stream}: received {actual} channels but expected {expected}")]
    ChannelMismatch {
        stream: String,
        expected: usize,
        actual: usize,
    },

    #[error("Sample rate {0} Hz has no VBAN rate code")]
    UnsupportedSampleRate(u32),

    #[error("Stream name '{0}' does not fit in 16 bytes")]
    StreamNameTooLong(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
