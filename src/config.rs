//! Configuration types

use serde::{Deserialize, Serialize};

use crate::protocol::SampleFormat;

/// UDP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local IPv4 address to bind to; empty binds to any local address
    pub bind_address: String,
    /// UDP port to listen on
    pub port: u16,
    /// Socket receive buffer size (SO_RCVBUF) in bytes
    pub receive_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            port: crate::constants::DEFAULT_UDP_PORT,
            receive_buffer_size: crate::constants::DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }
}

/// Receiving side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub network: NetworkConfig,
    /// Circular buffer capacity in samples per channel per stream
    pub capacity: usize,
    /// Upper bound for drift-compensated latency in samples
    pub max_latency_samples: i64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            capacity: crate::constants::DEFAULT_CIRCULAR_CAPACITY,
            max_latency_samples: crate::constants::MAX_LATENCY_SAMPLES,
        }
    }
}

/// Sending side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Stream name announced in every packet, at most 16 bytes
    pub stream_name: String,
    /// Sample encoding for the wire
    #[serde(with = "sample_format_serde")]
    pub format: SampleFormat,
    /// Frames accumulated per packet; clamped so the payload fits the
    /// maximum datagram size at the configured channel count
    pub frames_per_packet: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            stream_name: "Stream1".to_string(),
            format: SampleFormat::Int16,
            frames_per_packet: crate::protocol::MAX_FRAMES_PER_PACKET,
        }
    }
}

mod sample_format_serde {
    use super::SampleFormat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(format: &SampleFormat, s: S) -> Result<S::Ok, S::Error> {
        let bits: u8 = match format {
            SampleFormat::Int16 => 16,
            SampleFormat::Int32 => 32,
        };
        bits.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SampleFormat, D::Error> {
        match u8::deserialize(d)? {
            16 => Ok(SampleFormat::Int16),
            32 => Ok(SampleFormat::Int32),
            other => Err(serde::de::Error::custom(format!(
                "unsupported bit depth: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReceiverConfig::default();
        assert_eq!(config.network.port, 13251);
        assert_eq!(config.network.receive_buffer_size, 1_000_000);
        assert!(config.network.bind_address.is_empty());
        assert_eq!(config.capacity, 8192);
        assert_eq!(config.max_latency_samples, 2048);
    }

    #[test]
    fn test_sender_format_serde() {
        let config = SenderConfig {
            format: SampleFormat::Int32,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SenderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.format, SampleFormat::Int32);
    }
}
