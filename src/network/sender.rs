//! UDP client for outgoing VBAN packets

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::error::TransportError;

/// Socket connected to one VBAN destination.
///
/// `send` is called from the audio callback through the stream sender, so
/// it does nothing but a non-blocking datagram submit.
pub struct VbanUdpSender {
    socket: UdpSocket,
    target: SocketAddr,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl VbanUdpSender {
    /// Open an ephemeral local socket connected to `target`
    pub fn connect(target: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(TransportError::Bind)?;
        socket.connect(target).map_err(TransportError::Bind)?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::SocketOption)?;

        Ok(Self {
            socket,
            target,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Submit one assembled datagram
    pub fn send(&self, packet: &Bytes) -> Result<(), TransportError> {
        match self.socket.send(packet) {
            Ok(_) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent
                    .fetch_add(packet.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            // A full send queue means the kernel is shedding load; VBAN is
            // best effort, the packet is simply gone.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::Send(e)),
        }
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Sender statistics snapshot
#[derive(Debug, Clone)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sends_to_target() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = receiver.local_addr().unwrap();

        let sender = VbanUdpSender::connect(target).unwrap();
        sender.send(&Bytes::from_static(b"payload")).unwrap();

        let mut buf = [0u8; 64];
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"payload");

        let stats = sender.stats();
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.bytes_sent, 7);
    }
}
