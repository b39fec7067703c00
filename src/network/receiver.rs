//! UDP receive loop
//!
//! Owns the bound socket and a dedicated receive thread that drains it into
//! one reusable buffer, fanning each datagram out to the registered
//! listeners. Listeners run synchronously on the receive thread and must
//! return within tens of microseconds.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use crate::config::NetworkConfig;
use crate::error::TransportError;
use crate::protocol::VBAN_PACKET_MAX_SIZE;

/// Receives raw datagrams from a [`VbanUdpReceiver`].
///
/// Invoked on the receive thread; implementations must not block.
pub trait PacketListener: Send + Sync {
    fn packet_received(&self, data: &[u8], source: SocketAddr);
}

/// Counters kept by the receive loop
#[derive(Debug, Default)]
struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    oversized_packets: AtomicU64,
}

/// Receiver statistics snapshot
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub oversized_packets: u64,
}

/// UDP server owning the VBAN ingress socket and its receive thread.
pub struct VbanUdpReceiver {
    config: NetworkConfig,
    listeners: Arc<Mutex<Vec<Arc<dyn PacketListener>>>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<TransportError>>,
    local_addr: Option<SocketAddr>,
}

impl VbanUdpReceiver {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listeners: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            local_addr: None,
        }
    }

    /// Register a listener for incoming datagrams.
    ///
    /// The listener list is read under the same mutex on the receive
    /// thread, so dispatch order follows registration order.
    pub fn add_listener(&self, listener: Arc<dyn PacketListener>) {
        self.listeners.lock().push(listener);
    }

    /// Unregister a previously added listener
    pub fn remove_listener(&self, listener: &Arc<dyn PacketListener>) {
        self.listeners
            .lock()
            .retain(|candidate| !Arc::ptr_eq(candidate, listener));
    }

    /// Bind the socket and spawn the receive thread.
    ///
    /// Binds to the configured address (empty = any local address) and
    /// port, applies the configured receive buffer size, and asks for
    /// realtime priority on the receive thread. Calling `start` while
    /// already running is a no-op.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let address: Ipv4Addr = if self.config.bind_address.is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            self.config
                .bind_address
                .parse()
                .map_err(|_| TransportError::InvalidAddress(self.config.bind_address.clone()))?
        };

        let socket =
            UdpSocket::bind((address, self.config.port)).map_err(TransportError::Bind)?;
        set_receive_buffer_size(&socket, self.config.receive_buffer_size)
            .map_err(TransportError::SocketOption)?;
        // A finite read timeout lets the loop observe the running flag;
        // plain std sockets cannot be closed out from under a blocked recv.
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(TransportError::SocketOption)?;

        self.local_addr = socket.local_addr().ok();
        tracing::info!(port = self.config.port, "VBAN receiver listening");

        let (error_tx, error_rx) = bounded::<TransportError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let listeners = self.listeners.clone();
        let counters = self.counters.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("vban-udp-recv".to_string())
            .spawn(move || {
                super::rt::promote_current_thread();

                // One extra byte so a datagram above the VBAN maximum is
                // detectable; recv_from truncates without telling us.
                let mut buffer = vec![0u8; VBAN_PACKET_MAX_SIZE + 1];

                while running.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buffer) {
                        Ok((0, _)) => {}
                        Ok((len, source)) => {
                            if len > VBAN_PACKET_MAX_SIZE {
                                counters.oversized_packets.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(len, "dropping oversized datagram");
                                continue;
                            }
                            counters.packets_received.fetch_add(1, Ordering::Relaxed);
                            counters
                                .bytes_received
                                .fetch_add(len as u64, Ordering::Relaxed);

                            let listeners = listeners.lock();
                            for listener in listeners.iter() {
                                listener.packet_received(&buffer[..len], source);
                            }
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut
                                || e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::error!("receive failed: {}", e);
                            let _ = error_tx.try_send(TransportError::Receive(e));
                            // Transient by assumption; back off briefly and
                            // keep the socket.
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                TransportError::Thread(e)
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the receive thread and release the socket
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the socket is bound to while running; useful when the
    /// configured port is 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Most recent transport error from the receive thread, if any
    pub fn check_errors(&self) -> Option<TransportError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            oversized_packets: self.counters.oversized_packets.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VbanUdpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn set_receive_buffer_size(socket: &UdpSocket, size: usize) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let value = size as libc::c_int;
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_receive_buffer_size(_socket: &UdpSocket, _size: usize) -> std::io::Result<()> {
    Ok(())
}
