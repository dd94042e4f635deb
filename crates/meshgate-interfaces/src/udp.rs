//! UDP datagram driver.
//!
//! Datagrams are atomic, so there is no framing, no connection state,
//! and no reconnection logic. A background read loop bridges received
//! datagrams into a channel the node loop drains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use meshgate_routing::interface::{InterfaceTag, Locator};

use crate::error::InterfaceError;
use crate::traits::Driver;

/// Size of the receive buffer for `UdpSocket::recv_from`.
const UDP_RECV_BUFFER: usize = 2048;

/// Depth of the receive bridge between the read loop and the node loop.
const UDP_RX_QUEUE: usize = 256;

/// Configuration for a [`UdpDriver`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Human-readable name for this driver.
    pub name: String,
    /// Local address to bind the UDP socket to.
    pub bind_addr: SocketAddr,
    /// Address used when no peer locator is known (typically the subnet
    /// broadcast address and the mesh port).
    pub broadcast_addr: SocketAddr,
    /// Whether to enable `SO_BROADCAST` on the socket.
    pub broadcast: bool,
}

impl UdpConfig {
    /// Config for a broadcast mesh segment.
    pub fn broadcast(
        name: impl Into<String>,
        bind_addr: SocketAddr,
        broadcast_addr: SocketAddr,
    ) -> Self {
        Self {
            name: name.into(),
            bind_addr,
            broadcast_addr,
            broadcast: true,
        }
    }

    /// Config for a point-to-point segment (tests, tunnels).
    pub fn unicast(
        name: impl Into<String>,
        bind_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            name: name.into(),
            bind_addr,
            broadcast_addr: peer_addr,
            broadcast: false,
        }
    }
}

/// A UDP driver that sends and receives raw datagrams.
pub struct UdpDriver {
    config: UdpConfig,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    rx_receiver: Mutex<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
    rx_sender: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    online: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UdpDriver {
    pub fn new(config: UdpConfig) -> Self {
        let (rx_sender, rx_receiver) = mpsc::channel(UDP_RX_QUEUE);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            config,
            socket: Mutex::new(None),
            rx_receiver: Mutex::new(rx_receiver),
            rx_sender,
            online: AtomicBool::new(false),
            stop_tx,
            stop_rx,
            task_handle: Mutex::new(None),
        }
    }

    /// Run the receive loop: read datagrams into the bridge channel.
    async fn read_loop(
        socket: Arc<UdpSocket>,
        tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
        mut stop_rx: watch::Receiver<bool>,
        name: String,
    ) {
        let mut buf = vec![0u8; UDP_RECV_BUFFER];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, src)) => {
                            debug!("{name}: received {n} bytes from {src}");
                            if tx.send((buf[..n].to_vec(), src)).await.is_err() {
                                // Receiver dropped; stop.
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("{name}: recv error: {e}");
                            // UDP errors are typically transient; keep
                            // going unless we are stopping.
                            if *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    break;
                }
            }
        }
    }
}

impl Driver for UdpDriver {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn tag(&self) -> InterfaceTag {
        InterfaceTag::IpDatagram
    }

    fn is_up(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn broadcast_locator(&self) -> Locator {
        Locator::Socket(self.config.broadcast_addr)
    }

    async fn start(&mut self) -> Result<(), InterfaceError> {
        let socket = UdpSocket::bind(self.config.bind_addr).await?;

        if self.config.broadcast {
            socket.set_broadcast(true)?;
        }

        info!(
            "{}: bound to {}",
            self.config.name,
            socket.local_addr().unwrap_or(self.config.bind_addr)
        );

        let socket = Arc::new(socket);
        *self.socket.lock().await = Some(Arc::clone(&socket));
        self.online.store(true, Ordering::SeqCst);

        let sock = Arc::clone(&socket);
        let tx = self.rx_sender.clone();
        let stop_rx = self.stop_rx.clone();
        let name = self.config.name.clone();

        let handle = tokio::spawn(async move {
            Self::read_loop(sock, tx, stop_rx, name).await;
        });
        *self.task_handle.lock().await = Some(handle);

        Ok(())
    }

    async fn stop(&self) -> Result<(), InterfaceError> {
        let _ = self.stop_tx.send(true);
        self.online.store(false, Ordering::SeqCst);

        // Clear the socket to unblock any pending recv.
        *self.socket.lock().await = None;

        // Wait for the read loop to finish.
        let handle = self.task_handle.lock().await.take();
        if let Some(h) = handle {
            let _ = h.await;
        }

        Ok(())
    }

    async fn send(&self, raw: &[u8], locator: Option<&Locator>) -> Result<(), InterfaceError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(InterfaceError::NotStarted);
        }

        let target = match locator {
            Some(Locator::Socket(addr)) => *addr,
            Some(other) => {
                return Err(InterfaceError::Configuration(format!(
                    "udp driver cannot address locator {other}"
                )));
            }
            None => self.config.broadcast_addr,
        };

        // Brief lock to clone the Arc; no I/O under the lock.
        let socket = {
            let guard = self.socket.lock().await;
            guard.as_ref().ok_or(InterfaceError::NotStarted)?.clone()
        };

        let sent = socket.send_to(raw, target).await?;
        if sent != raw.len() {
            return Err(InterfaceError::TransmitFailed(format!(
                "sent {} of {} bytes",
                sent,
                raw.len()
            )));
        }

        Ok(())
    }

    async fn receive(&self) -> Result<(Vec<u8>, Locator), InterfaceError> {
        let mut rx = self.rx_receiver.lock().await;
        let (data, src) = rx.recv().await.ok_or(InterfaceError::Stopped)?;
        Ok((data, Locator::Socket(src)))
    }
}
