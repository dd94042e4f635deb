//! In-memory channel driver.
//!
//! A pair of connected drivers backed by tokio channels, used by node
//! and integration tests as a stand-in for real transports. Carries an
//! optional bounded peer allowlist so peer-release plumbing can be
//! exercised without radio hardware.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use meshgate_routing::interface::{InterfaceTag, Locator};

use crate::error::InterfaceError;
use crate::traits::Driver;

const CHANNEL_DEPTH: usize = 256;

/// One end of an in-memory transport.
pub struct ChannelDriver {
    name: String,
    tag: InterfaceTag,
    /// How the remote end sees us.
    local_locator: Locator,
    tx: mpsc::Sender<(Vec<u8>, Locator)>,
    rx: Mutex<mpsc::Receiver<(Vec<u8>, Locator)>>,
    online: AtomicBool,
    peers: StdMutex<HashSet<Locator>>,
    max_peers: usize,
}

impl ChannelDriver {
    /// Build two connected ends. `locator_a`/`locator_b` are the
    /// locators each end stamps on its outgoing packets.
    pub fn pair(
        tag: InterfaceTag,
        locator_a: Locator,
        locator_b: Locator,
        max_peers: usize,
    ) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::channel(CHANNEL_DEPTH);
        let (tx_ba, rx_ba) = mpsc::channel(CHANNEL_DEPTH);

        let a = Self {
            name: format!("chan-a[{tag}]"),
            tag,
            local_locator: locator_a,
            tx: tx_ab,
            rx: Mutex::new(rx_ba),
            online: AtomicBool::new(false),
            peers: StdMutex::new(HashSet::new()),
            max_peers,
        };
        let b = Self {
            name: format!("chan-b[{tag}]"),
            tag,
            local_locator: locator_b,
            tx: tx_ba,
            rx: Mutex::new(rx_ab),
            online: AtomicBool::new(false),
            peers: StdMutex::new(HashSet::new()),
            max_peers,
        };
        (a, b)
    }
}

impl Driver for ChannelDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> InterfaceTag {
        self.tag
    }

    fn is_up(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn broadcast_locator(&self) -> Locator {
        Locator::None
    }

    fn add_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        let mut peers = self.peers.lock().expect("peer table lock");
        if peers.contains(locator) {
            return Ok(());
        }
        if peers.len() >= self.max_peers {
            return Err(InterfaceError::PeerTableFull);
        }
        peers.insert(locator.clone());
        Ok(())
    }

    fn remove_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        self.peers.lock().expect("peer table lock").remove(locator);
        Ok(())
    }

    fn has_peer(&self, locator: &Locator) -> bool {
        self.peers.lock().expect("peer table lock").contains(locator)
    }

    async fn start(&mut self) -> Result<(), InterfaceError> {
        self.online.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), InterfaceError> {
        self.online.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, raw: &[u8], _locator: Option<&Locator>) -> Result<(), InterfaceError> {
        if !self.is_up() {
            return Err(InterfaceError::NotStarted);
        }
        self.tx
            .send((raw.to_vec(), self.local_locator.clone()))
            .await
            .map_err(|_| InterfaceError::Stopped)
    }

    async fn receive(&self) -> Result<(Vec<u8>, Locator), InterfaceError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(InterfaceError::Stopped)
    }
}
