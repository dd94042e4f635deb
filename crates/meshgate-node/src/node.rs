//! Core Node struct and the cooperative main loop.
//!
//! The node owns the forwarding engine, the link manager, the packet id
//! allocator, and every started driver. One loop drains driver receive
//! bridges into the engine, executes the resulting actions against the
//! drivers, and runs the timer sweeps. Nothing outside this loop
//! mutates routing or link state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use meshgate_core::constants::ContextType;
use meshgate_core::framing::kiss::{KissDecoder, kiss_frame};
use meshgate_core::types::{DestinationHash, NodeAddress};
use meshgate_interfaces::channel::ChannelDriver;
use meshgate_interfaces::traits::Driver;
use meshgate_interfaces::udp::UdpDriver;
use meshgate_interfaces::{InterfaceError, InterfaceTag, Locator};
use meshgate_link::{LinkAction, LinkManager, LinkState};
use meshgate_routing::constants::{ANNOUNCE_JITTER_MAX_MS, ANNOUNCE_JITTER_MIN_MS};
use meshgate_routing::{EngineAction, ForwardingEngine};

use crate::NodeError;
use crate::config::NodeConfig;
use crate::identity;
use crate::packet_id::{CounterSink, PacketIdAllocator};
use crate::storage::{NodeState, Storage};

/// Main loop cadence; all protocol timers are deadline-based and only
/// need to be observed this often.
const TICK_INTERVAL_MS: u64 = 250;

/// Depth of the bounded queue between driver receive bridges and the
/// main loop. Drivers block (and shed) when the loop falls behind.
const EVENT_QUEUE_DEPTH: usize = 512;

/// One started driver of any concrete type.
pub enum AnyDriver {
    Udp(UdpDriver),
    Channel(ChannelDriver),
}

impl AnyDriver {
    pub fn name(&self) -> &str {
        match self {
            AnyDriver::Udp(d) => d.name(),
            AnyDriver::Channel(d) => d.name(),
        }
    }

    pub fn tag(&self) -> InterfaceTag {
        match self {
            AnyDriver::Udp(d) => d.tag(),
            AnyDriver::Channel(d) => d.tag(),
        }
    }

    pub fn is_up(&self) -> bool {
        match self {
            AnyDriver::Udp(d) => d.is_up(),
            AnyDriver::Channel(d) => d.is_up(),
        }
    }

    pub fn has_peer(&self, locator: &Locator) -> bool {
        match self {
            AnyDriver::Udp(d) => d.has_peer(locator),
            AnyDriver::Channel(d) => d.has_peer(locator),
        }
    }

    pub fn add_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.add_peer(locator),
            AnyDriver::Channel(d) => d.add_peer(locator),
        }
    }

    pub fn remove_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.remove_peer(locator),
            AnyDriver::Channel(d) => d.remove_peer(locator),
        }
    }

    pub async fn start(&mut self) -> Result<(), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.start().await,
            AnyDriver::Channel(d) => d.start().await,
        }
    }

    pub async fn stop(&self) -> Result<(), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.stop().await,
            AnyDriver::Channel(d) => d.stop().await,
        }
    }

    pub async fn send(&self, raw: &[u8], locator: Option<&Locator>) -> Result<(), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.send(raw, locator).await,
            AnyDriver::Channel(d) => d.send(raw, locator).await,
        }
    }

    pub async fn receive(&self) -> Result<(Vec<u8>, Locator), InterfaceError> {
        match self {
            AnyDriver::Udp(d) => d.receive().await,
            AnyDriver::Channel(d) => d.receive().await,
        }
    }
}

/// Events surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Unreliable single/group-destination data addressed to this node.
    /// The official wire form carries no authenticated source.
    Datagram {
        destination: DestinationHash,
        context: ContextType,
        data: Vec<u8>,
    },
    /// A reliable payload delivered in order over a link.
    Reliable {
        source: NodeAddress,
        data: Vec<u8>,
    },
    /// A link left the established world; pending sends are gone.
    LinkClosed { peer: NodeAddress },
}

/// Handle for requesting shutdown from signal handlers.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

/// A received chunk from one driver, pending classification.
struct RxEvent {
    driver: usize,
    bytes: Vec<u8>,
    locator: Locator,
}

/// A resolved transmission (or peer-table edit) ready for the drivers.
enum WireOp {
    Unicast {
        interface: InterfaceTag,
        locator: Locator,
        raw: Vec<u8>,
        link_peer: Option<NodeAddress>,
    },
    Flood {
        exclude: Option<InterfaceTag>,
        raw: Vec<u8>,
        link_peer: Option<NodeAddress>,
    },
    Release {
        interface: InterfaceTag,
        locator: Locator,
    },
}

/// Persists the packet counter through storage, off the hot path.
struct StorageSink {
    storage: Arc<Storage>,
    address: NodeAddress,
}

impl CounterSink for StorageSink {
    fn persist(&mut self, value: u16) {
        let storage = Arc::clone(&self.storage);
        let state = NodeState {
            address: self.address,
            packet_counter: value,
        };
        tokio::spawn(async move {
            // In-memory state stays authoritative; a failed commit is
            // retried at the next flush.
            if let Err(e) = storage.save_state(state).await {
                warn!(error = %e, "failed to persist packet counter");
            }
        });
    }
}

/// Sink for storage-less operation (tests, RAM-only deployments).
struct NullSink;

impl CounterSink for NullSink {
    fn persist(&mut self, _value: u16) {}
}

/// A running gateway node.
pub struct Node {
    config: NodeConfig,
    address: NodeAddress,
    engine: ForwardingEngine,
    links: LinkManager,
    ids: PacketIdAllocator,
    drivers: Vec<Arc<AnyDriver>>,
    decoders: HashMap<usize, KissDecoder>,
    event_tx: mpsc::Sender<RxEvent>,
    event_rx: mpsc::Receiver<RxEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    app_handler: Option<Box<dyn FnMut(AppEvent) + Send>>,
    started_at: Instant,
}

impl Node {
    /// Load (or mint) the node identity and assemble the protocol
    /// stack. Drivers are attached separately by [`Node::start`].
    pub async fn bootstrap(config: NodeConfig) -> Result<Self, NodeError> {
        let override_address = config.address_override()?;

        let (state, sink): (NodeState, Box<dyn CounterSink>) = if config.node.enable_storage {
            let storage = match &config.node.storage_path {
                Some(path) => Storage::new(path.into())?,
                None => Storage::default_path()?,
            };
            let storage = Arc::new(storage);
            let mut state = identity::load_or_generate(&storage).await?;
            if let Some(address) = override_address {
                state.address = address;
            }
            let sink = Box::new(StorageSink {
                storage,
                address: state.address,
            });
            (state, sink)
        } else {
            let state = NodeState {
                address: override_address.unwrap_or_else(identity::generate_address),
                packet_counter: 0,
            };
            (state, Box::new(NullSink))
        };

        let ids = PacketIdAllocator::resume(
            state.packet_counter,
            config.node.packet_id_save_interval,
            sink,
        );

        let jitter = rand::rng().random_range(ANNOUNCE_JITTER_MIN_MS..=ANNOUNCE_JITTER_MAX_MS);
        let engine = ForwardingEngine::new(state.address, config.engine_config()?, 0, jitter);
        let links = LinkManager::new(state.address, config.link_config());

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(address = %state.address, "node bootstrapped");
        Ok(Self {
            config,
            address: state.address,
            engine,
            links,
            ids,
            drivers: Vec::new(),
            decoders: HashMap::new(),
            event_tx,
            event_rx,
            shutdown_tx,
            shutdown_rx,
            app_handler: None,
            started_at: Instant::now(),
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Register the application-layer callback.
    pub fn set_app_handler(&mut self, handler: impl FnMut(AppEvent) + Send + 'static) {
        self.app_handler = Some(Box::new(handler));
    }

    /// Observable state of the link to `destination`.
    pub fn link_state(&self, destination: &NodeAddress) -> LinkState {
        self.links.link_state(destination)
    }

    /// Start every configured driver.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        for udp in self.config.udp_configs()? {
            self.attach(AnyDriver::Udp(UdpDriver::new(udp))).await?;
        }
        Ok(())
    }

    /// Start one driver and bridge its receive path into the loop.
    pub async fn attach(&mut self, mut driver: AnyDriver) -> Result<(), NodeError> {
        driver.start().await?;

        let index = self.drivers.len();
        if driver.tag().is_character_oriented() {
            self.decoders.insert(index, KissDecoder::new());
        }

        let driver = Arc::new(driver);
        let bridge = Arc::clone(&driver);
        let tx = self.event_tx.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = bridge.receive() => match result {
                        Ok((bytes, locator)) => {
                            if tx
                                .send(RxEvent { driver: index, bytes, locator })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        info!(driver = driver.name(), "driver attached");
        self.drivers.push(driver);
        Ok(())
    }

    /// Request a reliable send to `destination`.
    ///
    /// Returns false while the link is still establishing (retry once
    /// [`Node::link_state`] reports ESTABLISHED), when the window is
    /// full, or when admission fails.
    pub async fn send_reliable(&mut self, destination: NodeAddress, data: Vec<u8>) -> bool {
        let now = self.now_ms();
        let mut ops = Vec::new();
        let accepted =
            match self.links.send_reliable(destination, data, &mut self.ids, now) {
                Ok(outcome) => {
                    self.resolve_link(outcome.actions, now, &mut ops);
                    outcome.accepted
                }
                Err(e) => {
                    warn!(destination = %destination, error = %e, "reliable send refused");
                    false
                }
            };
        self.transmit(ops, now).await;
        accepted
    }

    /// Run the main loop until shutdown is requested.
    pub async fn run(&mut self) {
        let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        info!(address = %self.address, drivers = self.drivers.len(), "node running");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break,
                Some(event) = self.event_rx.recv() => self.on_receive(event).await,
                _ = tick.tick() => self.on_tick().await,
            }
        }
        info!("node loop exited");
    }

    /// Stop drivers and release the loop's resources.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for driver in &self.drivers {
            if let Err(e) = driver.stop().await {
                warn!(driver = driver.name(), error = %e, "driver stop failed");
            }
        }
    }

    /// Milliseconds since the node was bootstrapped; the time base for
    /// every protocol deadline.
    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    async fn on_receive(&mut self, event: RxEvent) {
        let now = self.now_ms();
        let tag = self.drivers[event.driver].tag();

        // Character transports hand us raw stream chunks; run them
        // through the per-driver KISS decoder first.
        let frames = match self.decoders.get_mut(&event.driver) {
            Some(decoder) => decoder.feed(&event.bytes),
            None => vec![event.bytes],
        };

        let mut ops = Vec::new();
        for frame in frames {
            let actions = self.engine.ingest(&frame, tag, event.locator.clone(), now);
            self.resolve(actions, now, &mut ops);
        }
        self.transmit(ops, now).await;
    }

    async fn on_tick(&mut self) {
        let now = self.now_ms();
        let mut ops = Vec::new();

        let link_actions = self.links.sweep(&mut self.ids, now);
        self.resolve_link(link_actions, now, &mut ops);

        let engine_actions = self.engine.tick(now, &mut self.ids);
        self.resolve(engine_actions, now, &mut ops);

        self.transmit(ops, now).await;
    }

    /// Turn engine actions into wire operations, dispatching link
    /// traffic and local deliveries along the way.
    fn resolve(&mut self, actions: Vec<EngineAction>, now: u64, ops: &mut Vec<WireOp>) {
        for action in actions {
            match action {
                EngineAction::Transmit {
                    interface,
                    locator,
                    raw,
                } => ops.push(WireOp::Unicast {
                    interface,
                    locator,
                    raw,
                    link_peer: None,
                }),
                EngineAction::Broadcast { exclude, raw } => ops.push(WireOp::Flood {
                    exclude,
                    raw,
                    link_peer: None,
                }),
                EngineAction::DeliverLocal {
                    destination,
                    context,
                    data,
                } => self.deliver_app(AppEvent::Datagram {
                    destination,
                    context,
                    data,
                }),
                EngineAction::LinkInbound { frame, .. } => {
                    let link_actions = self.links.handle_frame(&frame, &mut self.ids, now);
                    self.resolve_link(link_actions, now, ops);
                }
                EngineAction::ReliableSend { destination, data } => {
                    match self.links.send_reliable(destination, data, &mut self.ids, now) {
                        Ok(outcome) => {
                            if !outcome.accepted {
                                debug!(
                                    destination = %destination,
                                    state = ?self.links.link_state(&destination),
                                    "reliable send deferred until link establishes"
                                );
                            }
                            self.resolve_link(outcome.actions, now, ops);
                        }
                        Err(e) => {
                            warn!(destination = %destination, error = %e, "reliable send refused");
                        }
                    }
                }
                EngineAction::ReleasePeer { interface, locator } => {
                    ops.push(WireOp::Release { interface, locator });
                }
            }
        }
    }

    /// Turn link actions into wire operations via the engine's routed
    /// send path.
    fn resolve_link(&mut self, actions: Vec<LinkAction>, _now: u64, ops: &mut Vec<WireOp>) {
        for action in actions {
            match action {
                LinkAction::SendFrame { destination, raw } => {
                    match self.engine.outbound(&destination, raw, None) {
                        EngineAction::Transmit {
                            interface,
                            locator,
                            raw,
                        } => ops.push(WireOp::Unicast {
                            interface,
                            locator,
                            raw,
                            link_peer: Some(destination),
                        }),
                        EngineAction::Broadcast { exclude, raw } => ops.push(WireOp::Flood {
                            exclude,
                            raw,
                            link_peer: Some(destination),
                        }),
                        // outbound only ever produces a send.
                        _ => {}
                    }
                }
                LinkAction::Deliver { source, data } => {
                    self.deliver_app(AppEvent::Reliable { source, data });
                }
                LinkAction::Closed {
                    destination,
                    reason,
                } => {
                    info!(peer = %destination, ?reason, "link closed");
                    self.deliver_app(AppEvent::LinkClosed { peer: destination });
                }
            }
        }
    }

    fn deliver_app(&mut self, event: AppEvent) {
        match &mut self.app_handler {
            Some(handler) => handler(event),
            None => debug!("no application handler registered, dropping event"),
        }
    }

    async fn transmit(&mut self, ops: Vec<WireOp>, now: u64) {
        for op in ops {
            match op {
                WireOp::Unicast {
                    interface,
                    locator,
                    raw,
                    link_peer,
                } => {
                    let Some(driver) = self.driver_for(interface) else {
                        warn!(%interface, "no driver for routed transmit");
                        if let Some(peer) = link_peer {
                            self.links.on_send_error(&peer, now);
                        }
                        continue;
                    };
                    // Direct sends on peer-table transports need the
                    // next hop admitted first.
                    if locator.holds_peer_slot()
                        && !driver.has_peer(&locator)
                        && let Err(e) = driver.add_peer(&locator)
                    {
                        debug!(driver = driver.name(), %locator, error = %e, "peer admit failed");
                    }
                    let payload = frame_for(interface, raw);
                    let target = match &locator {
                        Locator::None => None,
                        other => Some(other),
                    };
                    if let Err(e) = driver.send(&payload, target).await {
                        warn!(driver = driver.name(), error = %e, "unicast send failed");
                        if let Some(peer) = link_peer {
                            self.links.on_send_error(&peer, now);
                        }
                    }
                }
                WireOp::Flood {
                    exclude,
                    raw,
                    link_peer,
                } => {
                    let targets: Vec<Arc<AnyDriver>> = self
                        .drivers
                        .iter()
                        .filter(|d| d.is_up() && Some(d.tag()) != exclude)
                        .cloned()
                        .collect();
                    let mut any_sent = false;
                    for driver in targets {
                        let payload = frame_for(driver.tag(), raw.clone());
                        match driver.send(&payload, None).await {
                            Ok(()) => any_sent = true,
                            Err(e) => {
                                warn!(driver = driver.name(), error = %e, "broadcast send failed");
                            }
                        }
                    }
                    if !any_sent && let Some(peer) = link_peer {
                        self.links.on_send_error(&peer, now);
                    }
                }
                WireOp::Release { interface, locator } => {
                    if let Some(driver) = self.driver_for(interface) {
                        let _ = driver.remove_peer(&locator);
                    }
                }
            }
        }
    }

    fn driver_for(&self, tag: InterfaceTag) -> Option<Arc<AnyDriver>> {
        self.drivers
            .iter()
            .find(|d| d.tag() == tag && d.is_up())
            .cloned()
    }
}

/// Apply KISS framing for character-oriented transports.
fn frame_for(tag: InterfaceTag, raw: Vec<u8>) -> Vec<u8> {
    if tag.is_character_oriented() {
        kiss_frame(&raw)
    } else {
        raw
    }
}
