//! The forwarding engine.
//!
//! Classifies every inbound packet and decides its disposition: deliver
//! to this node, hand to the link sublayer, re-broadcast as an
//! announce, or relay toward its destination. The engine performs no
//! I/O and reads no clocks; callers pass `now` in and execute the
//! returned [`EngineAction`]s.

use meshgate_core::constants::{ADDRESS_SIZE, ContextType, DestinationType, PacketType,
    PropagationType};
use meshgate_core::packet::flags::PacketFlags;
use meshgate_core::packet::legacy::LinkFrame;
use meshgate_core::packet::wire::Packet;
use meshgate_core::types::{DestinationHash, NodeAddress, PacketIdSource};
use tracing::{debug, info, trace, warn};

use crate::constants::{
    ANNOUNCE_INTERVAL_MS, MAX_RECENT_ANNOUNCES, MAX_ROUTES, PRUNE_INTERVAL_MS,
    RECENT_ANNOUNCE_WINDOW_MS, ROUTE_TTL_MS,
};
use crate::interface::{InterfaceTag, Locator};
use crate::recent::RecentAnnounces;
use crate::table::RouteTable;

/// Something the node loop must do on the engine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Send on one specific interface toward a known next hop.
    Transmit {
        interface: InterfaceTag,
        locator: Locator,
        raw: Vec<u8>,
    },
    /// Send on every enabled interface except the excluded one.
    Broadcast {
        exclude: Option<InterfaceTag>,
        raw: Vec<u8>,
    },
    /// Unreliable data addressed to this node.
    DeliverLocal {
        destination: DestinationHash,
        context: ContextType,
        data: Vec<u8>,
    },
    /// A link-sublayer frame addressed to this node.
    LinkInbound {
        frame: LinkFrame,
        interface: InterfaceTag,
    },
    /// A local command requesting a reliable send.
    ReliableSend {
        destination: NodeAddress,
        data: Vec<u8>,
    },
    /// A displaced or expired route's peer slot should be released.
    ReleasePeer {
        interface: InterfaceTag,
        locator: Locator,
    },
}

/// Engine tunables. All intervals are milliseconds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_hops: u8,
    pub announce_interval: u64,
    pub route_ttl: u64,
    pub prune_interval: u64,
    pub recent_window: u64,
    pub max_recent_announces: usize,
    pub max_routes: usize,
    /// 8-byte group prefixes this node delivers locally.
    pub subscribed_groups: Vec<NodeAddress>,
    /// Short version tag appended to self-announce payloads.
    pub announce_tag: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: meshgate_core::constants::MAX_HOPS,
            announce_interval: ANNOUNCE_INTERVAL_MS,
            route_ttl: ROUTE_TTL_MS,
            prune_interval: PRUNE_INTERVAL_MS,
            recent_window: RECENT_ANNOUNCE_WINDOW_MS,
            max_recent_announces: MAX_RECENT_ANNOUNCES,
            max_routes: MAX_ROUTES,
            subscribed_groups: Vec::new(),
            announce_tag: Vec::new(),
        }
    }
}

/// Sans-I/O packet classifier and router.
#[must_use]
pub struct ForwardingEngine {
    address: NodeAddress,
    config: EngineConfig,
    routes: RouteTable,
    recent: RecentAnnounces,
    next_announce_at: u64,
    next_prune_at: u64,
}

impl ForwardingEngine {
    /// `announce_jitter` delays the first self-announce so a cohort
    /// booting together does not announce in lockstep.
    pub fn new(address: NodeAddress, config: EngineConfig, now: u64, announce_jitter: u64) -> Self {
        let routes = RouteTable::new(config.max_routes);
        let recent = RecentAnnounces::new(config.max_recent_announces);
        let next_prune_at = now + config.prune_interval;
        Self {
            address,
            config,
            routes,
            recent,
            next_announce_at: now + announce_jitter,
            next_prune_at,
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Main ingress: one received packet, in either wire dialect.
    pub fn ingest(
        &mut self,
        raw: &[u8],
        interface: InterfaceTag,
        sender: Locator,
        now: u64,
    ) -> Vec<EngineAction> {
        if LinkFrame::looks_like(raw) {
            return self.ingest_link_frame(raw, interface);
        }

        let packet = match Packet::parse(raw) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, %interface, "dropping undecodable packet");
                return Vec::new();
            }
        };

        if packet.flags.packet_type == PacketType::Announce {
            self.ingest_announce(&packet, interface, sender, now)
        } else {
            self.ingest_data(packet, interface)
        }
    }

    /// The send path for locally originated packets (link frames and
    /// application data): routed unicast when a fresh route exists,
    /// otherwise a broadcast downgrade.
    pub fn outbound(
        &self,
        destination: &NodeAddress,
        raw: Vec<u8>,
        exclude: Option<InterfaceTag>,
    ) -> EngineAction {
        self.route_or_flood(destination, raw, exclude)
    }

    /// Deadline sweep: route prune and the periodic self-announce.
    pub fn tick(&mut self, now: u64, ids: &mut dyn PacketIdSource) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if now >= self.next_prune_at {
            for evicted in self.routes.prune(now, self.config.route_ttl) {
                if evicted.next_hop.holds_peer_slot() {
                    actions.push(EngineAction::ReleasePeer {
                        interface: evicted.interface,
                        locator: evicted.next_hop,
                    });
                }
            }
            self.recent.prune(now, self.config.recent_window);
            self.next_prune_at = now + self.config.prune_interval;
        }

        if now >= self.next_announce_at {
            let packet_id = ids.next_id();
            match self.self_announce(packet_id).serialize() {
                Ok(raw) => {
                    info!(packet_id, "broadcasting self announce");
                    actions.push(EngineAction::Broadcast { exclude: None, raw });
                }
                Err(e) => warn!(error = %e, "failed to serialize self announce"),
            }
            self.next_announce_at = now + self.config.announce_interval;
        }

        actions
    }

    /// Build this node's announce packet.
    ///
    /// The official header has no source field, so the announcer's
    /// address rides in the destination-hash field (zero-extended) and
    /// the packet id in the first two payload bytes.
    pub fn self_announce(&self, packet_id: u16) -> Packet {
        let mut data = Vec::with_capacity(2 + self.config.announce_tag.len());
        data.extend_from_slice(&packet_id.to_be_bytes());
        data.extend_from_slice(&self.config.announce_tag);
        Packet {
            flags: PacketFlags::plain(
                PacketType::Announce,
                DestinationType::Group,
                PropagationType::Broadcast,
            ),
            hops: 0,
            destination: self.address.widened(),
            context: ContextType::None,
            data,
        }
    }

    fn ingest_link_frame(&mut self, raw: &[u8], interface: InterfaceTag) -> Vec<EngineAction> {
        let frame = match LinkFrame::parse(raw) {
            Ok(f) => f,
            Err(e) => {
                trace!(error = %e, %interface, "dropping undecodable link frame");
                return Vec::new();
            }
        };

        if frame.source == self.address {
            return Vec::new();
        }
        if frame.destination == self.address {
            return vec![EngineAction::LinkInbound { frame, interface }];
        }

        // In transit between two other nodes: relay it.
        self.relay_link_frame(frame, interface)
    }

    fn relay_link_frame(&self, mut frame: LinkFrame, interface: InterfaceTag) -> Vec<EngineAction> {
        if frame.hops >= self.config.max_hops {
            return Vec::new();
        }
        frame.hops += 1;
        let destination = frame.destination;
        match frame.serialize() {
            Ok(raw) => vec![self.route_or_flood(&destination, raw, Some(interface))],
            Err(e) => {
                warn!(error = %e, "failed to re-serialize link frame for relay");
                Vec::new()
            }
        }
    }

    fn ingest_announce(
        &mut self,
        packet: &Packet,
        interface: InterfaceTag,
        sender: Locator,
        now: u64,
    ) -> Vec<EngineAction> {
        let Some(packet_id) = parse_announce_payload(&packet.data) else {
            trace!(%interface, "dropping announce with short payload");
            return Vec::new();
        };
        let source = packet.destination.prefix();

        // Our own announce echoed back through the mesh.
        if source == self.address {
            return Vec::new();
        }
        if packet.hops > self.config.max_hops {
            return Vec::new();
        }

        let mut actions = Vec::new();
        debug!(%source, hops = packet.hops, %interface, "announce heard");
        if let Some(evicted) = self
            .routes
            .observe(source, packet.hops, interface, sender, now)
            && evicted.next_hop.holds_peer_slot()
        {
            actions.push(EngineAction::ReleasePeer {
                interface: evicted.interface,
                locator: evicted.next_hop,
            });
        }

        // Re-broadcast, suppressed per (packet id, source prefix).
        if packet.hops >= self.config.max_hops - 1 {
            return actions;
        }
        if !self.recent.should_forward(packet_id, &source) {
            return actions;
        }
        self.recent
            .mark_forwarded(packet_id, &source, now, self.config.recent_window);

        let mut forwarded = packet.clone();
        forwarded.hops += 1;
        match forwarded.serialize() {
            Ok(raw) => actions.push(EngineAction::Broadcast { exclude: None, raw }),
            Err(e) => warn!(error = %e, "failed to re-serialize announce"),
        }
        actions
    }

    fn ingest_data(&mut self, packet: Packet, interface: InterfaceTag) -> Vec<EngineAction> {
        // A local command from the attached host requests a reliable
        // send: payload is [8-byte destination][application data].
        if packet.context == ContextType::LocalCommand
            && matches!(interface, InterfaceTag::Serial | InterfaceTag::Bluetooth)
        {
            if packet.data.len() < ADDRESS_SIZE {
                debug!("local command payload too short");
                return Vec::new();
            }
            let destination = NodeAddress::try_from(&packet.data[..ADDRESS_SIZE])
                .expect("slice is exactly 8 bytes");
            return vec![EngineAction::ReliableSend {
                destination,
                data: packet.data[ADDRESS_SIZE..].to_vec(),
            }];
        }

        let mut actions = Vec::new();
        match packet.flags.destination_type {
            DestinationType::Single => {
                if packet.destination == self.address.widened() {
                    // Addressed to us alone: deliver, never forward.
                    actions.push(EngineAction::DeliverLocal {
                        destination: packet.destination,
                        context: packet.context,
                        data: packet.data,
                    });
                    return actions;
                }
            }
            DestinationType::Group | DestinationType::Plain => {
                // Group membership matches on the leading 8 bytes of the
                // 16-byte hash, a convention carried over from the
                // pre-standard gateways this node interoperates with.
                // Group traffic is delivered locally and still forwarded.
                if self
                    .config
                    .subscribed_groups
                    .contains(&packet.destination.prefix())
                {
                    actions.push(EngineAction::DeliverLocal {
                        destination: packet.destination,
                        context: packet.context,
                        data: packet.data.clone(),
                    });
                }
            }
            DestinationType::Link => {}
        }

        if packet.hops >= self.config.max_hops {
            return actions;
        }
        let mut forwarded = packet;
        forwarded.hops += 1;
        let destination = forwarded.destination.prefix();
        match forwarded.serialize() {
            Ok(raw) => actions.push(self.route_or_flood(&destination, raw, Some(interface))),
            Err(e) => warn!(error = %e, "failed to re-serialize packet for forwarding"),
        }
        actions
    }

    fn route_or_flood(
        &self,
        destination: &NodeAddress,
        raw: Vec<u8>,
        exclude: Option<InterfaceTag>,
    ) -> EngineAction {
        match self.routes.lookup(destination) {
            Some(route) if Some(route.interface) != exclude => EngineAction::Transmit {
                interface: route.interface,
                locator: route.next_hop.clone(),
                raw,
            },
            _ => EngineAction::Broadcast { exclude, raw },
        }
    }
}

/// Announce payload: `[packet_id 2 BE][version tag ...]`.
fn parse_announce_payload(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([data[0], data[1]]))
}
