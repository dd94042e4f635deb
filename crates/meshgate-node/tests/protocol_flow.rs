//! Multi-node protocol scenarios over a simulated mesh.
//!
//! Wires several engine + link stacks together through in-memory
//! broadcast segments and pumps actions between them, covering announce
//! flooding, loop suppression, multi-hop relay, and the reliable-link
//! exchange end to end without any real transports.

use meshgate_core::packet::legacy::LinkFrame;
use meshgate_core::packet::wire::Packet;
use meshgate_core::types::{NodeAddress, PacketIdSource};
use meshgate_link::{LinkAction, LinkConfig, LinkManager, LinkState};
use meshgate_routing::{EngineAction, EngineConfig, ForwardingEngine, InterfaceTag, Locator};

struct SeqIds(u16);

impl PacketIdSource for SeqIds {
    fn next_id(&mut self) -> u16 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

struct TestNode {
    address: NodeAddress,
    engine: ForwardingEngine,
    links: LinkManager,
    ids: SeqIds,
}

/// A shared broadcast domain (one radio channel, one subnet...).
struct Segment {
    tag: InterfaceTag,
    /// (node index, that node's locator on this segment)
    members: Vec<(usize, Locator)>,
}

/// The simulated mesh: nodes, segments, and a manual clock.
struct Mesh {
    nodes: Vec<TestNode>,
    segments: Vec<Segment>,
    now: u64,
    /// Every raw buffer that crossed any segment, for assertions.
    wire_log: Vec<Vec<u8>>,
    delivered: Vec<(NodeAddress, NodeAddress, Vec<u8>)>,
}

impl Mesh {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            segments: Vec::new(),
            now: 0,
            wire_log: Vec::new(),
            delivered: Vec::new(),
        }
    }

    fn add_segment(&mut self, tag: InterfaceTag) -> usize {
        self.segments.push(Segment {
            tag,
            members: Vec::new(),
        });
        self.segments.len() - 1
    }

    fn add_node(&mut self, seed: u8, segments: &[usize]) -> usize {
        let address = NodeAddress::new([seed; 8]);
        let index = self.nodes.len();
        for &s in segments {
            let locator = Locator::Mac([seed, seed, seed, seed, seed, s as u8]);
            self.segments[s].members.push((index, locator));
        }
        self.nodes.push(TestNode {
            address,
            engine: ForwardingEngine::new(address, EngineConfig::default(), 0, 10_000),
            links: LinkManager::new(address, LinkConfig::default()),
            ids: SeqIds(u16::from(seed) << 8),
        });
        index
    }

    fn locator_of(&self, segment: usize, node: usize) -> Locator {
        self.segments[segment]
            .members
            .iter()
            .find(|(i, _)| *i == node)
            .map(|(_, l)| l.clone())
            .expect("node is a member of the segment")
    }

    /// Pump a batch of engine actions originating at `origin` until the
    /// mesh settles.
    fn pump(&mut self, origin: usize, actions: Vec<EngineAction>) {
        let mut queue: Vec<(usize, EngineAction)> =
            actions.into_iter().map(|a| (origin, a)).collect();

        while let Some((at, action)) = queue.pop() {
            match action {
                EngineAction::Broadcast { exclude, raw } => {
                    self.wire_log.push(raw.clone());
                    let deliveries = self.fan_out(at, exclude, &raw);
                    queue.extend(deliveries);
                }
                EngineAction::Transmit {
                    interface,
                    locator,
                    raw,
                } => {
                    self.wire_log.push(raw.clone());
                    if let Some((target, seg_tag, from)) = self.unicast_target(at, interface, &locator)
                    {
                        let now = self.now;
                        let actions = self.nodes[target].engine.ingest(&raw, seg_tag, from, now);
                        queue.extend(actions.into_iter().map(|a| (target, a)));
                    }
                }
                EngineAction::LinkInbound { frame, .. } => {
                    let node = &mut self.nodes[at];
                    let link_actions = node.links.handle_frame(&frame, &mut node.ids, self.now);
                    queue.extend(self.lower_link_actions(at, link_actions));
                }
                EngineAction::DeliverLocal { .. } => {}
                EngineAction::ReliableSend { destination, data } => {
                    let node = &mut self.nodes[at];
                    if let Ok(outcome) =
                        node.links
                            .send_reliable(destination, data, &mut node.ids, self.now)
                    {
                        queue.extend(self.lower_link_actions(at, outcome.actions));
                    }
                }
                EngineAction::ReleasePeer { .. } => {}
            }
        }
    }

    /// Convert link actions at `at` into engine sends, recording
    /// deliveries.
    fn lower_link_actions(
        &mut self,
        at: usize,
        actions: Vec<LinkAction>,
    ) -> Vec<(usize, EngineAction)> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                LinkAction::SendFrame { destination, raw } => {
                    out.push((at, self.nodes[at].engine.outbound(&destination, raw, None)));
                }
                LinkAction::Deliver { source, data } => {
                    self.delivered
                        .push((self.nodes[at].address, source, data));
                }
                LinkAction::Closed { .. } => {}
            }
        }
        out
    }

    /// Deliver a broadcast from `at` to every segment peer.
    fn fan_out(
        &mut self,
        at: usize,
        exclude: Option<InterfaceTag>,
        raw: &[u8],
    ) -> Vec<(usize, EngineAction)> {
        let mut out = Vec::new();
        for s in 0..self.segments.len() {
            let tag = self.segments[s].tag;
            if Some(tag) == exclude {
                continue;
            }
            if !self.segments[s].members.iter().any(|(i, _)| *i == at) {
                continue;
            }
            let from = self.locator_of(s, at);
            let peers: Vec<usize> = self.segments[s]
                .members
                .iter()
                .map(|(i, _)| *i)
                .filter(|i| *i != at)
                .collect();
            for peer in peers {
                let now = self.now;
                let actions =
                    self.nodes[peer]
                        .engine
                        .ingest(raw, tag, from.clone(), now);
                out.extend(actions.into_iter().map(|a| (peer, a)));
            }
        }
        out
    }

    fn unicast_target(
        &self,
        at: usize,
        interface: InterfaceTag,
        locator: &Locator,
    ) -> Option<(usize, InterfaceTag, Locator)> {
        for (s, segment) in self.segments.iter().enumerate() {
            if segment.tag != interface {
                continue;
            }
            if !segment.members.iter().any(|(i, _)| *i == at) {
                continue;
            }
            if let Some((target, _)) = segment.members.iter().find(|(_, l)| l == locator) {
                return Some((*target, segment.tag, self.locator_of(s, at)));
            }
        }
        None
    }

    /// Emit node `at`'s own announce into the mesh.
    fn announce(&mut self, at: usize) {
        let node = &mut self.nodes[at];
        let id = node.ids.next_id();
        let raw = node.engine.self_announce(id).serialize().unwrap();
        self.pump(at, vec![EngineAction::Broadcast { exclude: None, raw }]);
    }

    fn send_reliable(&mut self, at: usize, to: NodeAddress, data: &[u8]) -> bool {
        let node = &mut self.nodes[at];
        match node
            .links
            .send_reliable(to, data.to_vec(), &mut node.ids, self.now)
        {
            Ok(outcome) => {
                let lowered = self.lower_link_actions(at, outcome.actions);
                for (origin, action) in lowered {
                    self.pump(origin, vec![action]);
                }
                outcome.accepted
            }
            Err(_) => false,
        }
    }

    fn sweep(&mut self, at: usize) {
        let node = &mut self.nodes[at];
        let actions = node.links.sweep(&mut node.ids, self.now);
        let lowered = self.lower_link_actions(at, actions);
        for (origin, action) in lowered {
            self.pump(origin, vec![action]);
        }
    }

    fn announce_count(&self) -> usize {
        self.wire_log
            .iter()
            .filter(|raw| {
                Packet::parse(raw).is_ok_and(|p| {
                    p.flags.packet_type == meshgate_core::constants::PacketType::Announce
                })
            })
            .count()
    }

    fn link_request_count(&self) -> usize {
        self.wire_log
            .iter()
            .filter(|raw| {
                LinkFrame::parse(raw)
                    .is_ok_and(|f| f.context == meshgate_core::constants::ContextType::LinkRequest)
            })
            .count()
    }
}

fn addr(seed: u8) -> NodeAddress {
    NodeAddress::new([seed; 8])
}

#[test]
fn announce_floods_once_per_node() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let a = mesh.add_node(0xA1, &[radio]);
    let b = mesh.add_node(0xB2, &[radio]);
    let c = mesh.add_node(0xC3, &[radio]);

    mesh.announce(a);

    // Everyone learned the route to A.
    assert!(mesh.nodes[b].engine.routes().lookup(&addr(0xA1)).is_some());
    assert!(mesh.nodes[c].engine.routes().lookup(&addr(0xA1)).is_some());

    // A's original plus exactly one re-broadcast from B and from C.
    // Their echoes reach each other inside the suppression window and
    // die there, and A drops its own announce coming back.
    assert_eq!(mesh.announce_count(), 3);
    assert!(mesh.nodes[a].engine.routes().is_empty());
}

#[test]
fn announce_relays_across_a_bridge() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let ip = mesh.add_segment(InterfaceTag::IpDatagram);
    let a = mesh.add_node(0xA1, &[radio]);
    let _bridge = mesh.add_node(0xB2, &[radio, ip]);
    let far = mesh.add_node(0xC3, &[ip]);

    mesh.announce(a);

    // The bridge re-broadcast carried the announce into the IP segment
    // with an incremented hop count.
    let far_route = mesh.nodes[far]
        .engine
        .routes()
        .lookup(&addr(0xA1))
        .expect("far node learned the bridged route");
    assert_eq!(far_route.hops, 1);
    assert_eq!(far_route.interface, InterfaceTag::IpDatagram);
}

#[test]
fn reliable_exchange_across_one_segment() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let a = mesh.add_node(0xA1, &[radio]);
    let b = mesh.add_node(0xB2, &[radio]);

    // First request only opens the link.
    assert!(!mesh.send_reliable(a, addr(0xB2), b"X"));
    assert_eq!(
        mesh.nodes[a].links.link_state(&addr(0xB2)),
        LinkState::Established
    );
    assert_eq!(
        mesh.nodes[b].links.link_state(&addr(0xA1)),
        LinkState::Established
    );
    assert_eq!(mesh.link_request_count(), 1);

    // Retry delivers exactly once.
    assert!(mesh.send_reliable(a, addr(0xB2), b"X"));
    assert_eq!(
        mesh.delivered,
        vec![(addr(0xB2), addr(0xA1), b"X".to_vec())]
    );

    // A second payload reuses the link: no new LINK_REQ on the wire.
    assert!(mesh.send_reliable(a, addr(0xB2), b"Y"));
    assert_eq!(mesh.delivered.len(), 2);
    assert_eq!(mesh.link_request_count(), 1);
}

#[test]
fn reliable_exchange_relayed_through_bridge() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let ip = mesh.add_segment(InterfaceTag::IpDatagram);
    let a = mesh.add_node(0xA1, &[radio]);
    let _bridge = mesh.add_node(0xB2, &[radio, ip]);
    let c = mesh.add_node(0xC3, &[ip]);

    // A and C share no segment; frames must relay through the bridge.
    assert!(!mesh.send_reliable(a, addr(0xC3), b"ping"));
    assert_eq!(
        mesh.nodes[a].links.link_state(&addr(0xC3)),
        LinkState::Established
    );
    assert_eq!(
        mesh.nodes[c].links.link_state(&addr(0xA1)),
        LinkState::Established
    );

    assert!(mesh.send_reliable(a, addr(0xC3), b"ping"));
    assert_eq!(
        mesh.delivered,
        vec![(addr(0xC3), addr(0xA1), b"ping".to_vec())]
    );
}

#[test]
fn lost_acks_retransmit_then_tear_down() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let a = mesh.add_node(0xA1, &[radio]);
    let b = mesh.add_node(0xB2, &[radio]);

    mesh.send_reliable(a, addr(0xB2), b"X");
    assert!(mesh.send_reliable(a, addr(0xB2), b"X"));
    assert_eq!(mesh.delivered.len(), 1);

    // Unplug B: sends from A now go nowhere.
    mesh.segments[radio].members.retain(|(i, _)| *i != b);

    assert!(mesh.send_reliable(a, addr(0xB2), b"lost"));
    let config = LinkConfig::default();
    for _ in 0..=config.max_retries {
        mesh.now += config.retry_timeout;
        mesh.sweep(a);
    }

    // Retries exhausted: the application observes CLOSED.
    assert_eq!(mesh.nodes[a].links.link_state(&addr(0xB2)), LinkState::Closed);
    // B never saw the payload.
    assert_eq!(mesh.delivered.len(), 1);
}

#[test]
fn own_traffic_is_never_reforwarded() {
    let mut mesh = Mesh::new();
    let radio = mesh.add_segment(InterfaceTag::LocalRadio);
    let a = mesh.add_node(0xA1, &[radio]);
    let b = mesh.add_node(0xB2, &[radio]);

    mesh.announce(a);
    mesh.announce(b);
    let baseline = mesh.wire_log.len();

    // Re-inject A's announce straight back at A.
    let node = &mut mesh.nodes[a];
    let id = node.ids.next_id();
    let raw = node.engine.self_announce(id).serialize().unwrap();
    let from = mesh.locator_of(radio, b);
    let now = mesh.now;
    let actions = mesh.nodes[a]
        .engine
        .ingest(&raw, InterfaceTag::LocalRadio, from, now);
    assert!(actions.is_empty());
    assert_eq!(mesh.wire_log.len(), baseline);
}
