//! Bounded per-destination link table.
//!
//! Owns every [`Link`] state machine, keyed by peer address. Links are
//! created by a local reliable-send request or by an inbound LINK_REQ;
//! anything else for an unknown peer is dropped. A timer sweep drives
//! deadlines and reaps links that reached CLOSED.

use std::collections::BTreeMap;

use meshgate_core::constants::ContextType;
use meshgate_core::packet::legacy::LinkFrame;
use meshgate_core::types::{NodeAddress, PacketIdSource};
use tracing::{debug, warn};

use crate::constants::{LinkConfig, MAX_LINK_PAYLOAD};
use crate::error::LinkError;
use crate::state::{Link, LinkAction, LinkState, TeardownReason};

/// Result of a reliable-send request.
///
/// `accepted` is false while the link is still being established; the
/// caller observes `link_state` and retries once it is ESTABLISHED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub accepted: bool,
    pub actions: Vec<LinkAction>,
}

/// Owner of all live links for one node.
#[must_use]
pub struct LinkManager {
    local: NodeAddress,
    config: LinkConfig,
    links: BTreeMap<NodeAddress, Link>,
}

impl LinkManager {
    pub fn new(local: NodeAddress, config: LinkConfig) -> Self {
        Self {
            local,
            config,
            links: BTreeMap::new(),
        }
    }

    /// Number of live links (anything not yet reaped).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.links.len()
    }

    /// Observable state of the link to `destination`.
    #[must_use]
    pub fn link_state(&self, destination: &NodeAddress) -> LinkState {
        self.links
            .get(destination)
            .map_or(LinkState::Closed, Link::state)
    }

    /// Request a reliable send to `destination`.
    ///
    /// Establishment is transparent: if no link exists (or it is
    /// CLOSED) a LINK_REQ goes out and the outcome is not-accepted; the
    /// caller retries after the link reaches ESTABLISHED. Saturation
    /// and admission refusal are errors without state change.
    pub fn send_reliable(
        &mut self,
        destination: NodeAddress,
        data: Vec<u8>,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Result<SendOutcome, LinkError> {
        if data.len() > MAX_LINK_PAYLOAD {
            return Err(LinkError::PayloadOversize {
                max: MAX_LINK_PAYLOAD,
                actual: data.len(),
            });
        }

        if !self.links.contains_key(&destination) {
            self.admit(destination, now)?;
        }
        let link = self
            .links
            .get_mut(&destination)
            .expect("link present or just admitted");

        match link.state() {
            LinkState::Closed => {
                let actions = link.open(ids, now);
                Ok(SendOutcome {
                    accepted: false,
                    actions,
                })
            }
            LinkState::PendingReq | LinkState::Closing => Ok(SendOutcome {
                accepted: false,
                actions: Vec::new(),
            }),
            LinkState::Established => {
                let actions = link.send(data, ids, now)?;
                Ok(SendOutcome {
                    accepted: true,
                    actions,
                })
            }
        }
    }

    /// Ask the link to `destination` to close cleanly.
    pub fn close(
        &mut self,
        destination: &NodeAddress,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Vec<LinkAction> {
        let Some(link) = self.links.get_mut(destination) else {
            return Vec::new();
        };
        let actions = link.close(ids, now);
        self.reap(destination);
        actions
    }

    /// Dispatch one inbound link frame, keyed by its source.
    ///
    /// Only a LINK_REQ may create a link; admission refusal drops the
    /// request (the peer will retry). Frames for unknown peers are
    /// dropped.
    pub fn handle_frame(
        &mut self,
        frame: &LinkFrame,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Vec<LinkAction> {
        let peer = frame.source;

        if !self.links.contains_key(&peer) {
            if frame.context != ContextType::LinkRequest {
                debug!(%peer, context = ?frame.context, "dropping link frame for unknown peer");
                return Vec::new();
            }
            if self.admit(peer, now).is_err() {
                warn!(%peer, "refusing link request at capacity");
                return Vec::new();
            }
        }

        let link = self.links.get_mut(&peer).expect("present or just admitted");
        let actions = link.handle_frame(frame, ids, now);
        self.reap(&peer);
        actions
    }

    /// A transport fault on the most recent frame toward `destination`.
    pub fn on_send_error(&mut self, destination: &NodeAddress, now: u64) {
        if let Some(link) = self.links.get_mut(destination) {
            link.on_send_error(now);
        }
    }

    /// Timer sweep: drive deadlines on every link, tear down the
    /// inactive ones, and reap everything that reached CLOSED.
    pub fn sweep(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        for link in self.links.values_mut() {
            actions.extend(link.check_deadlines(ids, now));
            if link.state() != LinkState::Closed && link.is_inactive(now) {
                warn!(destination = %link.destination(), "link inactivity timeout");
                actions.extend(link.teardown(TeardownReason::Inactivity));
            }
        }
        self.links.retain(|_, link| link.state() != LinkState::Closed);
        actions
    }

    fn admit(&mut self, destination: NodeAddress, now: u64) -> Result<(), LinkError> {
        if self.links.len() >= self.config.max_active {
            return Err(LinkError::AdmissionRefused {
                active: self.links.len(),
                max: self.config.max_active,
            });
        }
        self.links.insert(
            destination,
            Link::new(destination, self.local, self.config, now),
        );
        Ok(())
    }

    fn reap(&mut self, destination: &NodeAddress) {
        if self
            .links
            .get(destination)
            .is_some_and(|l| l.state() == LinkState::Closed)
        {
            self.links.remove(destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SeqIds(u16);

    impl PacketIdSource for SeqIds {
        fn next_id(&mut self) -> u16 {
            self.0 = self.0.wrapping_add(1);
            self.0
        }
    }

    fn addr(seed: u8) -> NodeAddress {
        NodeAddress::new([seed; 8])
    }

    /// Two managers plus a frame pump standing in for the mesh.
    struct Pair {
        a: LinkManager,
        b: LinkManager,
        ids: SeqIds,
    }

    impl Pair {
        fn new() -> Self {
            Self {
                a: LinkManager::new(addr(0xAA), LinkConfig::default()),
                b: LinkManager::new(addr(0xBB), LinkConfig::default()),
                ids: SeqIds(0),
            }
        }

        /// Deliver `actions` into whichever side each frame addresses,
        /// pumping until the exchange settles. Returns every payload
        /// delivered on either side as (source, data).
        fn exchange(&mut self, actions: Vec<LinkAction>, now: u64) -> Vec<(NodeAddress, Vec<u8>)> {
            let mut delivered = Vec::new();
            let mut queue = actions;
            while let Some(action) = queue.pop() {
                match action {
                    LinkAction::SendFrame { destination, raw } => {
                        let frame = LinkFrame::parse(&raw).unwrap();
                        let mgr = if destination == addr(0xAA) {
                            &mut self.a
                        } else {
                            &mut self.b
                        };
                        queue.extend(mgr.handle_frame(&frame, &mut self.ids, now));
                    }
                    LinkAction::Deliver { source, data } => {
                        delivered.push((source, data));
                    }
                    LinkAction::Closed { .. } => {}
                }
            }
            delivered
        }
    }

    #[test]
    fn test_happy_path_establish_then_deliver() {
        let mut pair = Pair::new();

        // First send: link is closed, a REQ goes out instead of data.
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 0)
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.actions.len(), 1);

        // Pump the REQ/ACK handshake through both sides.
        let actions = outcome.actions;
        pair.exchange(actions, 10);
        assert_eq!(pair.a.link_state(&addr(0xBB)), LinkState::Established);
        assert_eq!(pair.b.link_state(&addr(0xAA)), LinkState::Established);

        // Retry the send now that the link is up.
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 20)
            .unwrap();
        assert!(outcome.accepted);
        let delivered = pair.exchange(outcome.actions, 30);
        assert_eq!(delivered, vec![(addr(0xAA), b"X".to_vec())]);

        // Second payload reuses the link: no new REQ, next sequence.
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"Y".to_vec(), &mut pair.ids, 40)
            .unwrap();
        assert!(outcome.accepted);
        let frame = match &outcome.actions[0] {
            LinkAction::SendFrame { raw, .. } => LinkFrame::parse(raw).unwrap(),
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!(frame.sequence, Some(1));
        let delivered = pair.exchange(outcome.actions, 50);
        assert_eq!(delivered, vec![(addr(0xAA), b"Y".to_vec())]);
    }

    #[test]
    fn test_duplicate_data_delivers_once() {
        let mut pair = Pair::new();
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 0)
            .unwrap();
        pair.exchange(outcome.actions, 1);
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 2)
            .unwrap();

        // Capture the data frame and feed it to B twice.
        let LinkAction::SendFrame { raw, .. } = &outcome.actions[0] else {
            panic!()
        };
        let frame = LinkFrame::parse(raw).unwrap();
        let first = pair.b.handle_frame(&frame, &mut pair.ids, 3);
        let second = pair.b.handle_frame(&frame, &mut pair.ids, 4);

        let deliveries = |actions: &[LinkAction]| {
            actions
                .iter()
                .filter(|a| matches!(a, LinkAction::Deliver { .. }))
                .count()
        };
        assert_eq!(deliveries(&first), 1);
        assert_eq!(deliveries(&second), 0);
        // But the duplicate was re-ACKed.
        assert!(second
            .iter()
            .any(|a| matches!(a, LinkAction::SendFrame { .. })));
    }

    #[test]
    fn test_retransmit_then_teardown_after_max_retries() {
        let mut pair = Pair::new();
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 0)
            .unwrap();
        pair.exchange(outcome.actions, 1);
        pair.a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 10)
            .unwrap();
        // Drop every frame from here on (no exchange).

        let cfg = LinkConfig::default();
        let mut now = 10;
        for _ in 0..cfg.max_retries {
            now += cfg.retry_timeout;
            let actions = pair.a.sweep(&mut pair.ids, now);
            assert!(
                actions
                    .iter()
                    .any(|a| matches!(a, LinkAction::SendFrame { .. })),
                "expected a retransmission at {now}"
            );
        }

        now += cfg.retry_timeout;
        let actions = pair.a.sweep(&mut pair.ids, now);
        assert!(actions.iter().any(|a| matches!(
            a,
            LinkAction::Closed {
                reason: TeardownReason::RetriesExhausted,
                ..
            }
        )));
        // The application observes the teardown as CLOSED.
        assert_eq!(pair.a.link_state(&addr(0xBB)), LinkState::Closed);
        assert_eq!(pair.a.active_count(), 0);
    }

    #[test]
    fn test_admission_cap() {
        let mut mgr = LinkManager::new(
            addr(0x01),
            LinkConfig {
                max_active: 2,
                ..LinkConfig::default()
            },
        );
        let mut ids = SeqIds(0);

        mgr.send_reliable(addr(0x10), Vec::new(), &mut ids, 0).unwrap();
        mgr.send_reliable(addr(0x11), Vec::new(), &mut ids, 0).unwrap();
        let err = mgr
            .send_reliable(addr(0x12), Vec::new(), &mut ids, 0)
            .unwrap_err();
        assert_eq!(err, LinkError::AdmissionRefused { active: 2, max: 2 });
        assert_eq!(mgr.active_count(), 2);
    }

    #[test]
    fn test_inbound_req_refused_at_capacity() {
        let mut mgr = LinkManager::new(
            addr(0x01),
            LinkConfig {
                max_active: 1,
                ..LinkConfig::default()
            },
        );
        let mut ids = SeqIds(0);
        mgr.send_reliable(addr(0x10), Vec::new(), &mut ids, 0).unwrap();

        let req = LinkFrame::control(ContextType::LinkRequest, addr(0x01), addr(0x20), 5);
        assert!(mgr.handle_frame(&req, &mut ids, 1).is_empty());
        assert_eq!(mgr.active_count(), 1);
    }

    #[test]
    fn test_unknown_peer_non_req_dropped() {
        let mut mgr = LinkManager::new(addr(0x01), LinkConfig::default());
        let mut ids = SeqIds(0);

        let data = LinkFrame::data(addr(0x01), addr(0x20), 5, 0, b"x".to_vec());
        assert!(mgr.handle_frame(&data, &mut ids, 1).is_empty());
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_oversize_payload_refused() {
        let mut mgr = LinkManager::new(addr(0x01), LinkConfig::default());
        let mut ids = SeqIds(0);
        let err = mgr
            .send_reliable(addr(0x10), vec![0; MAX_LINK_PAYLOAD + 1], &mut ids, 0)
            .unwrap_err();
        assert!(matches!(err, LinkError::PayloadOversize { .. }));
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_clean_close_reaps_both_sides() {
        let mut pair = Pair::new();
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 0)
            .unwrap();
        pair.exchange(outcome.actions, 1);

        let actions = pair.a.close(&addr(0xBB), &mut pair.ids, 10);
        pair.exchange(actions, 11);

        assert_eq!(pair.a.active_count(), 0);
        assert_eq!(pair.b.active_count(), 0);
        assert_eq!(pair.a.link_state(&addr(0xBB)), LinkState::Closed);
        assert_eq!(pair.b.link_state(&addr(0xAA)), LinkState::Closed);
    }

    #[test]
    fn test_inactivity_sweep_reaps() {
        let mut pair = Pair::new();
        let outcome = pair
            .a
            .send_reliable(addr(0xBB), b"X".to_vec(), &mut pair.ids, 0)
            .unwrap();
        pair.exchange(outcome.actions, 1);
        assert_eq!(pair.a.active_count(), 1);

        let idle = LinkConfig::default().inactivity_timeout + 100;
        let actions = pair.a.sweep(&mut pair.ids, idle);
        assert!(actions.iter().any(|a| matches!(
            a,
            LinkAction::Closed {
                reason: TeardownReason::Inactivity,
                ..
            }
        )));
        assert_eq!(pair.a.active_count(), 0);
    }

    #[test]
    fn test_send_while_pending_not_accepted() {
        let mut mgr = LinkManager::new(addr(0x01), LinkConfig::default());
        let mut ids = SeqIds(0);

        let first = mgr
            .send_reliable(addr(0x10), b"a".to_vec(), &mut ids, 0)
            .unwrap();
        assert!(!first.accepted);
        // Second attempt while the REQ is outstanding: still not
        // accepted, and no duplicate REQ is emitted.
        let second = mgr
            .send_reliable(addr(0x10), b"a".to_vec(), &mut ids, 1)
            .unwrap();
        assert!(!second.accepted);
        assert!(second.actions.is_empty());
    }
}
