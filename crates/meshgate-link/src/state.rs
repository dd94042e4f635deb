//! Per-peer link state machine.
//!
//! Events are inbound frames and the clock; actions are outbound frames
//! and deliveries. The machine never does I/O and never reads a clock:
//! callers pass `now` and execute the returned [`LinkAction`]s.
//!
//! ```text
//! CLOSED ──send──> PENDING_REQ ──ACK(0)──> ESTABLISHED ──close──> CLOSING
//!    ^                  │                       │                    │
//!    └── REQ deadline ──┘     retries exhausted │     ACK(0)/deadline┘
//!    └──────────────── inactivity ──────────────┘
//! ```

use meshgate_core::constants::ContextType;
use meshgate_core::packet::legacy::LinkFrame;
use meshgate_core::types::{NodeAddress, PacketIdSource};
use tracing::{debug, info, trace, warn};

use crate::constants::LinkConfig;
use crate::error::LinkError;
use crate::seq::seq_lt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    PendingReq,
    Established,
    Closing,
}

/// Why a link left the ESTABLISHED/PENDING world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Clean CLOSE/ACK handshake completed.
    CleanClose,
    /// No ACK for the initial LINK_REQ.
    RequestTimeout,
    /// A data frame went unacknowledged through every retry.
    RetriesExhausted,
    /// No ACK for our LINK_CLOSE.
    CloseTimeout,
    /// Peer asked to close.
    PeerClosed,
    /// Nothing heard for the inactivity window.
    Inactivity,
}

/// Output of a state-machine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// A serialized legacy frame to send toward `destination`.
    SendFrame {
        destination: NodeAddress,
        raw: Vec<u8>,
    },
    /// An in-order application payload.
    Deliver {
        source: NodeAddress,
        data: Vec<u8>,
    },
    /// The link reached CLOSED; the owning table reaps it.
    Closed {
        destination: NodeAddress,
        reason: TeardownReason,
    },
}

/// The one unacknowledged frame (window is exactly one).
#[derive(Debug, Clone)]
struct PendingFrame {
    sequence: u16,
    data: Vec<u8>,
}

/// A reliable channel to one peer.
#[must_use]
pub struct Link {
    destination: NodeAddress,
    local: NodeAddress,
    config: LinkConfig,
    state: LinkState,
    last_activity: u64,
    /// Absolute deadline for the current wait (REQ ACK, data ACK, or
    /// CLOSE ACK), when one is armed.
    state_deadline: Option<u64>,
    tx_seq: u16,
    rx_expected: u16,
    pending: Option<PendingFrame>,
    retries: u8,
}

impl Link {
    pub fn new(destination: NodeAddress, local: NodeAddress, config: LinkConfig, now: u64) -> Self {
        Self {
            destination,
            local,
            config,
            state: LinkState::Closed,
            last_activity: now,
            state_deadline: None,
            tx_seq: 0,
            rx_expected: 0,
            pending: None,
            retries: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn destination(&self) -> NodeAddress {
        self.destination
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Begin establishment: emit a LINK_REQ and await its ACK.
    pub fn open(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        debug_assert_eq!(self.state, LinkState::Closed);
        info!(destination = %self.destination, "opening link");
        self.state = LinkState::PendingReq;
        self.state_deadline = Some(now + self.config.req_timeout);
        self.retries = 0;
        self.last_activity = now;

        let frame = LinkFrame::control(
            ContextType::LinkRequest,
            self.destination,
            self.local,
            ids.next_id(),
        );
        self.frame_actions(frame)
    }

    /// Send one reliable payload. The window is a single frame; a
    /// second send before the ACK is refused without state change.
    pub fn send(
        &mut self,
        data: Vec<u8>,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Result<Vec<LinkAction>, LinkError> {
        debug_assert_eq!(self.state, LinkState::Established);
        if self.pending.is_some() {
            return Err(LinkError::Saturated);
        }

        let sequence = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        self.pending = Some(PendingFrame {
            sequence,
            data: data.clone(),
        });
        self.state_deadline = Some(now + self.config.retry_timeout);
        self.retries = 0;
        self.last_activity = now;

        trace!(destination = %self.destination, sequence, "sending link data");
        let frame = LinkFrame::data(self.destination, self.local, ids.next_id(), sequence, data);
        Ok(self.frame_actions(frame))
    }

    /// Begin a clean close: emit LINK_CLOSE and await its ACK.
    pub fn close(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        if self.state == LinkState::Closed || self.state == LinkState::Closing {
            return Vec::new();
        }
        info!(destination = %self.destination, "closing link");
        // Whatever was in flight dies with the link.
        self.pending = None;
        self.state = LinkState::Closing;
        self.state_deadline = Some(now + self.config.retry_timeout);
        self.retries = 0;
        self.last_activity = now;

        let frame = LinkFrame::control(
            ContextType::LinkClose,
            self.destination,
            self.local,
            ids.next_id(),
        );
        self.frame_actions(frame)
    }

    /// Feed one inbound frame for this link.
    pub fn handle_frame(
        &mut self,
        frame: &LinkFrame,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Vec<LinkAction> {
        self.last_activity = now;

        match frame.context {
            ContextType::Ack => self.handle_ack(frame.sequence.unwrap_or(0)),
            ContextType::LinkRequest => self.handle_request(ids, now),
            ContextType::LinkData => self.handle_data(frame, ids, now),
            ContextType::LinkClose => self.handle_close(ids, now),
            _ => Vec::new(),
        }
    }

    /// Deadline sweep. Retransmits the pending frame (with a fresh
    /// packet id) until retries are exhausted; times out handshakes.
    pub fn check_deadlines(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        let Some(deadline) = self.state_deadline else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        match self.state {
            LinkState::PendingReq => {
                warn!(destination = %self.destination, "link request timed out");
                self.teardown(TeardownReason::RequestTimeout)
            }
            LinkState::Established if self.pending.is_some() => {
                if self.retries < self.config.max_retries {
                    self.retries += 1;
                    self.retransmit_pending(ids, now)
                } else {
                    warn!(destination = %self.destination, "link retries exhausted");
                    self.teardown(TeardownReason::RetriesExhausted)
                }
            }
            LinkState::Closing => {
                warn!(destination = %self.destination, "link close timed out");
                self.teardown(TeardownReason::CloseTimeout)
            }
            _ => {
                self.state_deadline = None;
                Vec::new()
            }
        }
    }

    /// A transport send fault counts as an immediately elapsed retry
    /// deadline; the next sweep retransmits (or gives up).
    pub fn on_send_error(&mut self, now: u64) {
        if self.state_deadline.is_some() {
            self.state_deadline = Some(now);
        }
    }

    /// Whether the inactivity window has elapsed.
    #[must_use]
    pub fn is_inactive(&self, now: u64) -> bool {
        now.saturating_sub(self.last_activity) > self.config.inactivity_timeout
    }

    /// Drop all in-flight state and go straight to CLOSED.
    pub fn teardown(&mut self, reason: TeardownReason) -> Vec<LinkAction> {
        if self.state == LinkState::Closed {
            return Vec::new();
        }
        self.state = LinkState::Closed;
        self.pending = None;
        self.state_deadline = None;
        self.retries = 0;
        vec![LinkAction::Closed {
            destination: self.destination,
            reason,
        }]
    }

    fn handle_ack(&mut self, acked: u16) -> Vec<LinkAction> {
        match self.state {
            LinkState::PendingReq => {
                if acked == 0 {
                    info!(destination = %self.destination, "link established");
                    self.establish();
                } else {
                    debug!(acked, "ignoring ACK with unexpected sequence while pending");
                }
                Vec::new()
            }
            LinkState::Established => {
                match &self.pending {
                    Some(pending) if pending.sequence == acked => {
                        trace!(destination = %self.destination, acked, "frame acknowledged");
                        self.pending = None;
                        self.state_deadline = None;
                        self.retries = 0;
                    }
                    Some(pending) => {
                        debug!(
                            expected = pending.sequence,
                            acked, "ignoring ACK for wrong sequence"
                        );
                    }
                    // Duplicate ACK after the queue drained.
                    None => {}
                }
                Vec::new()
            }
            LinkState::Closing => {
                if acked == 0 {
                    self.teardown(TeardownReason::CleanClose)
                } else {
                    Vec::new()
                }
            }
            LinkState::Closed => Vec::new(),
        }
    }

    fn handle_request(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        match self.state {
            LinkState::Closed => {
                info!(destination = %self.destination, "link established by peer request");
                self.establish();
                self.ack(0, ids, now)
            }
            // Simultaneous open: both sides sent REQs. ACK theirs and
            // treat the link as up; our REQ's ACK becomes a no-op.
            LinkState::PendingReq => {
                info!(destination = %self.destination, "link established by concurrent request");
                self.establish();
                self.ack(0, ids, now)
            }
            // Peer restarted and is re-requesting: re-ACK and expect
            // its sequences from zero again.
            LinkState::Established => {
                debug!(destination = %self.destination, "re-acknowledging link request");
                self.rx_expected = 0;
                self.ack(0, ids, now)
            }
            LinkState::Closing => Vec::new(),
        }
    }

    fn handle_data(
        &mut self,
        frame: &LinkFrame,
        ids: &mut dyn PacketIdSource,
        now: u64,
    ) -> Vec<LinkAction> {
        if self.state != LinkState::Established {
            return Vec::new();
        }
        let Some(sequence) = frame.sequence else {
            // The codec refuses these, but an in-memory caller could.
            return Vec::new();
        };

        if sequence == self.rx_expected {
            self.rx_expected = self.rx_expected.wrapping_add(1);
            let mut actions = vec![LinkAction::Deliver {
                source: frame.source,
                data: frame.data.clone(),
            }];
            actions.extend(self.ack(sequence, ids, now));
            actions
        } else if seq_lt(sequence, self.rx_expected) {
            // Our ACK was lost; repeat it. Delivery stays at-most-once.
            debug!(
                sequence,
                expected = self.rx_expected,
                "duplicate link data, re-acknowledging"
            );
            self.ack(sequence, ids, now)
        } else {
            debug!(
                sequence,
                expected = self.rx_expected,
                "out-of-order link data dropped"
            );
            Vec::new()
        }
    }

    fn handle_close(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        match self.state {
            LinkState::Established | LinkState::PendingReq => {
                let mut actions = self.ack(0, ids, now);
                actions.extend(self.teardown(TeardownReason::PeerClosed));
                actions
            }
            _ => Vec::new(),
        }
    }

    fn establish(&mut self) {
        self.state = LinkState::Established;
        self.tx_seq = 0;
        self.rx_expected = 0;
        self.pending = None;
        self.state_deadline = None;
        self.retries = 0;
    }

    fn retransmit_pending(&mut self, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        let Some(pending) = &self.pending else {
            return Vec::new();
        };
        debug!(
            destination = %self.destination,
            sequence = pending.sequence,
            retry = self.retries,
            "retransmitting link data"
        );
        // Same sequence, fresh packet id for the new transmission.
        let frame = LinkFrame::data(
            self.destination,
            self.local,
            ids.next_id(),
            pending.sequence,
            pending.data.clone(),
        );
        self.state_deadline = Some(now + self.config.retry_timeout);
        self.last_activity = now;
        self.frame_actions(frame)
    }

    fn ack(&mut self, sequence: u16, ids: &mut dyn PacketIdSource, now: u64) -> Vec<LinkAction> {
        self.last_activity = now;
        let frame = LinkFrame::ack(self.destination, self.local, ids.next_id(), sequence);
        self.frame_actions(frame)
    }

    fn frame_actions(&self, frame: LinkFrame) -> Vec<LinkAction> {
        match frame.serialize() {
            Ok(raw) => vec![LinkAction::SendFrame {
                destination: self.destination,
                raw,
            }],
            Err(e) => {
                // Frames built here are always serializable; keep the
                // stream alive if that ever stops holding.
                warn!(error = %e, "failed to serialize link frame");
                Vec::new()
            }
        }
    }
}
