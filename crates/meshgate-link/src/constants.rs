//! Link sublayer defaults. All timeouts are milliseconds.

use meshgate_core::constants::{MAX_PAYLOAD, SEQ_SIZE};

/// Deadline for the ACK to an initial LINK_REQ.
pub const LINK_REQ_TIMEOUT_MS: u64 = 10_000;

/// Deadline for the ACK to a data frame (and to a LINK_CLOSE).
pub const LINK_RETRY_TIMEOUT_MS: u64 = 5_000;

/// Idle links are torn down after this long without traffic.
pub const LINK_INACTIVITY_TIMEOUT_MS: u64 = 1_110_000;

/// Retransmissions of one frame before the link is torn down.
pub const LINK_MAX_RETRIES: u8 = 3;

/// Admission cap on concurrently live links.
pub const LINK_MAX_ACTIVE: usize = 10;

/// Per-frame application payload ceiling; the sequence word occupies
/// the first two payload bytes of a data frame.
pub const MAX_LINK_PAYLOAD: usize = MAX_PAYLOAD - SEQ_SIZE;

/// Link sublayer tunables.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub req_timeout: u64,
    pub retry_timeout: u64,
    pub inactivity_timeout: u64,
    pub max_retries: u8,
    pub max_active: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            req_timeout: LINK_REQ_TIMEOUT_MS,
            retry_timeout: LINK_RETRY_TIMEOUT_MS,
            inactivity_timeout: LINK_INACTIVITY_TIMEOUT_MS,
            max_retries: LINK_MAX_RETRIES,
            max_active: LINK_MAX_ACTIVE,
        }
    }
}
