//! Recent-announce suppression set.
//!
//! Remembers which announces were already re-broadcast so a flood of the
//! same announce arriving over several transports is forwarded exactly
//! once per window. Keyed by `(packet id, first four bytes of the
//! source address)`.

use std::collections::HashMap;

use meshgate_core::types::NodeAddress;

/// Bounded set of recently forwarded announce identities.
#[must_use]
pub struct RecentAnnounces {
    seen: HashMap<(u16, [u8; 4]), u64>,
    max_entries: usize,
}

impl RecentAnnounces {
    pub fn new(max_entries: usize) -> Self {
        Self {
            seen: HashMap::new(),
            max_entries,
        }
    }

    /// True iff this announce identity has not been forwarded within the
    /// current window.
    #[must_use]
    pub fn should_forward(&self, packet_id: u16, source: &NodeAddress) -> bool {
        !self.seen.contains_key(&(packet_id, source.dedup_prefix()))
    }

    /// Record a forwarded announce. Forces a prune when the set
    /// outgrows its bound.
    pub fn mark_forwarded(&mut self, packet_id: u16, source: &NodeAddress, now: u64, window: u64) {
        self.seen.insert((packet_id, source.dedup_prefix()), now);
        if self.seen.len() > self.max_entries {
            self.prune(now, window);
        }
        // A burst of distinct announces can outrun the window prune;
        // drop the oldest records to hold the bound.
        while self.seen.len() > self.max_entries {
            let oldest = self
                .seen
                .iter()
                .min_by_key(|&(_, &at)| at)
                .map(|(k, _)| *k)
                .expect("set is over capacity, therefore non-empty");
            self.seen.remove(&oldest);
        }
    }

    /// Drop records older than `window`.
    pub fn prune(&mut self, now: u64, window: u64) {
        self.seen.retain(|_, &mut at| now.saturating_sub(at) <= window);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
