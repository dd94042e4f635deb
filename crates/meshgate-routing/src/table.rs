//! Bounded announce-driven route table.

use meshgate_core::types::NodeAddress;
use tracing::debug;

use crate::interface::{InterfaceTag, Locator};

/// One learned route: where a destination was last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: NodeAddress,
    pub next_hop: Locator,
    pub interface: InterfaceTag,
    pub hops: u8,
    pub last_heard_at: u64,
}

/// Bounded table mapping destinations to next hops.
///
/// Lookup is a linear scan: the table is small and the simplicity is
/// worth more than a hash map here. Freshest announce wins on update;
/// at capacity the entry with the oldest `last_heard_at` is displaced.
#[must_use]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    max_routes: usize,
}

impl RouteTable {
    pub fn new(max_routes: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_routes),
            max_routes,
        }
    }

    /// Record an announce observation.
    ///
    /// Overwrites the existing entry for `source` (freshest wins: hops,
    /// interface, and locator all track the latest announce so the table
    /// stays current after topology change). Inserts otherwise, evicting
    /// the least-recently-heard entry when full. The displaced entry is
    /// returned so the caller can release its transport peer slot.
    pub fn observe(
        &mut self,
        source: NodeAddress,
        hops: u8,
        interface: InterfaceTag,
        next_hop: Locator,
        now: u64,
    ) -> Option<RouteEntry> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.destination == source) {
            entry.hops = hops;
            entry.interface = interface;
            entry.next_hop = next_hop;
            entry.last_heard_at = now;
            return None;
        }

        let entry = RouteEntry {
            destination: source,
            next_hop,
            interface,
            hops,
            last_heard_at: now,
        };

        if self.entries.len() < self.max_routes {
            self.entries.push(entry);
            return None;
        }

        // Full: displace the stalest entry.
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_heard_at)
            .map(|(i, _)| i)
            .expect("table is full, therefore non-empty");
        let evicted = std::mem::replace(&mut self.entries[oldest], entry);
        debug!(destination = %evicted.destination, "route table full, displacing oldest route");
        Some(evicted)
    }

    /// Find the route for a destination, if any.
    #[must_use]
    pub fn lookup(&self, destination: &NodeAddress) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.destination == *destination)
    }

    /// Drop entries not heard from within `ttl`. Returns the removed
    /// entries for transport peer-table cleanup.
    pub fn prune(&mut self, now: u64, ttl: u64) -> Vec<RouteEntry> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if now.saturating_sub(e.last_heard_at) > ttl {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        for e in &expired {
            debug!(destination = %e.destination, "route expired");
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }
}
