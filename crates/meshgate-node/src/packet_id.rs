//! Wear-levelled packet id allocation.
//!
//! Packet ids are 16-bit and persisted so they keep rising across
//! reboots, but flushing every allocation would chew through flash on
//! the small boards this gateway targets. The allocator commits the
//! counter once per `save_interval` allocations through an injectable
//! [`CounterSink`], and resuming skips one full interval past the
//! stored value so ids handed out after the last flush are never
//! reissued.

use meshgate_core::types::PacketIdSource;

/// Default flush cadence: every 100 allocations.
pub const PACKET_ID_SAVE_INTERVAL: u16 = 100;

/// Receives counter values that are due for persistence.
///
/// The node wires this to storage; tests use an in-memory sink.
pub trait CounterSink: Send {
    fn persist(&mut self, value: u16);
}

/// The node's packet id counter with throttled persistence.
#[must_use]
pub struct PacketIdAllocator {
    counter: u16,
    unsaved: u16,
    save_interval: u16,
    sink: Box<dyn CounterSink>,
}

impl PacketIdAllocator {
    /// Resume from a stored counter value.
    ///
    /// The stored value trails the live counter by up to one interval,
    /// so the session starts one full interval past it.
    pub fn resume(stored: u16, save_interval: u16, sink: Box<dyn CounterSink>) -> Self {
        let save_interval = save_interval.max(1);
        Self {
            counter: stored.wrapping_add(save_interval),
            unsaved: 0,
            save_interval,
            sink,
        }
    }

    /// The most recently allocated id.
    #[must_use]
    pub fn current(&self) -> u16 {
        self.counter
    }
}

impl PacketIdSource for PacketIdAllocator {
    fn next_id(&mut self) -> u16 {
        self.counter = self.counter.wrapping_add(1);
        self.unsaved += 1;
        if self.unsaved >= self.save_interval {
            self.sink.persist(self.counter);
            self.unsaved = 0;
        }
        self.counter
    }
}
