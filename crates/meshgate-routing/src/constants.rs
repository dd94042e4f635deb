//! Routing defaults. All intervals are milliseconds.

/// Interval between periodic self-announces (3 minutes).
pub const ANNOUNCE_INTERVAL_MS: u64 = 180_000;

/// Route freshness ceiling: a little over three missed announces.
pub const ROUTE_TTL_MS: u64 = ANNOUNCE_INTERVAL_MS * 3 + 15_000;

/// How often the route table is swept for expired entries.
pub const PRUNE_INTERVAL_MS: u64 = ANNOUNCE_INTERVAL_MS / 2;

/// How long a forwarded announce id suppresses re-broadcast.
pub const RECENT_ANNOUNCE_WINDOW_MS: u64 = ANNOUNCE_INTERVAL_MS / 2;

/// Bound on the recent-announce suppression set.
pub const MAX_RECENT_ANNOUNCES: usize = 40;

/// Bound on the route table.
pub const MAX_ROUTES: usize = 20;

/// Bounds for the one-shot announce jitter after boot, used to
/// de-synchronize a freshly powered cohort.
pub const ANNOUNCE_JITTER_MIN_MS: u64 = 5_000;
pub const ANNOUNCE_JITTER_MAX_MS: u64 = 15_000;
