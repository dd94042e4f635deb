//! Newtype wrappers for protocol address fields.
//!
//! These types keep the 8-byte node address and the 16-byte destination
//! hash from being mixed up, and make the one sanctioned conversion
//! between them ([`DestinationHash::prefix`]) explicit.

extern crate alloc;

use core::fmt;

use crate::constants::{ADDRESS_SIZE, DEST_HASH_SIZE};

/// Helper to write lowercase hex without the `hex` crate.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

/// An 8-byte node address.
///
/// Used as the link-sublayer peer identity and as the leading bytes of
/// a node's announce destination hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct NodeAddress(pub(crate) [u8; ADDRESS_SIZE]);

impl NodeAddress {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Whether the address is one of the uninitialized sentinel values
    /// (all-zero or all-0xFF), which trigger regeneration at boot.
    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        self.0.iter().all(|&b| b == 0x00) || self.0.iter().all(|&b| b == 0xFF)
    }

    /// The first four bytes, used as the recent-announce dedup prefix.
    #[must_use]
    pub fn dedup_prefix(&self) -> [u8; 4] {
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.0[..4]);
        prefix
    }

    /// Zero-extend to a 16-byte destination hash.
    ///
    /// Self-announces carry the node address in the destination-hash
    /// field this way; the upper 8 bytes are always zero.
    pub fn widened(&self) -> DestinationHash {
        let mut bytes = [0u8; DEST_HASH_SIZE];
        bytes[..ADDRESS_SIZE].copy_from_slice(&self.0);
        DestinationHash(bytes)
    }
}

impl AsRef<[u8]> for NodeAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for NodeAddress {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| InvalidLength {
            expected: ADDRESS_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// A 16-byte truncated destination hash (official wire form addressing).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct DestinationHash(pub(crate) [u8; DEST_HASH_SIZE]);

impl DestinationHash {
    pub const fn new(bytes: [u8; DEST_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// The leading 8 bytes as a node address.
    ///
    /// This is the only translation between the official 16-byte hash
    /// and the legacy 8-byte address space. Group-prefix matching and
    /// announce identity both go through here; nothing else aliases the
    /// two fields.
    pub fn prefix(&self) -> NodeAddress {
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&self.0[..ADDRESS_SIZE]);
        NodeAddress(addr)
    }
}

impl AsRef<[u8]> for DestinationHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for DestinationHash {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; DEST_HASH_SIZE] = bytes.try_into().map_err(|_| InvalidLength {
            expected: DEST_HASH_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationHash(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// Source of fresh 16-bit packet identifiers.
///
/// The node owns the persistent, wear-levelled allocator; protocol
/// crates only ever see this seam. Tests use a plain counter.
pub trait PacketIdSource {
    fn next_id(&mut self) -> u16;
}

/// Error returned when a byte slice has the wrong length for a newtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid length: expected {} bytes, got {}",
            self.expected, self.actual
        )
    }
}
