//! Protocol constants and enumerations.

use crate::error::PacketError;

// Wire format sizes
pub const ADDRESS_SIZE: usize = 8;
pub const DEST_HASH_SIZE: usize = 16;
pub const HEADER_SIZE: usize = 19;
pub const LEGACY_HEADER_SIZE: usize = 25;
pub const SEQ_SIZE: usize = 2;
pub const MAX_PAYLOAD: usize = 200;
pub const MAX_PACKET_SIZE: usize = LEGACY_HEADER_SIZE + SEQ_SIZE + MAX_PAYLOAD;

/// Maximum unframed packet length the KISS decoder will accumulate.
/// Allows some slack over the largest legal packet for framing overhead.
pub const MAX_FRAME: usize = MAX_PACKET_SIZE + 50;

/// Hop-count ceiling; packets at or above this are never forwarded.
pub const MAX_HOPS: u8 = 15;

// Legacy header-type byte values (first byte of a link frame)
pub const LEGACY_TYPE_MASK: u8 = 0b0000_0111;
pub const LEGACY_TYPE_DATA: u8 = 0x01;
pub const LEGACY_TYPE_ACK: u8 = 0x02;
pub const LEGACY_TYPE_ANNOUNCE: u8 = 0x03;
pub const LEGACY_FLAG_REQUEST_ACK: u8 = 0b1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Announce = 1,
    LinkRequest = 2,
    Proof = 3,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Announce),
            2 => Ok(PacketType::LinkRequest),
            3 => Ok(PacketType::Proof),
            _ => Err(PacketError::InvalidPacketType(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DestinationType {
    Single = 0,
    Group = 1,
    Plain = 2,
    Link = 3,
}

impl DestinationType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            0 => Ok(DestinationType::Single),
            1 => Ok(DestinationType::Group),
            2 => Ok(DestinationType::Plain),
            3 => Ok(DestinationType::Link),
            _ => Err(PacketError::InvalidDestinationType(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropagationType {
    Broadcast = 0,
    Transport = 1,
}

impl PropagationType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            0 => Ok(PropagationType::Broadcast),
            1 => Ok(PropagationType::Transport),
            _ => Err(PacketError::InvalidPropagationType(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderType {
    Header1 = 0,
    /// Two-address transport header. Recognized so the flag byte parses,
    /// but rejected by the wire codec; this gateway only relays
    /// broadcast-fabric traffic.
    Header2 = 1,
}

impl HeaderType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            0 => Ok(HeaderType::Header1),
            1 => Ok(HeaderType::Header2),
            _ => Err(PacketError::InvalidHeaderType(v)),
        }
    }
}

/// Secondary dispatch byte distinguishing plain data from link-sublayer
/// control, link data, acknowledgements, and the local-command ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextType {
    None = 0x00,
    LinkRequest = 0xA1,
    LinkClose = 0xA2,
    LinkData = 0xA3,
    Ack = 0xA4,
    LocalCommand = 0xFE,
}

impl ContextType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            0x00 => Ok(ContextType::None),
            0xA1 => Ok(ContextType::LinkRequest),
            0xA2 => Ok(ContextType::LinkClose),
            0xA3 => Ok(ContextType::LinkData),
            0xA4 => Ok(ContextType::Ack),
            0xFE => Ok(ContextType::LocalCommand),
            _ => Err(PacketError::InvalidContextType(v)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this context belongs to the link sublayer.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(
            self,
            ContextType::LinkRequest
                | ContextType::LinkClose
                | ContextType::LinkData
                | ContextType::Ack
        )
    }

    /// Whether a frame with this context carries a 16-bit sequence word
    /// ahead of its payload.
    #[must_use]
    pub fn carries_sequence(self) -> bool {
        matches!(self, ContextType::LinkData | ContextType::Ack)
    }
}
