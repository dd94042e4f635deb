//! Legacy link-sublayer wire format.
//!
//! The reliable link sublayer speaks its own dialect with explicit
//! 8-byte source and destination addresses, a 16-bit packet id, and an
//! optional 16-bit sequence word prepended to the payload. The header
//! is 25 bytes; each embedded address is preceded by its type and
//! length octets:
//!
//! ```text
//! [type 1][context 1][packet_id 2 BE][hops 1]
//! [dest_type 1][dest_len 1][dest 8][src_type 1][src_len 1][src 8]
//! [seq 2 BE]?   (present iff context is LINK_DATA or ACK)
//! [data ...]
//! ```
//!
//! This is a distinct type from [`crate::packet::wire::Packet`]; the two
//! forms are never unioned. The only translation between the address
//! spaces is [`crate::types::DestinationHash::prefix`].

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{
    ADDRESS_SIZE, ContextType, DestinationType, LEGACY_FLAG_REQUEST_ACK, LEGACY_HEADER_SIZE,
    LEGACY_TYPE_ACK, LEGACY_TYPE_ANNOUNCE, LEGACY_TYPE_DATA, LEGACY_TYPE_MASK, MAX_PAYLOAD,
};
use crate::error::PacketError;
use crate::types::NodeAddress;

/// Legacy frame type codes (low three bits of the leading byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LegacyType {
    Data = LEGACY_TYPE_DATA,
    Ack = LEGACY_TYPE_ACK,
    Announce = LEGACY_TYPE_ANNOUNCE,
}

impl LegacyType {
    pub fn from_u8(v: u8) -> Result<Self, PacketError> {
        match v {
            LEGACY_TYPE_DATA => Ok(LegacyType::Data),
            LEGACY_TYPE_ACK => Ok(LegacyType::Ack),
            LEGACY_TYPE_ANNOUNCE => Ok(LegacyType::Announce),
            _ => Err(PacketError::InvalidLegacyType(v)),
        }
    }
}

/// A parsed legacy link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct LinkFrame {
    pub frame_type: LegacyType,
    /// Set on data frames that demand acknowledgement.
    pub request_ack: bool,
    pub context: ContextType,
    pub packet_id: u16,
    pub hops: u8,
    pub destination_type: DestinationType,
    pub destination: NodeAddress,
    pub source: NodeAddress,
    /// Present iff the context carries a sequence (LINK_DATA, ACK).
    pub sequence: Option<u16>,
    pub data: Vec<u8>,
}

impl LinkFrame {
    /// A control frame (LINK_REQ or LINK_CLOSE): no sequence, no payload.
    pub fn control(
        context: ContextType,
        destination: NodeAddress,
        source: NodeAddress,
        packet_id: u16,
    ) -> Self {
        Self {
            frame_type: LegacyType::Data,
            request_ack: false,
            context,
            packet_id,
            hops: 0,
            destination_type: DestinationType::Single,
            destination,
            source,
            sequence: None,
            data: Vec::new(),
        }
    }

    /// A sequenced data frame; the request-ack bit is always set.
    pub fn data(
        destination: NodeAddress,
        source: NodeAddress,
        packet_id: u16,
        sequence: u16,
        data: Vec<u8>,
    ) -> Self {
        Self {
            frame_type: LegacyType::Data,
            request_ack: true,
            context: ContextType::LinkData,
            packet_id,
            hops: 0,
            destination_type: DestinationType::Single,
            destination,
            source,
            sequence: Some(sequence),
            data,
        }
    }

    /// An acknowledgement for the given sequence (0 for control frames).
    pub fn ack(
        destination: NodeAddress,
        source: NodeAddress,
        packet_id: u16,
        sequence: u16,
    ) -> Self {
        Self {
            frame_type: LegacyType::Ack,
            request_ack: false,
            context: ContextType::Ack,
            packet_id,
            hops: 0,
            destination_type: DestinationType::Single,
            destination,
            source,
            sequence: Some(sequence),
            data: Vec::new(),
        }
    }

    /// Cheap dialect probe: is this buffer a legacy link frame?
    ///
    /// Byte 1 of a legacy frame is the context, which for link traffic
    /// is always in `0xA1..=0xA4`. In the official form byte 1 is the
    /// hop count, which never exceeds `MAX_HOPS` (15), so the two value
    /// ranges are disjoint.
    #[must_use]
    pub fn looks_like(raw: &[u8]) -> bool {
        raw.len() >= 2
            && ContextType::from_u8(raw[1]).is_ok_and(ContextType::is_link)
            && LegacyType::from_u8(raw[0] & LEGACY_TYPE_MASK).is_ok()
    }

    /// Parse a legacy frame from wire bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, PacketError> {
        if raw.len() < LEGACY_HEADER_SIZE {
            return Err(PacketError::TooShort {
                min: LEGACY_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let frame_type = LegacyType::from_u8(raw[0] & LEGACY_TYPE_MASK)?;
        let request_ack = raw[0] & LEGACY_FLAG_REQUEST_ACK != 0;
        let context = ContextType::from_u8(raw[1])?;
        let packet_id = u16::from_be_bytes([raw[2], raw[3]]);
        let hops = raw[4];
        let destination_type = DestinationType::from_u8(raw[5])?;
        if raw[6] as usize != ADDRESS_SIZE {
            return Err(PacketError::InvalidAddressLength(raw[6]));
        }
        let destination = NodeAddress::try_from(&raw[7..15]).expect("slice is exactly 8 bytes");
        // Source type octet is carried on the wire but always SINGLE.
        DestinationType::from_u8(raw[15])?;
        if raw[16] as usize != ADDRESS_SIZE {
            return Err(PacketError::InvalidAddressLength(raw[16]));
        }
        let source = NodeAddress::try_from(&raw[17..25]).expect("slice is exactly 8 bytes");

        let mut rest = &raw[LEGACY_HEADER_SIZE..];
        let sequence = if context.carries_sequence() {
            if rest.len() < 2 {
                return Err(PacketError::SequenceMissing);
            }
            let seq = u16::from_be_bytes([rest[0], rest[1]]);
            rest = &rest[2..];
            Some(seq)
        } else {
            None
        };

        if rest.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadOversize {
                max: MAX_PAYLOAD,
                actual: rest.len(),
            });
        }

        Ok(LinkFrame {
            frame_type,
            request_ack,
            context,
            packet_id,
            hops,
            destination_type,
            destination,
            source,
            sequence,
            data: rest.to_vec(),
        })
    }

    /// Serialize the frame to wire format.
    ///
    /// Fails if the context demands a sequence that is absent, or the
    /// payload exceeds `MAX_PAYLOAD`. No partial writes.
    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        if self.context.carries_sequence() && self.sequence.is_none() {
            return Err(PacketError::SequenceMissing);
        }
        if self.data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadOversize {
                max: MAX_PAYLOAD,
                actual: self.data.len(),
            });
        }

        let mut result = Vec::with_capacity(LEGACY_HEADER_SIZE + 2 + self.data.len());
        let type_byte = (self.frame_type as u8)
            | if self.request_ack {
                LEGACY_FLAG_REQUEST_ACK
            } else {
                0
            };
        result.push(type_byte);
        result.push(self.context.to_byte());
        result.extend_from_slice(&self.packet_id.to_be_bytes());
        result.push(self.hops);
        result.push(self.destination_type as u8);
        result.push(ADDRESS_SIZE as u8);
        result.extend_from_slice(self.destination.as_ref());
        result.push(DestinationType::Single as u8);
        result.push(ADDRESS_SIZE as u8);
        result.extend_from_slice(self.source.as_ref());
        if self.context.carries_sequence() {
            let seq = self.sequence.expect("checked above");
            result.extend_from_slice(&seq.to_be_bytes());
        }
        result.extend_from_slice(&self.data);
        Ok(result)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_addr() -> impl Strategy<Value = NodeAddress> {
        any::<[u8; 8]>().prop_map(NodeAddress::new)
    }

    fn valid_frame() -> impl Strategy<Value = LinkFrame> {
        (
            any_addr(),
            any_addr(),
            any::<u16>(),
            any::<u16>(),
            proptest::collection::vec(any::<u8>(), 0..=64),
            any::<bool>(),
        )
            .prop_map(|(dest, src, id, seq, data, is_data)| {
                if is_data {
                    LinkFrame::data(dest, src, id, seq, data)
                } else {
                    LinkFrame::ack(dest, src, id, seq)
                }
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn frame_round_trip(frame in valid_frame()) {
            let raw = frame.serialize().unwrap();
            let parsed = LinkFrame::parse(&raw).unwrap();
            prop_assert_eq!(parsed, frame);
        }

        #[test]
        fn arbitrary_bytes_never_panic(raw in proptest::collection::vec(any::<u8>(), 0..300)) {
            let _ = LinkFrame::parse(&raw);
        }
    }
}
