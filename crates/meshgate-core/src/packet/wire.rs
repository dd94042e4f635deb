//! Official packet wire format.
//!
//! Layout: `[flags 1][hops 1][dest_hash 16][context 1][data 0..MAX_PAYLOAD]`,
//! 19 bytes of header plus up to `MAX_PAYLOAD` bytes of payload. Multi-byte
//! integers elsewhere in the protocol are big-endian; this header has none.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{ContextType, HEADER_SIZE, HeaderType, MAX_PAYLOAD};
use crate::error::PacketError;
use crate::packet::flags::PacketFlags;
use crate::types::DestinationHash;

/// A parsed official-form packet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Packet {
    pub flags: PacketFlags,
    pub hops: u8,
    pub destination: DestinationHash,
    pub context: ContextType,
    pub data: Vec<u8>,
}

impl Packet {
    /// Parse a packet from wire bytes.
    ///
    /// Rejects short buffers, oversize payloads, transport (HEADER_2)
    /// headers, and unknown enumeration values. Never partially
    /// populates the result.
    pub fn parse(raw: &[u8]) -> Result<Self, PacketError> {
        if raw.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                min: HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let flags = PacketFlags::from_byte(raw[0])?;
        if flags.header_type == HeaderType::Header2 {
            return Err(PacketError::UnsupportedHeaderType);
        }

        let data_len = raw.len() - HEADER_SIZE;
        if data_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadOversize {
                max: MAX_PAYLOAD,
                actual: data_len,
            });
        }

        let hops = raw[1];
        let dest_bytes: [u8; 16] = raw[2..18].try_into().expect("slice is exactly 16 bytes");
        let destination = DestinationHash::new(dest_bytes);
        let context = ContextType::from_u8(raw[18])?;
        let data = raw[HEADER_SIZE..].to_vec();

        Ok(Packet {
            flags,
            hops,
            destination,
            context,
            data,
        })
    }

    /// Serialize the packet to wire format.
    ///
    /// Output is exactly `HEADER_SIZE + data.len()` bytes, or an error
    /// if the payload exceeds `MAX_PAYLOAD`. No partial writes.
    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadOversize {
                max: MAX_PAYLOAD,
                actual: self.data.len(),
            });
        }

        let mut result = Vec::with_capacity(HEADER_SIZE + self.data.len());
        result.push(self.flags.to_byte());
        result.push(self.hops);
        result.extend_from_slice(self.destination.as_ref());
        result.push(self.context.to_byte());
        result.extend_from_slice(&self.data);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DestinationType, PacketType, PropagationType};

    fn make_packet(data: &[u8]) -> Packet {
        Packet {
            flags: PacketFlags::plain(
                PacketType::Data,
                DestinationType::Plain,
                PropagationType::Broadcast,
            ),
            hops: 0,
            destination: DestinationHash::new([
                0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
                0x0D, 0x0E, 0x0F,
            ]),
            context: ContextType::None,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_hello_round_trip() {
        // dest_hash 00..0f, data "Hello", DATA/PLAIN/BROADCAST, hops 0
        let packet = make_packet(b"Hello");
        let raw = packet.serialize().unwrap();
        assert_eq!(raw.len(), 24);
        assert_eq!(raw[0], 0x08); // PLAIN = 2 << 2
        assert_eq!(raw[1], 0);
        assert_eq!(&raw[2..18], packet.destination.as_ref());
        assert_eq!(raw[18], 0x00);
        assert_eq!(&raw[19..], b"Hello");

        let parsed = Packet::parse(&raw).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_packet_too_short() {
        let result = Packet::parse(&[0x00; 5]);
        assert!(matches!(
            result,
            Err(PacketError::TooShort { min: 19, actual: 5 })
        ));
    }

    #[test]
    fn test_header2_rejected() {
        let mut raw = vec![0x00; HEADER_SIZE];
        raw[0] = 0x40; // header_type bit
        assert!(matches!(
            Packet::parse(&raw),
            Err(PacketError::UnsupportedHeaderType)
        ));
    }

    #[test]
    fn test_oversize_payload_rejected_both_directions() {
        let packet = make_packet(&[0xAA; MAX_PAYLOAD + 1]);
        assert!(matches!(
            packet.serialize(),
            Err(PacketError::PayloadOversize { .. })
        ));

        let raw = vec![0x00; HEADER_SIZE + MAX_PAYLOAD + 1];
        assert!(matches!(
            Packet::parse(&raw),
            Err(PacketError::PayloadOversize { .. })
        ));
    }

    #[test]
    fn test_max_payload_accepted() {
        let packet = make_packet(&[0x55; MAX_PAYLOAD]);
        let raw = packet.serialize().unwrap();
        assert_eq!(raw.len(), HEADER_SIZE + MAX_PAYLOAD);
        assert_eq!(Packet::parse(&raw).unwrap(), packet);
    }

    #[test]
    fn test_empty_payload() {
        let packet = make_packet(&[]);
        let raw = packet.serialize().unwrap();
        assert_eq!(raw.len(), HEADER_SIZE);
        let parsed = Packet::parse(&raw).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_unknown_context_rejected() {
        let mut raw = vec![0x00; HEADER_SIZE];
        raw[18] = 0x42;
        assert!(matches!(
            Packet::parse(&raw),
            Err(PacketError::InvalidContextType(0x42))
        ));
    }
}
