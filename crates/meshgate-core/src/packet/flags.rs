//! Packet flag byte encoding and decoding.
//!
//! The flag byte layout, LSB first:
//! ```text
//! Bits 0-1: packet_type (0=DATA, 1=ANNOUNCE, 2=LINKREQUEST, 3=PROOF)
//! Bits 2-3: destination_type (0=SINGLE, 1=GROUP, 2=PLAIN, 3=LINK)
//! Bit 4:    propagation_type (0=BROADCAST, 1=TRANSPORT)
//! Bit 5:    context_flag
//! Bit 6:    header_type (0=HEADER_1, 1=HEADER_2)
//! Bit 7:    ifac_flag
//! ```

use crate::constants::{DestinationType, HeaderType, PacketType, PropagationType};
use crate::error::PacketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFlags {
    pub packet_type: PacketType,
    pub destination_type: DestinationType,
    pub propagation_type: PropagationType,
    pub context_flag: bool,
    pub header_type: HeaderType,
    pub ifac_flag: bool,
}

impl PacketFlags {
    pub fn from_byte(byte: u8) -> Result<Self, PacketError> {
        let packet_type = PacketType::from_u8(byte & 0x03)?;
        let destination_type = DestinationType::from_u8((byte >> 2) & 0x03)?;
        let propagation_type = PropagationType::from_u8((byte >> 4) & 0x01)?;
        let context_flag = (byte >> 5) & 0x01 != 0;
        let header_type = HeaderType::from_u8((byte >> 6) & 0x01)?;
        let ifac_flag = (byte >> 7) & 0x01 != 0;

        Ok(PacketFlags {
            packet_type,
            destination_type,
            propagation_type,
            context_flag,
            header_type,
            ifac_flag,
        })
    }

    pub fn to_byte(&self) -> u8 {
        (self.packet_type as u8)
            | ((self.destination_type as u8) << 2)
            | ((self.propagation_type as u8) << 4)
            | ((self.context_flag as u8) << 5)
            | ((self.header_type as u8) << 6)
            | ((self.ifac_flag as u8) << 7)
    }

    /// Flags for a plain single-header packet with no context flag or IFAC.
    pub fn plain(
        packet_type: PacketType,
        destination_type: DestinationType,
        propagation_type: PropagationType,
    ) -> Self {
        Self {
            packet_type,
            destination_type,
            propagation_type,
            context_flag: false,
            header_type: HeaderType::Header1,
            ifac_flag: false,
        }
    }
}
