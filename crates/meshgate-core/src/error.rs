//! Error types for the meshgate-core crate.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    TooShort { min: usize, actual: usize },
    PayloadOversize { max: usize, actual: usize },
    InvalidHeaderType(u8),
    UnsupportedHeaderType,
    InvalidPropagationType(u8),
    InvalidDestinationType(u8),
    InvalidPacketType(u8),
    InvalidContextType(u8),
    InvalidLegacyType(u8),
    InvalidAddressLength(u8),
    SequenceMissing,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TooShort { min, actual } => {
                write!(
                    f,
                    "packet too short: need at least {min} bytes, got {actual}"
                )
            }
            PacketError::PayloadOversize { max, actual } => {
                write!(f, "payload oversize: max {max} bytes, got {actual}")
            }
            PacketError::InvalidHeaderType(v) => write!(f, "invalid header type: {v}"),
            PacketError::UnsupportedHeaderType => {
                write!(f, "transport (two-address) headers are not supported")
            }
            PacketError::InvalidPropagationType(v) => {
                write!(f, "invalid propagation type: {v}")
            }
            PacketError::InvalidDestinationType(v) => {
                write!(f, "invalid destination type: {v}")
            }
            PacketError::InvalidPacketType(v) => write!(f, "invalid packet type: {v}"),
            PacketError::InvalidContextType(v) => write!(f, "invalid context type: {v}"),
            PacketError::InvalidLegacyType(v) => write!(f, "invalid legacy header type: {v}"),
            PacketError::InvalidAddressLength(v) => {
                write!(f, "invalid embedded address length: {v}")
            }
            PacketError::SequenceMissing => {
                write!(f, "context requires a sequence number but payload is too short")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PacketError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    MissingDelimiter,
    IncompleteEscape,
    InvalidEscapeSequence(u8),
    FrameOverflow { max: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::MissingDelimiter => write!(f, "missing frame delimiter"),
            FramingError::IncompleteEscape => write!(f, "incomplete escape sequence"),
            FramingError::InvalidEscapeSequence(v) => {
                write!(f, "invalid escape sequence: 0x{v:02x}")
            }
            FramingError::FrameOverflow { max } => {
                write!(f, "frame exceeds maximum length of {max} bytes")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FramingError {}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn test_packet_error_display_all_variants() {
        let variants: &[PacketError] = &[
            PacketError::TooShort { min: 19, actual: 5 },
            PacketError::PayloadOversize {
                max: 200,
                actual: 300,
            },
            PacketError::InvalidHeaderType(0x02),
            PacketError::UnsupportedHeaderType,
            PacketError::InvalidPropagationType(0x02),
            PacketError::InvalidDestinationType(0x04),
            PacketError::InvalidPacketType(0x05),
            PacketError::InvalidContextType(0x10),
            PacketError::InvalidLegacyType(0x07),
            PacketError::InvalidAddressLength(0x09),
            PacketError::SequenceMissing,
        ];
        for v in variants {
            let msg = v.to_string();
            assert!(!msg.is_empty(), "{v:?} should have non-empty Display");
        }
    }

    #[test]
    fn test_framing_error_display_all_variants() {
        let variants: &[FramingError] = &[
            FramingError::MissingDelimiter,
            FramingError::IncompleteEscape,
            FramingError::InvalidEscapeSequence(0xAB),
            FramingError::FrameOverflow { max: 276 },
        ];
        for v in variants {
            let msg = v.to_string();
            assert!(!msg.is_empty(), "{v:?} should have non-empty Display");
        }
    }
}
