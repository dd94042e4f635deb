//! Interface tags and next-hop locators.
//!
//! The engine never names a concrete transport; it dispatches on
//! [`InterfaceTag`] and carries per-transport addressing as a
//! [`Locator`] variant. Drivers own the actual I/O.

use std::fmt;
use std::net::SocketAddr;

/// Identifies the class of transport a packet arrived on or should
/// leave through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceTag {
    /// Packets originating from this node.
    Local,
    /// Wired serial, KISS-framed.
    Serial,
    /// Bluetooth serial, KISS-framed.
    Bluetooth,
    /// Short-range broadcast radio with MAC-like peer addressing.
    LocalRadio,
    /// IP datagram transport.
    IpDatagram,
    /// Long-range radio (LoRa-class).
    LongRadio,
    /// Audio-frequency modem.
    AudioModem,
}

impl InterfaceTag {
    /// Whether this is a character-oriented transport that needs KISS
    /// framing applied before the driver sees the bytes.
    #[must_use]
    pub fn is_character_oriented(self) -> bool {
        matches!(
            self,
            InterfaceTag::Serial
                | InterfaceTag::Bluetooth
                | InterfaceTag::LongRadio
                | InterfaceTag::AudioModem
        )
    }
}

impl fmt::Display for InterfaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterfaceTag::Local => "local",
            InterfaceTag::Serial => "serial",
            InterfaceTag::Bluetooth => "bluetooth",
            InterfaceTag::LocalRadio => "local-radio",
            InterfaceTag::IpDatagram => "ip-datagram",
            InterfaceTag::LongRadio => "long-radio",
            InterfaceTag::AudioModem => "audio-modem",
        };
        f.write_str(name)
    }
}

/// Transport-specific next-hop addressing carried alongside a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// MAC-like peer address (local radio).
    Mac([u8; 6]),
    /// IP endpoint (datagram transport).
    Socket(SocketAddr),
    /// One-peer transports (serial, bluetooth) need no locator.
    None,
}

impl Locator {
    /// Whether this locator occupies a slot in a driver's bounded peer
    /// table and must be released when its route goes away.
    #[must_use]
    pub fn holds_peer_slot(&self) -> bool {
        matches!(self, Locator::Mac(_))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Mac(mac) => {
                write!(
                    f,
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
                )
            }
            Locator::Socket(addr) => write!(f, "{addr}"),
            Locator::None => f.write_str("-"),
        }
    }
}
