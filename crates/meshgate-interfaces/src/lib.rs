//! Transport drivers for the meshgate stack.
//!
//! The forwarding engine produces actions rather than performing I/O;
//! concrete [`Driver`] implementations bridge those actions to actual
//! sockets and serial ports. This crate holds the driver trait, a UDP
//! datagram driver, and an in-memory channel driver for tests.

pub mod channel;
pub mod error;
pub mod traits;
pub mod udp;

pub use channel::ChannelDriver;
pub use error::InterfaceError;
pub use traits::Driver;
pub use udp::{UdpConfig, UdpDriver};

pub use meshgate_routing::interface::{InterfaceTag, Locator};
