//! Core types, constants, and wire formats for the meshgate stack.
//!
//! This crate defines the protocol enumerations, address newtypes, the
//! official and legacy packet wire formats, and the KISS byte-stuffing
//! framing used on character-oriented transports.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod framing;
pub mod packet;
pub mod types;

pub use constants::{ContextType, DestinationType, HeaderType, PacketType, PropagationType};
pub use error::{FramingError, PacketError};
pub use packet::flags::PacketFlags;
pub use packet::legacy::LinkFrame;
pub use packet::wire::Packet;
pub use types::{DestinationHash, InvalidLength, NodeAddress, PacketIdSource};
