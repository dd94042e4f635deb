//! Byte-stuffing framing for character-oriented transports.

pub mod kiss;
