//! KISS byte-stuffing framing.
//!
//! Frame format: FEND + CMD_DATA(0x00) + escaped(data) + FEND. Encoding
//! is a pure function; decoding is a byte-at-a-time state machine fed
//! from the serial read loop. Empty stretches of FEND bytes between
//! frames are valid padding, and command bytes other than CMD_DATA are
//! recognized transport-control prefixes that get consumed silently.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::MAX_FRAME;

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;
pub const CMD_DATA: u8 = 0x00;

/// Escape special bytes using KISS byte-stuffing.
///
/// Replaces FEND (0xC0) with FESC + TFEND, and FESC (0xDB) with FESC + TFESC.
pub fn kiss_escape(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    for &byte in data {
        match byte {
            FEND => {
                result.push(FESC);
                result.push(TFEND);
            }
            FESC => {
                result.push(FESC);
                result.push(TFESC);
            }
            _ => result.push(byte),
        }
    }
    result
}

/// Frame data with KISS delimiters: FEND + CMD_DATA + escape(data) + FEND.
pub fn kiss_frame(data: &[u8]) -> Vec<u8> {
    let escaped = kiss_escape(data);
    let mut framed = Vec::with_capacity(escaped.len() + 3);
    framed.push(FEND);
    framed.push(CMD_DATA);
    framed.extend_from_slice(&escaped);
    framed.push(FEND);
    framed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Discarding bytes until the next FEND (initial state, and the
    /// recovery state after a malformed escape or overflow).
    Idle,
    /// FEND seen; the next non-FEND byte is the command byte.
    AwaitCommand,
    InFrame,
    AfterEscape,
}

/// Stateful byte-at-a-time KISS frame decoder.
///
/// Malformed escapes and oversize frames discard the frame in progress
/// and resynchronize on the next FEND; the stream itself is never
/// poisoned.
#[must_use]
pub struct KissDecoder {
    state: DecoderState,
    buffer: Vec<u8>,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            buffer: Vec::new(),
        }
    }

    /// Feed one byte; returns a completed frame when this byte ends one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == FEND {
            let done = match self.state {
                DecoderState::InFrame if !self.buffer.is_empty() => {
                    Some(core::mem::take(&mut self.buffer))
                }
                DecoderState::AfterEscape => {
                    // Frame cut off mid-escape: malformed, drop it.
                    #[cfg(feature = "std")]
                    tracing::warn!("kiss: frame ended inside escape sequence, discarding");
                    self.buffer.clear();
                    None
                }
                _ => None,
            };
            self.state = DecoderState::AwaitCommand;
            return done;
        }

        match self.state {
            DecoderState::Idle => {}
            DecoderState::AwaitCommand => {
                // Command byte: CMD_DATA for data frames; other values
                // are transport-control commands we swallow.
                self.state = DecoderState::InFrame;
            }
            DecoderState::InFrame => {
                if byte == FESC {
                    self.state = DecoderState::AfterEscape;
                } else {
                    self.accept(byte);
                }
            }
            DecoderState::AfterEscape => match byte {
                TFEND => {
                    self.state = DecoderState::InFrame;
                    self.accept(FEND);
                }
                TFESC => {
                    self.state = DecoderState::InFrame;
                    self.accept(FESC);
                }
                other => {
                    #[cfg(feature = "std")]
                    tracing::warn!("kiss: invalid escape byte 0x{other:02x}, discarding frame");
                    let _ = other;
                    self.reset();
                }
            },
        }
        None
    }

    /// Feed a chunk of stream data; returns all frames it completes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in data {
            if let Some(frame) = self.push(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    fn accept(&mut self, byte: u8) {
        if self.buffer.len() >= MAX_FRAME {
            #[cfg(feature = "std")]
            tracing::warn!(max = MAX_FRAME, "kiss: frame overflow, discarding");
            self.reset();
        } else {
            self.buffer.push(byte);
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecoderState::Idle;
    }
}

impl Default for KissDecoder {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn decode_encode_identity(data in proptest::collection::vec(any::<u8>(), 0..=MAX_FRAME / 2)) {
            let framed = kiss_frame(&data);
            let frames = KissDecoder::new().feed(&framed);
            if data.is_empty() {
                // An empty frame has nothing to emit.
                prop_assert!(frames.is_empty());
            } else {
                prop_assert_eq!(frames, vec![data]);
            }
        }

        #[test]
        fn encode_is_injective_on_samples(
            a in proptest::collection::vec(any::<u8>(), 0..64),
            b in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(kiss_frame(&a), kiss_frame(&b));
        }

        #[test]
        fn arbitrary_stream_never_panics(stream in proptest::collection::vec(any::<u8>(), 0..1024)) {
            let mut decoder = KissDecoder::new();
            let _ = decoder.feed(&stream);
        }
    }
}
