//! Error types for the link sublayer.

/// Errors surfaced to callers of the link API.
///
/// None of these change link state: a refused send leaves the machine
/// exactly where it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The one-packet window is occupied; retry after the ACK.
    #[error("link busy: a frame is already awaiting acknowledgement")]
    Saturated,

    /// The link table is at capacity and this send would create a link.
    #[error("link admission refused: {active} of {max} links active")]
    AdmissionRefused { active: usize, max: usize },

    /// Payload exceeds what fits beside the sequence word.
    #[error("link payload oversize: max {max} bytes, got {actual}")]
    PayloadOversize { max: usize, actual: usize },
}
