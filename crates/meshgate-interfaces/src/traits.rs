//! The driver trait the core consumes.

use meshgate_routing::interface::{InterfaceTag, Locator};

use crate::error::InterfaceError;

/// Trait implemented by all transport drivers (UDP, serial, radio...).
///
/// The protocol engines produce raw packet bytes as actions rather than
/// performing I/O directly; drivers bridge that to the wire. Framing is
/// applied upstream for character transports (see
/// [`InterfaceTag::is_character_oriented`]), so `send` always receives
/// a complete, already-framed buffer.
pub trait Driver: Send + Sync {
    // -- Identity --

    /// Human-readable name (e.g. "udp[0.0.0.0:4242]").
    fn name(&self) -> &str;

    /// Which class of transport this driver is.
    fn tag(&self) -> InterfaceTag;

    // -- Capabilities --

    /// Whether the driver is started and operational.
    fn is_up(&self) -> bool;

    /// The locator to use when no route is known.
    fn broadcast_locator(&self) -> Locator;

    // -- Peer allowlist (transports with a bounded peer table) --

    /// Admit a peer into the driver's allowlist. Default: no table.
    fn add_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        let _ = locator;
        Ok(())
    }

    /// Release a peer's slot. Default: no table.
    fn remove_peer(&self, locator: &Locator) -> Result<(), InterfaceError> {
        let _ = locator;
        Ok(())
    }

    /// Whether the peer currently holds a slot. Default: no table.
    fn has_peer(&self, locator: &Locator) -> bool {
        let _ = locator;
        false
    }

    // -- Async I/O --

    /// Start the driver (bind sockets, open ports, spawn read loops).
    fn start(&mut self) -> impl Future<Output = Result<(), InterfaceError>> + Send;

    /// Stop the driver and release resources. Takes `&self` because a
    /// started driver is shared between the node loop and its receive
    /// bridge; all drivers keep their teardown state interior-mutable.
    fn stop(&self) -> impl Future<Output = Result<(), InterfaceError>> + Send;

    /// Emit one packet. `locator` targets a specific peer; `None` means
    /// the broadcast locator.
    fn send(
        &self,
        raw: &[u8],
        locator: Option<&Locator>,
    ) -> impl Future<Output = Result<(), InterfaceError>> + Send;

    /// Receive the next packet and the locator it came from.
    fn receive(&self) -> impl Future<Output = Result<(Vec<u8>, Locator), InterfaceError>> + Send;
}
