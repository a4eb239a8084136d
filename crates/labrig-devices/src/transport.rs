//! Transport collaborator seam.
//!
//! Devices talk to hardware through an opaque command transport supplied by
//! an external collaborator (serial console, SSH session, telnet bridge).
//! The core never implements a wire protocol; health checks, dynamic
//! properties, and capability flavors call [`CommandTransport::send_command`]
//! and interpret the textual response. Calls block for their full duration;
//! any timeout is enforced by the transport itself.

use std::sync::Arc;

use labrig_core::Result;

/// Blocking command/response channel to one device.
pub trait CommandTransport: Send + Sync {
    /// Sends a command and returns the device's response.
    fn send_command(&self, command: &str) -> Result<String>;
}

/// Opens transports for device factories, keyed by communication address.
pub trait TransportOpener: Send + Sync {
    /// Opens (or reuses) a transport to the given address.
    fn open(&self, address: &str) -> Result<Arc<dyn CommandTransport>>;
}
