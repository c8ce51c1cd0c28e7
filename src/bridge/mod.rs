//! Remote Docker bridge
//!
//! A bridge is a process on the Docker host listening on a loopback TCP port
//! and relaying bytes to the Docker Unix socket. An existing bridge is reused
//! when one is found; otherwise one is started with the first relay tool that
//! works, and stopped again when the tunnel closes.

use std::fmt;

pub mod cleanup;
pub mod discover;
pub mod probe;
pub mod provision;
pub mod relay;
pub mod stdio;

#[cfg(test)]
pub(crate) mod testing;

pub use cleanup::cleanup_bridge;
pub use discover::{BridgeDiscoverer, DISCOVERY_PORTS};
pub use provision::{BridgeProvisioner, PORT_RANGE_END, PORT_RANGE_START};
pub use relay::{RelayMethod, RelayTier, RELAY_METHODS};
pub use stdio::{SocatStdioDialer, STDIO_METHOD_LABEL};

/// Label used when no relay was started
pub const DEFAULT_METHOD_LABEL: &str = "SSH Tunnel";

/// PID of the remote relay process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePid {
    Known(String),
    Unknown,
}

impl RemotePid {
    /// `Known` when `raw` is a plain, non-zero decimal PID
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && raw != "0" {
            Some(Self::Known(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_known(&self) -> Option<&str> {
        match self {
            Self::Known(pid) => Some(pid),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for RemotePid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(pid) => f.write_str(pid),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Whether the bridge was found or started by us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOrigin {
    Discovered,
    Provisioned,
}

/// A bridge the tunnel forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRecord {
    /// Loopback port on the Docker host
    pub remote_port: u16,

    /// Relay process, `Unknown` for discovered bridges
    pub remote_pid: RemotePid,

    /// Connection method label, e.g. `SSH Tunnel (socat)`
    pub method: String,

    /// Relay tool name, empty for discovered bridges
    pub relay: String,

    pub origin: BridgeOrigin,
}

impl BridgeRecord {
    /// A bridge that was already listening
    pub fn discovered(remote_port: u16) -> Self {
        Self {
            remote_port,
            remote_pid: RemotePid::Unknown,
            method: DEFAULT_METHOD_LABEL.to_string(),
            relay: String::new(),
            origin: BridgeOrigin::Discovered,
        }
    }

    /// A bridge started with `method`
    pub fn provisioned(remote_port: u16, remote_pid: RemotePid, method: &RelayMethod) -> Self {
        Self {
            remote_port,
            remote_pid,
            method: method.label(),
            relay: method.name.to_string(),
            origin: BridgeOrigin::Provisioned,
        }
    }

    /// Only provisioned bridges are ours to stop
    pub fn needs_cleanup(&self) -> bool {
        self.origin == BridgeOrigin::Provisioned
    }
}
