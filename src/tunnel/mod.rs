//! Local end of the tunnel
//!
//! Listener, forwarding, verification and the lifecycle that drives them.

pub mod config;
pub mod forward;
pub mod lifecycle;
pub mod verify;

pub use config::{ForwardMode, TunnelConfig};
pub use forward::{ForwarderHandle, TunnelForwarder};
pub use lifecycle::{local_proxy_host, SshTunnel, TunnelPhase};
pub use verify::{TunnelVerifier, VerifyOptions};
