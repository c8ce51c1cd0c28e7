//! docker-ssh-tunnel - Reach a remote Docker daemon through SSH
//!
//! The remote daemon usually listens only on a Unix socket. This crate opens an
//! authenticated SSH session, finds or starts a TCP relay in front of that
//! socket on the remote host, and forwards a local TCP port to it through
//! `direct-tcpip` channels. Any Docker client can then use
//! `DOCKER_HOST=tcp://127.0.0.1:<port>`.
//!
//! # Features
//!
//! - Key, password and interactive password authentication
//! - Reuse of an existing relay on ports 2375-2379
//! - Relay provisioning with socat, nc, netcat, python3, python or bash
//! - `GET /_ping` verification before the tunnel is reported ready
//! - Cleanup of provisioned relays on close
//! - Optional per-connection `socat` sessions instead of a remote relay
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! docker-ssh-tunnel --host=ops@docker.lan
//! DOCKER_HOST=tcp://127.0.0.1:2375 docker ps
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use docker_ssh_tunnel::{HostSpec, SshTunnel, TunnelConfig};
//!
//! # async fn run() -> docker_ssh_tunnel::Result<()> {
//! let host: HostSpec = "ops@docker.lan".parse()?;
//! let mut tunnel = SshTunnel::connect(TunnelConfig::new(host), tracing::Span::none()).await?;
//! println!("DOCKER_HOST={}", tunnel.local_proxy_host());
//! tunnel.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ssh;
pub mod tunnel;

// Re-exports for convenience
pub use bridge::{BridgeOrigin, BridgeRecord, RemotePid};
pub use config::{Args, Config, Mode};
pub use diagnostics::{diagnose_connection, validate_host_spec};
pub use error::{Result, TunnelError};
pub use ssh::{parse_host, AuthOptions, HostKeyPolicy, HostSpec, SshSessionClient};
pub use tunnel::{local_proxy_host, ForwardMode, SshTunnel, TunnelConfig, TunnelPhase};
