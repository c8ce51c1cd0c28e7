//! Per-connection socat sessions instead of a listening bridge
//!
//! Every forwarded connection runs `socat STDIO UNIX-CONNECT:<socket>` in its
//! own exec channel, so nothing listens on the remote host and there is
//! nothing to clean up afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, Span};

use super::relay::is_shell_safe_path;
use super::BridgeProvisioner;
use crate::error::{Result, TunnelError};
use crate::ssh::{BridgeDialer, RemoteShell, TunnelTransport};

/// Connection method label for stdio forwarding
pub const STDIO_METHOD_LABEL: &str = "SSH Tunnel (socat stdio)";

/// Dials the Docker socket through a fresh `socat` exec per connection
pub struct SocatStdioDialer<T: TunnelTransport> {
    transport: Arc<T>,
    command: String,
    span: Span,
}

impl<T: TunnelTransport> SocatStdioDialer<T> {
    /// Check that socat exists on the host and build the dialer
    pub async fn prepare(transport: Arc<T>, socket_path: &str, span: &Span) -> Result<Self> {
        if !is_shell_safe_path(socket_path) {
            return Err(TunnelError::config(format!(
                "Docker socket path '{}' must be absolute and contain only [A-Za-z0-9/._-]",
                socket_path
            )));
        }

        let host = transport.target().hostname.clone();
        let installed = matches!(
            transport.exec("command -v socat >/dev/null 2>&1").await,
            Ok(output) if output.exit_code == Some(0)
        );
        if !installed {
            return Err(TunnelError::session(format!(
                "socat is not installed on {}, stdio forwarding needs it",
                host
            )));
        }

        BridgeProvisioner::new(transport.clone(), host.clone(), span.clone())
            .with_socket_path(socket_path)
            .check_docker_socket()
            .await;

        info!(parent: span, "Forwarding through socat stdio sessions on {}", host);
        Ok(Self {
            transport,
            command: stdio_command(socket_path),
            span: span.clone(),
        })
    }
}

#[async_trait]
impl<T: TunnelTransport> BridgeDialer for SocatStdioDialer<T> {
    type Stream = <T as BridgeDialer>::Stream;

    async fn dial(&self, _port: u16) -> Result<Self::Stream> {
        debug!(parent: &self.span, "Opening socat stdio session");
        self.transport.exec_stream(&self.command).await
    }
}

/// `socat STDIO UNIX-CONNECT:<socket>`
pub fn stdio_command(socket_path: &str) -> String {
    format!("socat STDIO UNIX-CONNECT:{}", socket_path)
}
