//! Tunnel lifecycle
//!
//! `SshTunnel` ties the pieces together: it resolves a bridge on the remote
//! host, binds the local listener, verifies the path end to end and, on close,
//! undoes all of it. A tunnel is either fully connected or not returned at all.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn, Span};

use super::config::{ForwardMode, TunnelConfig};
use super::forward::{ForwarderHandle, TunnelForwarder};
use super::verify::TunnelVerifier;
use crate::bridge::{
    cleanup_bridge, probe, BridgeDiscoverer, BridgeProvisioner, BridgeRecord, SocatStdioDialer,
    DEFAULT_METHOD_LABEL, STDIO_METHOD_LABEL,
};
use crate::config::DEFAULT_LOCAL_PORT;
use crate::error::{Result, TunnelError};
use crate::ssh::{SshSessionClient, TunnelTransport};

/// Where a tunnel is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    Idle,
    Authenticating,
    BridgeResolving,
    TunnelBinding,
    Verifying,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A connected tunnel from a local port to the remote Docker socket
pub struct SshTunnel<T: TunnelTransport = SshSessionClient> {
    transport: Arc<T>,
    config: TunnelConfig,
    forwarder: Option<ForwarderHandle>,
    bridge: Option<BridgeRecord>,
    method: String,
    local_port: u16,
    phase: TunnelPhase,
    history: Vec<TunnelPhase>,
    span: Span,
}

impl SshTunnel<SshSessionClient> {
    /// Connect over SSH and bring the tunnel up
    pub async fn connect(config: TunnelConfig, span: Span) -> Result<Self> {
        info!(parent: &span, "Tunnel phase: {}", TunnelPhase::Authenticating);
        let session = SshSessionClient::connect(&config, span.clone()).await?;
        Self::start(Arc::new(session), config, span, true).await
    }
}

impl<T: TunnelTransport> SshTunnel<T> {
    /// Bring the tunnel up over an already authenticated transport
    ///
    /// Any failure rolls back what was done so far, including the transport.
    pub async fn establish(transport: Arc<T>, config: TunnelConfig, span: Span) -> Result<Self> {
        Self::start(transport, config, span, false).await
    }

    async fn start(
        transport: Arc<T>,
        config: TunnelConfig,
        span: Span,
        authenticated: bool,
    ) -> Result<Self> {
        let mut tunnel = Self {
            transport,
            config,
            forwarder: None,
            bridge: None,
            method: DEFAULT_METHOD_LABEL.to_string(),
            local_port: 0,
            phase: TunnelPhase::Idle,
            history: vec![TunnelPhase::Idle],
            span,
        };
        if authenticated {
            // logged by connect() before the session existed
            tunnel.phase = TunnelPhase::Authenticating;
            tunnel.history.push(TunnelPhase::Authenticating);
        }

        match tunnel.bring_up().await {
            Ok(()) => {
                tunnel.set_phase(TunnelPhase::Connected);
                info!(
                    parent: &tunnel.span,
                    "Tunnel ready: {} via {}",
                    tunnel.local_proxy_host(),
                    tunnel.connection_method()
                );
                Ok(tunnel)
            }
            Err(e) => {
                error!(parent: &tunnel.span, "Tunnel setup failed: {}", e);
                tunnel.rollback().await;
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> Result<()> {
        self.set_phase(TunnelPhase::BridgeResolving);
        let forwarder = match self.config.forward_mode {
            ForwardMode::Bridge => {
                let bridge = self.resolve_bridge().await?;
                let bridge_port = bridge.remote_port;
                self.method = bridge.method.clone();
                self.bridge = Some(bridge);

                self.set_phase(TunnelPhase::TunnelBinding);
                TunnelForwarder::new(self.transport.clone(), bridge_port, self.span.clone())
                    .listen(self.config.local_port)
                    .await?
            }
            ForwardMode::SocatStdio => {
                let dialer = SocatStdioDialer::prepare(
                    self.transport.clone(),
                    &self.config.socket_path,
                    &self.span,
                )
                .await?;
                self.method = STDIO_METHOD_LABEL.to_string();

                self.set_phase(TunnelPhase::TunnelBinding);
                // the port is unused, every dial runs socat against the socket
                TunnelForwarder::new(Arc::new(dialer), 0, self.span.clone())
                    .listen(self.config.local_port)
                    .await?
            }
        };
        self.local_port = forwarder.port();
        self.forwarder = Some(forwarder);

        self.set_phase(TunnelPhase::Verifying);
        TunnelVerifier::new(self.config.verify, self.span.clone())
            .verify(self.local_port)
            .await
    }

    async fn resolve_bridge(&self) -> Result<BridgeRecord> {
        let provisioner = BridgeProvisioner::new(
            self.transport.clone(),
            self.transport.target().hostname.clone(),
            self.span.clone(),
        )
        .with_socket_path(self.config.socket_path.clone())
        .with_settle_delay(self.config.settle_delay);

        if let Some(port) = self.config.remote_port {
            if probe::is_listening(self.transport.as_ref(), port, &self.span).await == Some(true) {
                info!(parent: &self.span, "Using existing bridge on requested port {}", port);
                return Ok(BridgeRecord::discovered(port));
            }
            return provisioner.with_remote_port(port).provision().await;
        }

        let discoverer = BridgeDiscoverer::new(self.transport.clone(), self.span.clone());
        match discoverer.find_existing().await {
            Some(port) => Ok(BridgeRecord::discovered(port)),
            None => {
                info!(parent: &self.span, "No existing bridge, provisioning one");
                provisioner.provision().await
            }
        }
    }

    async fn rollback(&mut self) {
        if let Some(mut forwarder) = self.forwarder.take() {
            if let Err(e) = forwarder.shutdown().await {
                warn!(parent: &self.span, "Rollback: {}", e);
            }
        }
        if let Some(bridge) = &self.bridge {
            cleanup_bridge(self.transport.as_ref(), bridge, &self.span).await;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(parent: &self.span, "Rollback: {}", e);
        }
        self.set_phase(TunnelPhase::Closed);
    }

    /// Tear the tunnel down; a second call does nothing
    ///
    /// Every step runs even when an earlier one fails. Remote cleanup problems
    /// are logged, listener and disconnect failures are returned together.
    pub async fn close(&mut self) -> Result<()> {
        if self.phase == TunnelPhase::Closed {
            return Ok(());
        }
        self.set_phase(TunnelPhase::Closing);

        let mut errors = Vec::new();

        if let Some(mut forwarder) = self.forwarder.take() {
            if let Err(e) = forwarder.shutdown().await {
                errors.push(format!("listener: {}", e));
            }
        }

        if let Some(bridge) = &self.bridge {
            cleanup_bridge(self.transport.as_ref(), bridge, &self.span).await;
        }

        if let Err(e) = self.transport.disconnect().await {
            errors.push(format!("ssh: {}", e));
        }

        self.set_phase(TunnelPhase::Closed);

        if errors.is_empty() {
            Ok(())
        } else {
            error!(parent: &self.span, "Tunnel close incomplete: {}", errors.join("; "));
            Err(TunnelError::Close(errors))
        }
    }

    fn set_phase(&mut self, phase: TunnelPhase) {
        info!(parent: &self.span, "Tunnel phase: {}", phase);
        self.phase = phase;
        self.history.push(phase);
    }

    pub fn phase(&self) -> TunnelPhase {
        self.phase
    }

    /// Every phase entered so far, oldest first
    pub fn phase_history(&self) -> &[TunnelPhase] {
        &self.history
    }

    /// Bound local port, 0 before binding
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// `tcp://127.0.0.1:<port>` for the Docker client
    pub fn local_proxy_host(&self) -> String {
        local_proxy_host(Some(self))
    }

    /// Label of the relay or forwarding mode in use
    pub fn connection_method(&self) -> &str {
        &self.method
    }

    pub fn bridge(&self) -> Option<&BridgeRecord> {
        self.bridge.as_ref()
    }

    /// `SSH Client: user@host:port`
    pub fn connection_info(&self) -> String {
        format!("SSH Client: {}", self.transport.target())
    }
}

impl<T: TunnelTransport> fmt::Debug for SshTunnel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTunnel")
            .field("target", self.transport.target())
            .field("local_port", &self.local_port)
            .field("bridge", &self.bridge)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Docker host URL for an optional tunnel
pub fn local_proxy_host<T: TunnelTransport>(tunnel: Option<&SshTunnel<T>>) -> String {
    match tunnel {
        None => proxy_url(0),
        Some(tunnel) if tunnel.local_port == 0 => proxy_url(DEFAULT_LOCAL_PORT),
        Some(tunnel) => proxy_url(tunnel.local_port),
    }
}

fn proxy_url(port: u16) -> String {
    format!("tcp://127.0.0.1:{}", port)
}
