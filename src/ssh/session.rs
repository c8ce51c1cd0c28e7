//! SSH session client
//!
//! Owns one authenticated russh connection. Each remote command gets its own
//! exec channel and each forwarded connection its own `direct-tcpip` channel,
//! so the handle is shared through `&self` without a lock.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, error, info, Span};

use super::auth::{authenticate, AuthMaterial};
use super::command::{collect_output, CommandOutput, RemoteShell};
use super::handler::SshHandler;
use super::host::{validate_hostname, HostSpec};
use crate::error::{Result, TunnelError};
use crate::tunnel::TunnelConfig;

/// Something that can open a byte stream to a port on the remote loopback
#[async_trait]
pub trait BridgeDialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to `127.0.0.1:<port>` as seen from the remote host
    async fn dial(&self, port: u16) -> Result<Self::Stream>;
}

/// Everything the tunnel lifecycle needs from the remote side
#[async_trait]
pub trait TunnelTransport: RemoteShell + BridgeDialer {
    /// The host this transport is connected to
    fn target(&self) -> &HostSpec;

    /// Run `command` and hand back its stdin/stdout as a byte stream
    async fn exec_stream(&self, command: &str) -> Result<<Self as BridgeDialer>::Stream>;

    /// Close the underlying connection
    async fn disconnect(&self) -> Result<()>;
}

/// Authenticated SSH connection to the Docker host
pub struct SshSessionClient {
    handle: Handle<SshHandler>,
    target: HostSpec,
    span: Span,
}

impl SshSessionClient {
    /// Resolve the host, dial it within the connect timeout, and authenticate
    pub async fn connect(config: &TunnelConfig, span: Span) -> Result<Self> {
        let target = config.host.clone();
        let port = target.port_number();

        validate_hostname(&target.hostname).await?;
        let material = AuthMaterial::resolve(&config.auth, &span);

        info!(parent: &span, "Connecting to SSH server {}:{}...", target.hostname, port);

        let handler = SshHandler::new(&target.hostname, port, config.host_key_policy, span.clone());
        let ssh_config = Arc::new(client::Config::default());

        let connect = client::connect(ssh_config, (target.hostname.as_str(), port), handler);
        let mut handle = match timeout(config.connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                error!(parent: &span, "SSH connection failed: {}", e);
                return Err(TunnelError::connection(format!(
                    "failed to connect to {}:{}: {}",
                    target.hostname, port, e
                )));
            }
            Err(_) => {
                error!(parent: &span, "SSH connection timeout after {:?}", config.connect_timeout);
                return Err(TunnelError::connection(format!(
                    "connection to {}:{} timed out after {}s",
                    target.hostname,
                    port,
                    config.connect_timeout.as_secs()
                )));
            }
        };

        if let Err(e) =
            authenticate(&mut handle, &target.username, &target.hostname, &material, &span).await
        {
            error!(parent: &span, "{}", e);
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(e);
        }

        info!(parent: &span, "Connected to {}", target);

        Ok(Self {
            handle,
            target,
            span,
        })
    }

    /// `user@host:port` of the connected server
    pub fn target(&self) -> &HostSpec {
        &self.target
    }

    /// Whether the connection has been torn down
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

#[async_trait]
impl RemoteShell for SshSessionClient {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        debug!(parent: &self.span, "exec: {}", command);

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TunnelError::session(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TunnelError::session(format!("failed to exec '{}': {}", command, e)))?;

        let output = collect_output(channel).await;
        debug!(
            parent: &self.span,
            "exit_code={:?}, stdout_len={}, stderr_len={}",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(output)
    }
}

#[async_trait]
impl BridgeDialer for SshSessionClient {
    type Stream = ChannelStream<Msg>;

    async fn dial(&self, port: u16) -> Result<Self::Stream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip("127.0.0.1", u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                TunnelError::session(format!("failed to open direct-tcpip to port {}: {}", port, e))
            })?;

        Ok(channel.into_stream())
    }
}

#[async_trait]
impl TunnelTransport for SshSessionClient {
    fn target(&self) -> &HostSpec {
        &self.target
    }

    async fn exec_stream(&self, command: &str) -> Result<ChannelStream<Msg>> {
        debug!(parent: &self.span, "exec (stream): {}", command);

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TunnelError::session(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TunnelError::session(format!("failed to exec '{}': {}", command, e)))?;

        Ok(channel.into_stream())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.handle.is_closed() {
            return Ok(());
        }

        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| TunnelError::connection(format!("failed to disconnect: {}", e)))?;

        info!(parent: &self.span, "SSH connection closed");
        Ok(())
    }
}

impl std::fmt::Debug for SshSessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSessionClient")
            .field("target", &self.target)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::AuthOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_rejects_bad_hostname() {
        let host = HostSpec::parse("user@bad..host").unwrap();
        let config = TunnelConfig::new(host);

        let err = SshSessionClient::connect(&config, Span::none())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::HostResolution { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Grab a free port and release it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let host = HostSpec::parse(&format!("user@127.0.0.1:{}", port)).unwrap();
        let config = TunnelConfig::new(host)
            .with_auth(AuthOptions {
                password: Some("x".to_string()),
                ..Default::default()
            })
            .with_connect_timeout(Duration::from_secs(5));

        let err = SshSessionClient::connect(&config, Span::none())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Connection(_)));
    }
}
