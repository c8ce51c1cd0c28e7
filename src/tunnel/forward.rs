//! Local listener forwarding to the remote bridge
//!
//! One accept loop per tunnel. Each accepted connection dials the bridge and
//! copies bytes both ways until either side finishes.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Span};

use crate::error::{Result, TunnelError};
use crate::ssh::BridgeDialer;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Forwards local connections to a remote bridge port
pub struct TunnelForwarder<D: BridgeDialer> {
    dialer: Arc<D>,
    bridge_port: u16,
    span: Span,
}

impl<D: BridgeDialer> TunnelForwarder<D> {
    pub fn new(dialer: Arc<D>, bridge_port: u16, span: Span) -> Self {
        Self {
            dialer,
            bridge_port,
            span,
        }
    }

    /// Bind `127.0.0.1:<local_port>` and start accepting
    pub async fn listen(self, local_port: u16) -> Result<ForwarderHandle> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, local_port))
            .await
            .map_err(|source| TunnelError::Bind {
                port: local_port,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            parent: &self.span,
            "Forwarding {} to remote port {}", local_addr, self.bridge_port
        );

        let task = tokio::spawn(accept_loop(listener, self.dialer, self.bridge_port, self.span));

        Ok(ForwarderHandle {
            local_addr,
            task: Some(task),
        })
    }
}

/// Running accept loop; aborted on shutdown or drop
#[derive(Debug)]
pub struct ForwarderHandle {
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl ForwarderHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and drop every in-flight connection
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        task.abort();
        match task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(TunnelError::connection(format!("listener task failed: {}", e))),
        }
    }
}

impl Drop for ForwarderHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop<D: BridgeDialer>(
    listener: TcpListener,
    dialer: Arc<D>,
    bridge_port: u16,
    span: Span,
) {
    // dropping the set aborts every connection task
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(parent: &span, "Accepted connection from {}", peer);
                    let dialer = dialer.clone();
                    let span = span.clone();
                    connections.spawn(async move {
                        if let Err(e) = forward_connection(stream, dialer.as_ref(), bridge_port).await {
                            warn!(parent: &span, "Forwarding for {} failed: {}", peer, e);
                        } else {
                            debug!(parent: &span, "Connection from {} closed", peer);
                        }
                    });
                }
                Err(e) => {
                    warn!(parent: &span, "Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

/// Copy both directions until either finishes, then drop both streams
async fn forward_connection<D: BridgeDialer + ?Sized>(
    mut local: TcpStream,
    dialer: &D,
    bridge_port: u16,
) -> Result<()> {
    let remote = match dialer.dial(bridge_port).await {
        Ok(remote) => remote,
        Err(e) => {
            let _ = local.shutdown().await;
            return Err(e);
        }
    };

    let (mut local_rd, mut local_wr) = local.split();
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::select! {
        result = tokio::io::copy(&mut local_rd, &mut remote_wr) => {
            result?;
        }
        result = tokio::io::copy(&mut remote_rd, &mut local_wr) => {
            result?;
        }
    }

    Ok(())
}
