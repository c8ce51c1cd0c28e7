//! Discovery of an already-running Docker bridge

use std::sync::Arc;

use tracing::{debug, info, Span};

use super::probe;
use crate::ssh::RemoteShell;

/// Ports where a Docker TCP endpoint usually lives, in probe order
pub const DISCOVERY_PORTS: [u16; 5] = [2375, 2376, 2377, 2378, 2379];

/// Looks for a listener on the well-known Docker ports
pub struct BridgeDiscoverer<S: RemoteShell + ?Sized> {
    shell: Arc<S>,
    ports: Vec<u16>,
    span: Span,
}

impl<S: RemoteShell + ?Sized> BridgeDiscoverer<S> {
    pub fn new(shell: Arc<S>, span: Span) -> Self {
        Self {
            shell,
            ports: DISCOVERY_PORTS.to_vec(),
            span,
        }
    }

    /// Probe a different port list
    pub fn with_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ports = ports.into();
        self
    }

    /// First candidate port confirmed to be listening
    pub async fn find_existing(&self) -> Option<u16> {
        for &port in &self.ports {
            match probe::is_listening(self.shell.as_ref(), port, &self.span).await {
                Some(true) => {
                    info!(parent: &self.span, "Found existing Docker bridge on remote port {}", port);
                    return Some(port);
                }
                Some(false) => debug!(parent: &self.span, "Port {} not listening", port),
                None => debug!(parent: &self.span, "Port {} could not be checked", port),
            }
        }

        debug!(parent: &self.span, "No existing Docker bridge found");
        None
    }
}
