//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait and applies the configured
//! host-key policy during the handshake.

use std::fmt;
use std::str::FromStr;

use russh::keys::PublicKey;
use tracing::{debug, warn, Span};

use crate::error::TunnelError;

/// How server host keys are checked against `~/.ssh/known_hosts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Accept every key without looking at known_hosts
    AcceptAll,

    /// Accept unknown hosts, reject keys that changed
    #[default]
    AcceptNew,

    /// Accept only keys already present in known_hosts
    Strict,
}

impl FromStr for HostKeyPolicy {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept-all" | "insecure" => Ok(Self::AcceptAll),
            "accept-new" => Ok(Self::AcceptNew),
            "strict" => Ok(Self::Strict),
            other => Err(TunnelError::config(format!(
                "unknown host key policy '{}' (expected accept-all, accept-new or strict)",
                other
            ))),
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AcceptAll => "accept-all",
            Self::AcceptNew => "accept-new",
            Self::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Outcome of looking a key up in known_hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownHostStatus {
    Matches,
    Unknown,
    Changed,
}

impl HostKeyPolicy {
    fn admits(self, status: KnownHostStatus) -> bool {
        match (self, status) {
            (Self::AcceptAll, _) => true,
            (_, KnownHostStatus::Matches) => true,
            (Self::AcceptNew, KnownHostStatus::Unknown) => true,
            _ => false,
        }
    }
}

/// SSH client handler for russh
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    span: Span,
}

impl SshHandler {
    /// Create a handler checking keys for `host:port`
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy, span: Span) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
            span,
        }
    }

    fn lookup(&self, key: &PublicKey) -> KnownHostStatus {
        match russh::keys::check_known_hosts(&self.host, self.port, key) {
            Ok(true) => KnownHostStatus::Matches,
            Ok(false) => KnownHostStatus::Unknown,
            Err(russh::keys::Error::KeyChanged { line }) => {
                warn!(parent: &self.span, "Host key for {} changed (known_hosts line {})", self.host, line);
                KnownHostStatus::Changed
            }
            Err(e) => {
                debug!(parent: &self.span, "known_hosts lookup failed: {}", e);
                KnownHostStatus::Unknown
            }
        }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAll {
            warn!(parent: &self.span, "Accepting host key for {} without verification", self.host);
            return Ok(true);
        }

        let status = self.lookup(server_public_key);
        let accepted = self.policy.admits(status);

        match (status, accepted) {
            (KnownHostStatus::Unknown, true) => {
                warn!(parent: &self.span, "Host {} is not in known_hosts, accepting new key", self.host);
            }
            (_, false) => {
                warn!(parent: &self.span, "Rejecting host key for {} ({:?}, policy {})", self.host, status, self.policy);
            }
            _ => debug!(parent: &self.span, "Host key for {} verified", self.host),
        }

        Ok(accepted)
    }
}
