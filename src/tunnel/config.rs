//! Tunnel configuration
//!
//! Everything a tunnel needs to connect, provision and verify, with defaults
//! matching the CLI.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::verify::VerifyOptions;
use crate::config::{
    CONNECTION_TIMEOUT_SECS, DEFAULT_DOCKER_SOCKET, DEFAULT_LOCAL_PORT, DEFAULT_SETTLE_DELAY_MS,
};
use crate::error::TunnelError;
use crate::ssh::{AuthOptions, HostKeyPolicy, HostSpec};

/// How local connections reach the Docker socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    /// Forward to a TCP relay listening on the remote loopback
    #[default]
    Bridge,

    /// Run `socat STDIO UNIX-CONNECT:<socket>` per connection, no remote listener
    SocatStdio,
}

impl FromStr for ForwardMode {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "socat-stdio" | "stdio" => Ok(Self::SocatStdio),
            other => Err(TunnelError::config(format!(
                "unknown forward mode '{}' (expected bridge or socat-stdio)",
                other
            ))),
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => f.write_str("bridge"),
            Self::SocatStdio => f.write_str("socat-stdio"),
        }
    }
}

/// Tunnel configuration
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Remote SSH endpoint
    pub host: HostSpec,

    /// Key, password and prompt settings
    pub auth: AuthOptions,

    /// Local listener port, 0 lets the OS choose
    pub local_port: u16,

    /// Remote bridge port, skipping discovery when set
    pub remote_port: Option<u16>,

    /// Docker socket on the remote host
    pub socket_path: String,

    /// Bound on TCP connect plus SSH handshake
    pub connect_timeout: Duration,

    /// Time a started relay gets before it is checked
    pub settle_delay: Duration,

    pub host_key_policy: HostKeyPolicy,

    pub verify: VerifyOptions,

    pub forward_mode: ForwardMode,
}

impl TunnelConfig {
    /// Create a configuration for `host` with default settings
    pub fn new(host: HostSpec) -> Self {
        Self {
            host,
            auth: AuthOptions::default(),
            local_port: DEFAULT_LOCAL_PORT,
            remote_port: None,
            socket_path: DEFAULT_DOCKER_SOCKET.to_string(),
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            host_key_policy: HostKeyPolicy::default(),
            verify: VerifyOptions::default(),
            forward_mode: ForwardMode::default(),
        }
    }

    pub fn with_auth(mut self, auth: AuthOptions) -> Self {
        self.auth = auth;
        self
    }

    /// Set an explicit private key path
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth.key_path = Some(path.into());
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth.password = Some(password.into());
        self
    }

    /// Allow an interactive password prompt as last resort
    pub fn with_prompt(mut self, allow: bool) -> Self {
        self.auth.allow_prompt = allow;
        self
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_verify(mut self, verify: VerifyOptions) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_forward_mode(mut self, mode: ForwardMode) -> Self {
        self.forward_mode = mode;
        self
    }
}
