//! Error types for the Docker SSH tunnel

use thiserror::Error;

/// Main error type for the Docker SSH tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Host specification was empty
    #[error("SSH host cannot be empty")]
    EmptyHost,

    /// Host specification did not match `[user@]host[:port]`
    #[error("invalid SSH host format '{input}': {reason}")]
    Format { input: String, reason: String },

    /// Hostname failed format checks or DNS resolution
    #[error("cannot resolve hostname '{host}': {reason}")]
    HostResolution { host: String, reason: String },

    /// No usable authentication method, or all methods were rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH transport could not be established or was lost
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// A remote command channel could not be opened or driven
    #[error("SSH session error: {0}")]
    Session(String),

    /// Every candidate remote port was taken or could not be checked
    #[error("no available remote port on {host} in range {start}-{end}")]
    NoAvailablePort { host: String, start: u16, end: u16 },

    /// Every relay method failed to bind the remote bridge
    #[error(
        "failed to provision Docker bridge on {host} port {port}; attempted methods: {}",
        attempts.join(", ")
    )]
    BridgeProvisioning {
        host: String,
        port: u16,
        attempts: Vec<String>,
    },

    /// The bridge is bound but does not answer like the Docker API
    #[error("tunnel verification failed on local port {port}: {reason}")]
    TunnelVerification { port: u16, reason: String },

    /// Local listener could not be bound
    #[error("failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// One or more teardown steps failed
    #[error("failed to close SSH tunnel: {}", .0.join("; "))]
    Close(Vec<String>),

    /// Connection diagnostics found problems
    #[error("SSH connection diagnostics failed:\n{}", .0.join("\n"))]
    Diagnostics(Vec<String>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key loading or parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Create a host format error for the given input
    pub fn format(input: impl Into<String>, reason: impl Into<String>) -> Self {
        TunnelError::Format {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a host resolution error
    pub fn resolution(host: impl Into<String>, reason: impl Into<String>) -> Self {
        TunnelError::HostResolution {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        TunnelError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        TunnelError::Authentication(msg.into())
    }

    /// Create a session error from a string
    pub fn session(msg: impl Into<String>) -> Self {
        TunnelError::Session(msg.into())
    }

    /// Create a verification error for the given local port
    pub fn verification(port: u16, reason: impl Into<String>) -> Self {
        TunnelError::TunnelVerification {
            port,
            reason: reason.into(),
        }
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        TunnelError::Config(msg.into())
    }
}

impl From<russh::Error> for TunnelError {
    fn from(err: russh::Error) -> Self {
        TunnelError::Connection(err.to_string())
    }
}
