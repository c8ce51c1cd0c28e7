//! SSH connection layer
//!
//! Host specification parsing, authentication, and the session client that
//! runs remote commands and opens `direct-tcpip` channels.

pub mod auth;
pub mod command;
pub mod handler;
pub mod host;
pub mod session;

// Re-exports
pub use auth::{check_key_permissions, AuthMaterial, AuthOptions, LoadedKey, PasswordPrompt};
pub use command::{CommandOutput, RemoteShell};
pub use handler::{HostKeyPolicy, SshHandler};
pub use host::{current_username, parse_host, validate_hostname, HostSpec};
pub use session::{BridgeDialer, SshSessionClient, TunnelTransport};
