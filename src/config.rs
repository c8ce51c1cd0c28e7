//! Configuration and CLI argument parsing for docker-ssh-tunnel

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::bridge::relay::is_shell_safe_path;
use crate::diagnostics::validate_host_spec;
use crate::error::{Result, TunnelError};
use crate::ssh::{AuthOptions, HostKeyPolicy, HostSpec};
use crate::tunnel::{ForwardMode, TunnelConfig};

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Local port the Docker client is pointed at
pub const DEFAULT_LOCAL_PORT: u16 = 2375;

/// Docker daemon socket on the remote host
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Time a started relay gets to bind its port, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;

/// docker-ssh-tunnel CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "docker-ssh-tunnel")]
#[command(version)]
#[command(about = "Expose a remote Docker daemon on a local TCP port through SSH")]
pub struct Args {
    /// Remote host as [ssh://][user@]host[:port]
    #[arg(long, env = "DOCKER_SSH_HOST")]
    pub host: String,

    /// Path to SSH private key (defaults to ~/.ssh/id_rsa, id_ed25519, id_ecdsa)
    #[arg(long, env = "DOCKER_SSH_KEY")]
    pub key: Option<PathBuf>,

    /// SSH password
    #[arg(long, env = "DOCKER_SSH_PASSWORD")]
    pub password: Option<String>,

    /// Never prompt for a password on the terminal
    #[arg(long, default_value = "false", env = "DOCKER_SSH_NO_PROMPT")]
    pub no_prompt: bool,

    /// Local port to listen on (0 picks a free port)
    #[arg(long, default_value_t = DEFAULT_LOCAL_PORT, env = "DOCKER_SSH_LOCAL_PORT")]
    pub local_port: u16,

    /// Remote bridge port, skipping discovery
    #[arg(long, env = "DOCKER_SSH_REMOTE_PORT")]
    pub remote_port: Option<u16>,

    /// Docker socket path on the remote host
    #[arg(long, default_value = DEFAULT_DOCKER_SOCKET, env = "DOCKER_SSH_SOCKET")]
    pub socket: String,

    /// SSH connect timeout in seconds
    #[arg(long, default_value_t = CONNECTION_TIMEOUT_SECS, env = "DOCKER_SSH_TIMEOUT")]
    pub timeout: u64,

    /// Wait after starting a relay before checking it, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY_MS, env = "DOCKER_SSH_SETTLE_DELAY_MS")]
    pub settle_delay_ms: u64,

    /// How connections reach the socket: bridge (remote TCP relay) or socat-stdio
    #[arg(long, default_value = "bridge", env = "DOCKER_SSH_FORWARD_MODE")]
    pub forward_mode: String,

    /// Host key policy: accept-all, accept-new or strict
    #[arg(long, default_value = "accept-new", env = "DOCKER_SSH_HOST_KEY_POLICY")]
    pub host_key_policy: String,

    /// Only validate the host specification, without connecting
    #[arg(long, default_value = "false", env = "DOCKER_SSH_CHECK")]
    pub check: bool,

    /// Run connection diagnostics instead of opening a tunnel
    #[arg(long, default_value = "false", env = "DOCKER_SSH_DIAGNOSE")]
    pub diagnose: bool,
}

/// What the binary should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Tunnel,
    Check,
    Diagnose,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Parsed host specification
    pub host: HostSpec,

    /// Path to SSH private key
    pub key: Option<PathBuf>,

    /// SSH password
    pub password: Option<String>,

    /// Whether a terminal prompt may be used
    pub allow_prompt: bool,

    pub local_port: u16,

    pub remote_port: Option<u16>,

    pub socket_path: String,

    pub connect_timeout: Duration,

    pub settle_delay: Duration,

    pub host_key_policy: HostKeyPolicy,

    pub forward_mode: ForwardMode,

    pub mode: Mode,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let host = HostSpec::parse(strip_ssh_scheme(&args.host))?;
        let host_key_policy = args.host_key_policy.parse()?;
        let forward_mode = args.forward_mode.parse()?;
        let mode = if args.check {
            Mode::Check
        } else if args.diagnose {
            Mode::Diagnose
        } else {
            Mode::Tunnel
        };

        Ok(Config {
            host,
            key: args.key,
            password: sanitize_password(args.password),
            allow_prompt: !args.no_prompt,
            local_port: args.local_port,
            remote_port: args.remote_port,
            socket_path: args.socket,
            connect_timeout: Duration::from_secs(args.timeout),
            settle_delay: Duration::from_millis(args.settle_delay_ms),
            host_key_policy,
            forward_mode,
            mode,
        })
    }

    /// Library-level tunnel configuration
    pub fn tunnel_config(&self) -> TunnelConfig {
        let mut config = TunnelConfig::new(self.host.clone())
            .with_auth(AuthOptions {
                key_path: self.key.clone(),
                password: self.password.clone(),
                allow_prompt: self.allow_prompt,
            })
            .with_local_port(self.local_port)
            .with_socket_path(self.socket_path.clone())
            .with_connect_timeout(self.connect_timeout)
            .with_settle_delay(self.settle_delay)
            .with_host_key_policy(self.host_key_policy)
            .with_forward_mode(self.forward_mode);

        if let Some(port) = self.remote_port {
            config = config.with_remote_port(port);
        }
        config
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.trim().is_empty() {
        errors.push("Missing required --host".to_string());
    } else if let Err(e) = validate_host_spec(strip_ssh_scheme(&args.host)) {
        errors.push(e.to_string());
    }

    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.remote_port == Some(0) {
        errors.push("--remote-port must be between 1 and 65535".to_string());
    }

    if !is_shell_safe_path(&args.socket) {
        errors.push(format!(
            "--socket must be an absolute path using only [A-Za-z0-9/._-]: {}",
            args.socket
        ));
    }

    if args.timeout == 0 {
        errors.push("--timeout must be greater than 0".to_string());
    }

    if let Err(e) = args.host_key_policy.parse::<HostKeyPolicy>() {
        errors.push(config_message(e));
    }

    match args.forward_mode.parse::<ForwardMode>() {
        Ok(ForwardMode::SocatStdio) if args.remote_port.is_some() => {
            errors.push("--remote-port has no effect with --forward-mode socat-stdio".to_string());
        }
        Ok(_) => {}
        Err(e) => errors.push(config_message(e)),
    }

    if args.check && args.diagnose {
        errors.push("--check and --diagnose are mutually exclusive".to_string());
    }

    if !errors.is_empty() {
        return Err(TunnelError::Config(errors.join("; ")));
    }

    Ok(())
}

fn config_message(err: TunnelError) -> String {
    match err {
        TunnelError::Config(msg) => msg,
        other => other.to_string(),
    }
}

/// Remove a leading `ssh://` as used in `DOCKER_HOST`
pub fn strip_ssh_scheme(host: &str) -> &str {
    let host = host.trim();
    host.strip_prefix("ssh://").unwrap_or(host)
}

/// Sanitize password: return None if empty
fn sanitize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}
