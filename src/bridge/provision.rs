//! Starting a relay on the Docker host

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn, Span};

use super::cleanup::{kill_by_port, kill_pid};
use super::probe;
use super::relay::{is_shell_safe_path, RelayMethod, RELAY_METHODS};
use super::{BridgeRecord, RemotePid};
use crate::config::{DEFAULT_DOCKER_SOCKET, DEFAULT_SETTLE_DELAY_MS};
use crate::error::{Result, TunnelError};
use crate::ssh::RemoteShell;

/// First port scanned for a free bridge port
pub const PORT_RANGE_START: u16 = 2375;

/// Last port scanned for a free bridge port
pub const PORT_RANGE_END: u16 = 2400;

/// Starts a relay from the Docker socket to a free remote port
pub struct BridgeProvisioner<S: RemoteShell + ?Sized> {
    shell: Arc<S>,
    host: String,
    socket_path: String,
    settle_delay: Duration,
    remote_port: Option<u16>,
    methods: Vec<RelayMethod>,
    span: Span,
}

impl<S: RemoteShell + ?Sized> BridgeProvisioner<S> {
    /// Provisioner for `host` with default socket, settle delay and methods
    pub fn new(shell: Arc<S>, host: impl Into<String>, span: Span) -> Self {
        Self {
            shell,
            host: host.into(),
            socket_path: DEFAULT_DOCKER_SOCKET.to_string(),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            remote_port: None,
            methods: RELAY_METHODS.to_vec(),
            span,
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Time a freshly started relay gets to bind its port
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Use this port instead of scanning for one
    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    pub fn with_methods(mut self, methods: Vec<RelayMethod>) -> Self {
        self.methods = methods;
        self
    }

    /// Pick a port, then start the first relay method that verifies
    pub async fn provision(&self) -> Result<BridgeRecord> {
        if !is_shell_safe_path(&self.socket_path) {
            return Err(TunnelError::config(format!(
                "Docker socket path '{}' must be absolute and contain only [A-Za-z0-9/._-]",
                self.socket_path
            )));
        }

        self.check_docker_socket().await;

        let port = match self.remote_port {
            Some(port) => port,
            None => self.select_port().await?,
        };

        info!(parent: &self.span, "Provisioning Docker bridge on remote port {}", port);

        let mut attempts = Vec::new();
        for method in &self.methods {
            match self.try_method(method, port).await {
                Ok(pid) => {
                    info!(
                        parent: &self.span,
                        "Docker bridge started with {} on port {} (pid {})",
                        method, port, pid
                    );
                    return Ok(BridgeRecord::provisioned(port, pid, method));
                }
                Err(attempt) => {
                    warn!(parent: &self.span, "Relay method {} failed: {}", method, attempt.reason);
                    attempts.push(format!("{}: {}", method, attempt.reason));
                    if attempt.started {
                        self.discard_attempt(method, port, attempt.launch_pid.as_deref())
                            .await;
                    }
                }
            }
        }

        error!(
            parent: &self.span,
            "All relay methods failed on {} port {}", self.host, port
        );
        Err(TunnelError::BridgeProvisioning {
            host: self.host.clone(),
            port,
            attempts,
        })
    }

    /// First port in the scan range that is definitely free
    pub async fn select_port(&self) -> Result<u16> {
        for port in PORT_RANGE_START..=PORT_RANGE_END {
            match probe::is_listening(self.shell.as_ref(), port, &self.span).await {
                Some(false) => {
                    debug!(parent: &self.span, "Remote port {} is free", port);
                    return Ok(port);
                }
                Some(true) => debug!(parent: &self.span, "Remote port {} in use", port),
                None => debug!(parent: &self.span, "Remote port {} could not be checked", port),
            }
        }

        error!(parent: &self.span, "No free remote port in {}-{}", PORT_RANGE_START, PORT_RANGE_END);
        Err(TunnelError::NoAvailablePort {
            host: self.host.clone(),
            start: PORT_RANGE_START,
            end: PORT_RANGE_END,
        })
    }

    /// Log a warning when the Docker socket is missing or unreadable
    pub async fn check_docker_socket(&self) -> bool {
        let command = format!(
            "test -S {0} && test -r {0}",
            self.socket_path
        );
        let ok = matches!(
            self.shell.exec(&command).await,
            Ok(output) if output.exit_code == Some(0)
        );
        if !ok {
            warn!(
                parent: &self.span,
                "Docker socket {} is missing or not readable on {}",
                self.socket_path, self.host
            );
        }
        ok
    }

    async fn try_method(&self, method: &RelayMethod, port: u16) -> std::result::Result<RemotePid, Attempt> {
        match self.shell.exec(&method.availability_command()).await {
            Ok(output) if output.exit_code == Some(0) => {}
            Ok(_) => return Err(Attempt::before_start("not installed")),
            Err(e) => return Err(Attempt::before_start(format!("availability check failed: {}", e))),
        }

        debug!(parent: &self.span, "Starting relay {} on port {}", method, port);
        let output = self
            .shell
            .exec(&method.launch_command(port, &self.socket_path))
            .await
            .map_err(|e| Attempt::before_start(format!("launch failed: {}", e)))?;

        if !output.success() {
            return Err(Attempt::started(
                format!("launch exited with {:?}: {}", output.exit_code, output.combined_output().trim()),
                None,
            ));
        }

        let launch_pid = output
            .first_line()
            .and_then(RemotePid::parse)
            .and_then(|pid| pid.as_known().map(str::to_string));

        tokio::time::sleep(self.settle_delay).await;

        if let Some(pid) = &launch_pid {
            if !probe::process_alive(self.shell.as_ref(), pid).await {
                return Err(Attempt::started(format!("process {} exited", pid), launch_pid.clone()));
            }
        }

        match probe::is_listening(self.shell.as_ref(), port, &self.span).await {
            Some(true) => {}
            Some(false) => {
                return Err(Attempt::started(format!("port {} not listening", port), launch_pid))
            }
            None => {
                return Err(Attempt::started(
                    format!("could not confirm port {} is listening", port),
                    launch_pid,
                ))
            }
        }

        Ok(probe::discover_pid(self.shell.as_ref(), port, launch_pid.as_deref(), &self.span).await)
    }

    /// Best-effort removal of a relay that started but did not verify
    async fn discard_attempt(&self, method: &RelayMethod, port: u16, launch_pid: Option<&str>) {
        debug!(parent: &self.span, "Discarding failed {} attempt on port {}", method, port);
        if let Some(pid) = launch_pid {
            kill_pid(self.shell.as_ref(), pid, &self.span).await;
        }
        kill_by_port(self.shell.as_ref(), port, method.name, &self.span).await;
    }
}

/// Why a relay method was rejected
struct Attempt {
    reason: String,
    started: bool,
    launch_pid: Option<String>,
}

impl Attempt {
    fn before_start(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            started: false,
            launch_pid: None,
        }
    }

    fn started(reason: impl Into<String>, launch_pid: Option<String>) -> Self {
        Self {
            reason: reason.into(),
            started: true,
            launch_pid,
        }
    }
}
