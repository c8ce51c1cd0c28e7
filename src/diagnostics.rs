//! Connection diagnostics
//!
//! `validate_host_spec` never touches the network. `diagnose_connection` walks
//! the same steps a tunnel would take and reports every problem it finds
//! instead of stopping at the first one.

use std::sync::Arc;

use tracing::{info, warn, Span};

use crate::bridge::BridgeProvisioner;
use crate::error::{Result, TunnelError};
use crate::ssh::{
    check_key_permissions, validate_hostname, AuthMaterial, AuthOptions, HostSpec, RemoteShell,
    SshSessionClient, TunnelTransport,
};
use crate::tunnel::TunnelConfig;

/// Parse a host specification without connecting
pub fn validate_host_spec(input: &str) -> Result<HostSpec> {
    HostSpec::parse(input)
}

/// Check resolution, keys, SSH login and Docker socket access on the host
pub async fn diagnose_connection(config: &TunnelConfig, span: Span) -> Result<()> {
    info!(parent: &span, "Running SSH connection diagnostics for {}", config.host);

    if let Err(e) = validate_hostname(&config.host.hostname).await {
        warn!(parent: &span, "Hostname check failed: {}", e);
        // nothing further can succeed without an address
        return Err(TunnelError::Diagnostics(vec![format!("hostname: {}", e)]));
    }
    info!(parent: &span, "Hostname {} resolves", config.host.hostname);

    let mut failures = check_keys(&config.auth, &span);

    match SshSessionClient::connect(config, span.clone()).await {
        Ok(client) => {
            info!(parent: &span, "SSH login to {} succeeded", config.host);

            let client = Arc::new(client);
            if let Some(problem) =
                check_socket_access(client.clone(), config, &span).await
            {
                failures.push(problem);
            }
            if let Err(e) = client.disconnect().await {
                warn!(parent: &span, "Disconnect after diagnostics failed: {}", e);
            }
        }
        Err(e) => failures.push(format!("ssh: {}", e)),
    }

    if failures.is_empty() {
        info!(parent: &span, "SSH diagnostics passed");
        Ok(())
    } else {
        for failure in &failures {
            warn!(parent: &span, "Diagnostic failure: {}", failure);
        }
        Err(TunnelError::Diagnostics(failures))
    }
}

/// Key-related problems: insecure candidate files, or nothing to log in with
fn check_keys(options: &AuthOptions, span: &Span) -> Vec<String> {
    let mut failures = Vec::new();
    let material = AuthMaterial::resolve(options, span);

    for path in material.key_paths().iter().filter(|p| p.is_file()) {
        if let Err(e) = check_key_permissions(path) {
            failures.push(format!("key: {}", e));
        }
    }

    if let Some(explicit) = &options.key_path {
        if material.key().is_none() {
            failures.push(format!("key: {} could not be loaded", explicit.display()));
        }
    }

    if material.is_empty() {
        failures.push("auth: no SSH key, password or prompt available".to_string());
    }

    failures
}

async fn check_socket_access<S: RemoteShell + ?Sized>(
    shell: Arc<S>,
    config: &TunnelConfig,
    span: &Span,
) -> Option<String> {
    let ok = BridgeProvisioner::new(shell, config.host.hostname.clone(), span.clone())
        .with_socket_path(config.socket_path.clone())
        .check_docker_socket()
        .await;

    if ok {
        info!(parent: span, "Docker socket {} is accessible", config.socket_path);
        None
    } else {
        Some(format!(
            "docker: socket {} is missing or not readable by {}",
            config.socket_path, config.host.username
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::ScriptedShell;
    use crate::ssh::CommandOutput;

    #[test]
    fn test_validate_host_spec() {
        let spec = validate_host_spec("ops@docker.lan:2222").unwrap();
        assert_eq!(spec.to_string(), "ops@docker.lan:2222");

        assert!(matches!(validate_host_spec("  "), Err(TunnelError::EmptyHost)));
        assert!(validate_host_spec("a@b@c")
            .unwrap_err()
            .to_string()
            .contains("invalid SSH host format"));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_keys_flags_insecure_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "not a key").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let options = AuthOptions {
            key_path: Some(path.clone()),
            password: Some("pw".to_string()),
            allow_prompt: false,
        };
        let failures = check_keys(&options, &Span::none());

        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("insecure permissions"));
        assert!(failures[1].contains("could not be loaded"));
    }

    #[test]
    fn test_check_keys_without_any_method() {
        let options = AuthOptions {
            key_path: Some("/nonexistent/id_rsa".into()),
            password: None,
            allow_prompt: false,
        };
        let failures = check_keys(&options, &Span::none());

        assert!(failures.iter().any(|f| f.starts_with("auth:")));
    }

    #[tokio::test]
    async fn test_socket_access() {
        let config = TunnelConfig::new(HostSpec::parse("ops@docker.lan").unwrap());

        let shell = Arc::new(ScriptedShell::new());
        shell.on("test -S /var/run/docker.sock", CommandOutput::ok(""));
        assert_eq!(check_socket_access(shell.clone(), &config, &Span::none()).await, None);

        let shell = Arc::new(ScriptedShell::new());
        shell.on("test -S", CommandOutput::failed(1, ""));
        let problem = check_socket_access(shell, &config, &Span::none()).await.unwrap();
        assert!(problem.contains("/var/run/docker.sock"));
        assert!(problem.contains("ops"));
    }

    #[tokio::test]
    async fn test_unresolvable_host_stops_early() {
        let config = TunnelConfig::new(HostSpec::parse("ops@bad..host").unwrap());
        let err = diagnose_connection(&config, Span::none()).await.unwrap_err();

        match err {
            TunnelError::Diagnostics(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("hostname:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
