//! Stopping relay processes we started
//!
//! Nothing here returns an error. A relay that survives is logged and left
//! behind.

use std::time::Duration;

use tracing::{debug, info, warn, Span};

use super::probe::process_alive;
use super::relay::RelayMethod;
use super::BridgeRecord;
use crate::ssh::RemoteShell;

/// Wait between SIGTERM and the liveness re-check
pub const KILL_GRACE: Duration = Duration::from_millis(500);

/// Stop a provisioned bridge; discovered bridges are left alone
pub async fn cleanup_bridge<S: RemoteShell + ?Sized>(shell: &S, bridge: &BridgeRecord, span: &Span) {
    if !bridge.needs_cleanup() {
        debug!(parent: span, "Bridge on port {} was discovered, leaving it running", bridge.remote_port);
        return;
    }

    let killed = match bridge.remote_pid.as_known() {
        Some(pid) => kill_pid(shell, pid, span).await,
        None => false,
    };

    if !killed {
        kill_by_port(shell, bridge.remote_port, &bridge.relay, span).await;
    }

    info!(parent: span, "Cleaned up remote bridge on port {}", bridge.remote_port);
}

/// Kill children, then the process, escalating to SIGKILL
///
/// Returns false when the process could not be signalled.
pub async fn kill_pid<S: RemoteShell + ?Sized>(shell: &S, pid: &str, span: &Span) -> bool {
    run_quiet(shell, &format!("pkill -P {} 2>/dev/null", pid), span).await;

    match shell.exec(&format!("kill {}", pid)).await {
        Ok(output) if output.success() => {}
        Ok(output) => {
            warn!(parent: span, "kill {} failed: {}", pid, output.combined_output().trim());
            return false;
        }
        Err(e) => {
            warn!(parent: span, "kill {} failed: {}", pid, e);
            return false;
        }
    }

    tokio::time::sleep(KILL_GRACE).await;

    if process_alive(shell, pid).await {
        debug!(parent: span, "Process {} survived SIGTERM, sending SIGKILL", pid);
        match shell.exec(&format!("kill -9 {}", pid)).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(parent: span, "kill -9 {} failed: {}", pid, output.combined_output().trim()),
            Err(e) => warn!(parent: span, "kill -9 {} failed: {}", pid, e),
        }
    }

    true
}

/// Kill whatever holds `port`, plus any process matching the relay tool
pub async fn kill_by_port<S: RemoteShell + ?Sized>(shell: &S, port: u16, relay: &str, span: &Span) {
    let mut commands = vec![
        format!(
            "lsof -ti:{} -sTCP:LISTEN 2>/dev/null | xargs -r kill -9 2>/dev/null",
            port
        ),
        format!("fuser -k {}/tcp 2>/dev/null", port),
    ];
    if !relay.is_empty() {
        commands.push(format!(
            "pkill -f '{}' 2>/dev/null",
            RelayMethod::process_pattern(relay, port)
        ));
    }

    for command in commands {
        run_quiet(shell, &command, span).await;
    }
}

async fn run_quiet<S: RemoteShell + ?Sized>(shell: &S, command: &str, span: &Span) {
    match shell.exec(command).await {
        // non-zero usually means nothing matched
        Ok(output) if !output.success() => {
            debug!(parent: span, "'{}' exited with {:?}", command, output.exit_code)
        }
        Ok(_) => {}
        Err(e) => warn!(parent: span, "cleanup command '{}' failed: {}", command, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::relay::RELAY_METHODS;
    use crate::bridge::testing::ScriptedShell;
    use crate::bridge::RemotePid;
    use crate::ssh::CommandOutput;

    fn provisioned(pid: RemotePid) -> BridgeRecord {
        BridgeRecord::provisioned(2380, pid, &RELAY_METHODS[0])
    }

    #[tokio::test]
    async fn test_discovered_bridge_untouched() {
        let shell = ScriptedShell::new();
        cleanup_bridge(&shell, &BridgeRecord::discovered(2376), &Span::none()).await;
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn test_known_pid_graceful() {
        let shell = ScriptedShell::new();
        shell.on("pkill -P 4242", CommandOutput::ok(""));
        shell.on("kill 4242", CommandOutput::ok(""));
        shell.on("kill -0 4242", CommandOutput::failed(1, ""));

        cleanup_bridge(&shell, &provisioned(RemotePid::Known("4242".into())), &Span::none()).await;

        let commands = shell.commands();
        assert_eq!(commands[0], "pkill -P 4242 2>/dev/null");
        assert_eq!(commands[1], "kill 4242");
        assert!(!shell.issued("kill -9"));
        assert!(!shell.issued("lsof"));
    }

    #[tokio::test]
    async fn test_known_pid_escalates() {
        let shell = ScriptedShell::new();
        shell.on("kill 4242", CommandOutput::ok(""));
        shell.on("kill -0 4242", CommandOutput::ok(""));
        shell.on("kill -9 4242", CommandOutput::ok(""));

        cleanup_bridge(&shell, &provisioned(RemotePid::Known("4242".into())), &Span::none()).await;

        assert!(shell.issued("kill -9 4242"));
        assert!(!shell.issued("fuser -k"));
    }

    #[tokio::test]
    async fn test_unknown_pid_uses_port() {
        let shell = ScriptedShell::new();
        cleanup_bridge(&shell, &provisioned(RemotePid::Unknown), &Span::none()).await;

        assert!(shell.issued("lsof -ti:2380 -sTCP:LISTEN |"));
        assert!(shell.issued("fuser -k 2380/tcp"));
        assert!(shell.issued("pkill -f 'socat.*2380'"));
    }

    #[tokio::test]
    async fn test_failed_kill_falls_back_to_port() {
        let shell = ScriptedShell::new();
        shell.fail("kill 4242");

        cleanup_bridge(&shell, &provisioned(RemotePid::Known("4242".into())), &Span::none()).await;

        assert!(shell.issued("fuser -k 2380/tcp"));
    }
}
