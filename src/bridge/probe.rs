//! Remote port and process probes
//!
//! Each probe answers `Some(_)` when it could tell and `None` when the tool it
//! relies on is missing or failed. Which tools exist varies by distribution
//! (iproute2 vs net-tools, busybox, containers without procps), so callers
//! walk an ordered list and take the first definite answer.

use tracing::{debug, Span};

use super::RemotePid;
use crate::ssh::RemoteShell;

const LISTING_COMMAND: &str = "ss -tln 2>/dev/null || netstat -tln 2>/dev/null";
const PROC_COMMAND: &str = "cat /proc/net/tcp 2>/dev/null; cat /proc/net/tcp6 2>/dev/null; true";

/// TCP state code for LISTEN in `/proc/net/tcp`
const PROC_LISTEN_STATE: &str = "0A";

/// Check `ss`/`netstat` output for a listener on `port`
pub async fn tool_check<S: RemoteShell + ?Sized>(shell: &S, port: u16, span: &Span) -> Option<bool> {
    let output = match shell.exec(LISTING_COMMAND).await {
        Ok(output) => output,
        Err(e) => {
            debug!(parent: span, "listing probe for port {} failed: {}", port, e);
            return None;
        }
    };

    if !output.success() || output.stdout.trim().is_empty() {
        debug!(parent: span, "neither ss nor netstat usable on remote");
        return None;
    }

    Some(listing_has_port(&output.stdout, port))
}

/// Check `/proc/net/tcp{,6}` for a listener on `port`
pub async fn proc_check<S: RemoteShell + ?Sized>(shell: &S, port: u16, span: &Span) -> Option<bool> {
    let output = match shell.exec(PROC_COMMAND).await {
        Ok(output) => output,
        Err(e) => {
            debug!(parent: span, "/proc probe for port {} failed: {}", port, e);
            return None;
        }
    };

    if !output.stdout.contains("local_address") {
        return None;
    }

    Some(proc_has_port(&output.stdout, port))
}

/// Tool check first, `/proc` when the tools are inconclusive
pub async fn is_listening<S: RemoteShell + ?Sized>(shell: &S, port: u16, span: &Span) -> Option<bool> {
    match tool_check(shell, port, span).await {
        Some(answer) => Some(answer),
        None => proc_check(shell, port, span).await,
    }
}

/// Whether `kill -0` reaches the process
pub async fn process_alive<S: RemoteShell + ?Sized>(shell: &S, pid: &str) -> bool {
    matches!(
        shell.exec(&format!("kill -0 {} 2>/dev/null", pid)).await,
        Ok(output) if output.exit_code == Some(0)
    )
}

/// Commands that may reveal the PID listening on `port`, best first
pub fn pid_probe_commands(port: u16) -> Vec<String> {
    vec![
        format!("lsof -ti:{} -sTCP:LISTEN 2>/dev/null", port),
        format!("fuser {}/tcp 2>/dev/null", port),
        format!(
            "ps aux | grep -E '(socat|nc|netcat|python3?|bash).*{}' | grep -v grep | awk '{{print $2}}' | head -1",
            port
        ),
        format!(
            "netstat -tlnp 2>/dev/null | grep ':{} ' | awk '{{print $7}}' | cut -d'/' -f1 | head -1",
            port
        ),
        format!(
            "ss -tlnp 2>/dev/null | grep ':{} ' | grep -o 'pid=[0-9]*' | cut -d'=' -f2 | head -1",
            port
        ),
    ]
}

/// Walk the PID probes, then fall back to the PID reported at launch
pub async fn discover_pid<S: RemoteShell + ?Sized>(
    shell: &S,
    port: u16,
    launch_pid: Option<&str>,
    span: &Span,
) -> RemotePid {
    for command in pid_probe_commands(port) {
        let output = match shell.exec(&command).await {
            Ok(output) => output,
            Err(e) => {
                debug!(parent: span, "PID probe failed: {}", e);
                continue;
            }
        };

        let found = output
            .first_line()
            .and_then(|line| line.split_whitespace().next())
            .and_then(RemotePid::parse);
        if let Some(pid) = found {
            debug!(parent: span, "Found relay PID {} via '{}'", pid, command);
            return pid;
        }
    }

    launch_pid
        .and_then(RemotePid::parse)
        .unwrap_or(RemotePid::Unknown)
}

/// Whether the fourth column of an `ss -tln`/`netstat -tln` listing has `port`
pub fn listing_has_port(listing: &str, port: u16) -> bool {
    let wanted = port.to_string();
    listing.lines().any(|line| {
        line.split_whitespace()
            .nth(3)
            .and_then(|local| local.rsplit_once(':'))
            .is_some_and(|(_, p)| p == wanted)
    })
}

/// Whether `/proc/net/tcp` text has a LISTEN socket on `port`
pub fn proc_has_port(table: &str, port: u16) -> bool {
    let wanted = format!("{:04X}", port);
    table.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[3] != PROC_LISTEN_STATE {
            return false;
        }
        fields[1]
            .rsplit_once(':')
            .is_some_and(|(_, p)| p.eq_ignore_ascii_case(&wanted))
    })
}
