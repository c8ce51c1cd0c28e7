//! Scripted remote side for unit tests
//!
//! `ScriptedShell` answers commands by substring rules and records every
//! command it sees. `ScriptedTransport` adds a dialer that maps bridge ports
//! to local test listeners.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, TunnelError};
use crate::ssh::{BridgeDialer, CommandOutput, HostSpec, RemoteShell, TunnelTransport};

struct Rule {
    pattern: String,
    after: Option<String>,
    reply: Option<CommandOutput>,
}

/// A remote shell driven by substring rules
///
/// The most recently added matching rule wins. Unscripted commands exit 127.
#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern`
    pub fn on(&self, pattern: &str, reply: CommandOutput) {
        self.push(pattern, None, Some(reply));
    }

    /// Answer commands containing `pattern` once `trigger` has been issued
    pub fn on_after(&self, trigger: &str, pattern: &str, reply: CommandOutput) {
        self.push(pattern, Some(trigger), Some(reply));
    }

    /// Fail the session for commands containing `pattern`
    pub fn fail(&self, pattern: &str) {
        self.push(pattern, None, None);
    }

    fn push(&self, pattern: &str, after: Option<&str>, reply: Option<CommandOutput>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            after: after.map(str::to_string),
            reply,
        });
    }

    /// Every command issued so far
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn issued(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|cmd| cmd.contains(pattern))
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let log = {
            let mut log = self.log.lock().unwrap();
            log.push(command.to_string());
            log.clone()
        };

        let rules = self.rules.lock().unwrap();
        let rule = rules.iter().rev().find(|rule| {
            command.contains(&rule.pattern)
                && rule
                    .after
                    .as_ref()
                    .is_none_or(|trigger| log.iter().any(|cmd| cmd.contains(trigger.as_str())))
        });

        match rule {
            Some(Rule { reply: Some(reply), .. }) => Ok(reply.clone()),
            Some(Rule { reply: None, .. }) => Err(TunnelError::session("scripted failure")),
            None => Ok(CommandOutput::failed(127, "command not scripted")),
        }
    }
}

/// Scripted shell plus a dialer onto local listeners
pub struct ScriptedTransport {
    pub shell: ScriptedShell,
    bridges: Mutex<HashMap<u16, SocketAddr>>,
    stdio: Mutex<Option<SocketAddr>>,
    target: HostSpec,
    disconnects: AtomicUsize,
    disconnect_fails: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            shell: ScriptedShell::new(),
            bridges: Mutex::new(HashMap::new()),
            stdio: Mutex::new(None),
            target: HostSpec {
                username: "ops".to_string(),
                hostname: "docker.lan".to_string(),
                port: "22".to_string(),
            },
            disconnects: AtomicUsize::new(0),
            disconnect_fails: AtomicBool::new(false),
        }
    }

    /// Route dials of remote `port` to `addr`
    pub fn route(&self, port: u16, addr: SocketAddr) {
        self.bridges.lock().unwrap().insert(port, addr);
    }

    /// Route streamed exec sessions to `addr`
    pub fn route_stdio(&self, addr: SocketAddr) {
        *self.stdio.lock().unwrap() = Some(addr);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make every later disconnect return an error
    pub fn fail_disconnect(&self) {
        self.disconnect_fails.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteShell for ScriptedTransport {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.shell.exec(command).await
    }
}

#[async_trait]
impl BridgeDialer for ScriptedTransport {
    type Stream = TcpStream;

    async fn dial(&self, port: u16) -> Result<TcpStream> {
        let addr = self.bridges.lock().unwrap().get(&port).copied();
        let addr = addr.ok_or_else(|| TunnelError::session(format!("no route to port {}", port)))?;
        Ok(TcpStream::connect(addr).await?)
    }
}

#[async_trait]
impl TunnelTransport for ScriptedTransport {
    fn target(&self) -> &HostSpec {
        &self.target
    }

    async fn exec_stream(&self, command: &str) -> Result<TcpStream> {
        self.shell.log.lock().unwrap().push(command.to_string());
        let addr = *self.stdio.lock().unwrap();
        let addr = addr.ok_or_else(|| TunnelError::session("exec stream not scripted"))?;
        Ok(TcpStream::connect(addr).await?)
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.disconnect_fails.load(Ordering::SeqCst) {
            return Err(TunnelError::connection("scripted disconnect failure"));
        }
        Ok(())
    }
}

/// `ss -tln` output with listeners on `ports`
pub fn ss_listing(ports: &[u16]) -> String {
    let mut out = String::from("State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n");
    for port in ports {
        out.push_str(&format!("LISTEN 0      128    127.0.0.1:{}    0.0.0.0:*\n", port));
    }
    out
}

/// `/proc/net/tcp` text with listeners on `ports`
pub fn proc_table(ports: &[u16]) -> String {
    let mut out = String::from(
        "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n",
    );
    for (i, port) in ports.iter().enumerate() {
        out.push_str(&format!(
            "   {}: 0100007F:{:04X} 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1\n",
            i, port
        ));
    }
    out
}

/// Echo every byte back until the peer closes
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// Answer every connection with `response` after reading the request
pub async fn spawn_http_stub(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
