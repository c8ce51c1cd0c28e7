//! Relay methods used to expose the Docker socket on a loopback port
//!
//! Each method is plain data: the tool it needs and a command template with
//! `{port}` and `{socket}` placeholders.

use std::fmt;

/// Preference class of a relay method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayTier {
    /// Purpose-built relay tools
    Native,
    /// Scripted relays used when no native tool works
    Fallback,
}

/// A way of relaying a TCP port to the Docker Unix socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayMethod {
    pub name: &'static str,
    pub tier: RelayTier,
    /// Executable that must be on the remote PATH
    pub binary: &'static str,
    pub template: &'static str,
}

const SOCAT: &str = "socat TCP-LISTEN:{port},bind=127.0.0.1,reuseaddr,fork UNIX-CONNECT:{socket}";

const NC: &str = "nc -lk -s 127.0.0.1 -p {port} -c 'nc -U {socket}'";

const NETCAT: &str = "netcat -lk -s 127.0.0.1 -p {port} -c 'nc -U {socket}'";

// Kept free of double quotes, backslashes and `$` so it survives `-c "..."`.
const PYTHON_RELAY: &str = r#"
import socket, threading
def spawn(fn, *args):
    t = threading.Thread(target=fn, args=args)
    t.daemon = True
    t.start()
def pump(src, dst):
    try:
        while True:
            data = src.recv(65536)
            if not data:
                break
            dst.sendall(data)
    except Exception:
        pass
    for s in (src, dst):
        try:
            s.shutdown(socket.SHUT_RDWR)
        except Exception:
            pass
def serve(client):
    upstream = socket.socket(socket.AF_UNIX, socket.SOCK_STREAM)
    try:
        upstream.connect('{socket}')
    except Exception:
        client.close()
        return
    spawn(pump, client, upstream)
    spawn(pump, upstream, client)
server = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
server.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
server.bind(('127.0.0.1', {port}))
server.listen(16)
while True:
    conn, _ = server.accept()
    spawn(serve, conn)
"#;

const PYTHON3: &str = "python3 -c \"{script}\"";

const PYTHON: &str = "python -c \"{script}\"";

const BASH: &str = "bash -c 'while :; do coproc DOCK { nc -U {socket}; }; \
nc -l -s 127.0.0.1 -p {port} <&\"${DOCK[0]}\" >&\"${DOCK[1]}\"; \
kill \"$DOCK_PID\" 2>/dev/null; wait \"$DOCK_PID\" 2>/dev/null; done'";

/// Every relay method, in the order they are tried
pub const RELAY_METHODS: [RelayMethod; 6] = [
    RelayMethod {
        name: "socat",
        tier: RelayTier::Native,
        binary: "socat",
        template: SOCAT,
    },
    RelayMethod {
        name: "nc",
        tier: RelayTier::Native,
        binary: "nc",
        template: NC,
    },
    RelayMethod {
        name: "netcat",
        tier: RelayTier::Native,
        binary: "netcat",
        template: NETCAT,
    },
    RelayMethod {
        name: "python3",
        tier: RelayTier::Fallback,
        binary: "python3",
        template: PYTHON3,
    },
    RelayMethod {
        name: "python",
        tier: RelayTier::Fallback,
        binary: "python",
        template: PYTHON,
    },
    RelayMethod {
        name: "bash",
        tier: RelayTier::Fallback,
        binary: "bash",
        template: BASH,
    },
];

impl RelayMethod {
    /// The relay command for `port` and `socket`
    pub fn render(&self, port: u16, socket: &str) -> String {
        self.template
            .replace("{script}", PYTHON_RELAY)
            .replace("{port}", &port.to_string())
            .replace("{socket}", socket)
    }

    /// Detached launch that echoes the background PID
    pub fn launch_command(&self, port: u16, socket: &str) -> String {
        format!("nohup {} >/dev/null 2>&1 & echo $!", self.render(port, socket))
    }

    /// Exits 0 when the relay tool is installed
    pub fn availability_command(&self) -> String {
        format!("command -v {} >/dev/null 2>&1", self.binary)
    }

    /// `pkill -f` pattern matching this relay on `port`
    pub fn process_pattern(name: &str, port: u16) -> String {
        format!("{}.*{}", name, port)
    }

    /// Connection method label shown to the user
    pub fn label(&self) -> String {
        match self.tier {
            RelayTier::Native => format!("SSH Tunnel ({})", self.name),
            RelayTier::Fallback => format!("SSH Tunnel (fallback {})", self.name),
        }
    }
}

impl fmt::Display for RelayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Whether `path` can be spliced into relay commands unquoted
pub fn is_shell_safe_path(path: &str) -> bool {
    path.starts_with('/')
        && path
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-'))
}
