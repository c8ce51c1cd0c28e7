//! End-to-end check that the tunnel reaches the Docker API

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, Span};

use crate::error::{Result, TunnelError};

const PING_REQUEST: &[u8] = b"GET /_ping HTTP/1.1\r\nHost: localhost\r\n\r\n";

const RESPONSE_BUFFER: usize = 1024;

/// Bytes of an unexpected response quoted in the error
const PREVIEW_LEN: usize = 50;

/// Timeouts for the verification probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Sends `GET /_ping` through the local end of the tunnel
pub struct TunnelVerifier {
    options: VerifyOptions,
    span: Span,
}

impl TunnelVerifier {
    pub fn new(options: VerifyOptions, span: Span) -> Self {
        Self { options, span }
    }

    /// Succeeds when the local port answers with an HTTP response
    pub async fn verify(&self, local_port: u16) -> Result<()> {
        debug!(parent: &self.span, "Verifying tunnel on local port {}", local_port);

        let mut stream = timeout(
            self.options.connect_timeout,
            TcpStream::connect((Ipv4Addr::LOCALHOST, local_port)),
        )
        .await
        .map_err(|_| TunnelError::verification(local_port, "timed out connecting to tunnel"))?
        .map_err(|e| TunnelError::verification(local_port, format!("failed to connect to tunnel: {}", e)))?;

        stream
            .write_all(PING_REQUEST)
            .await
            .map_err(|e| TunnelError::verification(local_port, format!("failed to send request: {}", e)))?;

        let mut buf = [0u8; RESPONSE_BUFFER];
        let n = timeout(self.options.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TunnelError::verification(local_port, "timed out waiting for Docker response"))?
            .map_err(|e| {
                TunnelError::verification(local_port, format!("failed to read from Docker socket: {}", e))
            })?;

        check_response(&buf[..n]).map_err(|reason| TunnelError::verification(local_port, reason))?;

        info!(parent: &self.span, "Tunnel verified on local port {}", local_port);
        Ok(())
    }
}

fn check_response(response: &[u8]) -> std::result::Result<(), String> {
    if response.is_empty() {
        return Err("no response received from Docker socket".to_string());
    }

    let text = String::from_utf8_lossy(response);
    if !text.contains("HTTP/") {
        let preview = String::from_utf8_lossy(&response[..response.len().min(PREVIEW_LEN)]);
        return Err(format!("invalid response from Docker socket: {}", preview));
    }

    Ok(())
}
