//! Host specification parsing
//!
//! Parses `[user@]host[:port]` strings into a [`HostSpec`] and validates
//! hostnames before a connection is attempted.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Result, TunnelError};

/// Default SSH port when the host string omits one
pub const DEFAULT_SSH_PORT: &str = "22";

const EXPECTED_FORMAT: &str = "expected [user@]host[:port]";

/// A parsed `[user@]host[:port]` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Login user (local OS user when omitted)
    pub username: String,

    /// Remote hostname or IP address
    pub hostname: String,

    /// SSH port, always numeric
    pub port: String,
}

impl HostSpec {
    /// Parse a host specification
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(TunnelError::EmptyHost);
        }

        let (username, rest) = split_user(input)?;
        let (hostname, port) = split_port(rest, input)?;

        Ok(Self {
            username,
            hostname,
            port,
        })
    }

    /// The port as a number
    pub fn port_number(&self) -> u16 {
        // parse() only admits ports that fit in u16
        self.port.parse().unwrap_or(22)
    }
}

impl FromStr for HostSpec {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// Parse a host specification into `(user, host, port)`
pub fn parse_host(input: &str) -> Result<(String, String, String)> {
    let spec = HostSpec::parse(input)?;
    Ok((spec.username, spec.hostname, spec.port))
}

fn split_user(input: &str) -> Result<(String, &str)> {
    if !input.contains('@') {
        return Ok((current_username(), input.trim()));
    }

    let parts: Vec<&str> = input.split('@').collect();
    if parts.len() != 2 {
        return Err(TunnelError::format(input, EXPECTED_FORMAT));
    }

    let user = parts[0].trim();
    let host = parts[1].trim();

    if user.is_empty() {
        return Err(TunnelError::format(input, "username cannot be empty"));
    }
    if host.is_empty() {
        return Err(TunnelError::format(input, "hostname cannot be empty"));
    }

    Ok((user.to_string(), host))
}

fn split_port(host: &str, input: &str) -> Result<(String, String)> {
    if !host.contains(':') {
        return Ok((host.to_string(), DEFAULT_SSH_PORT.to_string()));
    }

    let parts: Vec<&str> = host.split(':').collect();
    if parts.len() != 2 {
        return Err(TunnelError::format(input, EXPECTED_FORMAT));
    }

    let hostname = parts[0].trim();
    let port = parts[1].trim();

    if hostname.is_empty() {
        return Err(TunnelError::format(input, "hostname cannot be empty"));
    }
    if port.is_empty() {
        return Err(TunnelError::format(input, "port cannot be empty"));
    }
    if port.parse::<u16>().is_err() {
        return Err(TunnelError::format(
            input,
            format!("port '{}' must be numeric", port),
        ));
    }

    Ok((hostname.to_string(), port.to_string()))
}

/// Username of the current OS identity, with any `DOMAIN\` prefix removed
pub fn current_username() -> String {
    strip_domain(&whoami::username()).to_string()
}

fn strip_domain(user: &str) -> &str {
    match user.split_once('\\') {
        Some((_, name)) if !name.contains('\\') => name,
        _ => user,
    }
}

/// Check the hostname format and that it resolves to at least one address
pub async fn validate_hostname(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(TunnelError::resolution(host, "hostname cannot be empty"));
    }

    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    validate_hostname_format(host)?;

    let addrs: Vec<_> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| TunnelError::resolution(host, e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(TunnelError::resolution(host, "resolved to no IP addresses"));
    }

    Ok(())
}

fn validate_hostname_format(host: &str) -> Result<()> {
    if host.starts_with('.') || host.ends_with('.') {
        return Err(TunnelError::resolution(
            host,
            "hostname cannot start or end with a dot",
        ));
    }
    if host.contains("..") {
        return Err(TunnelError::resolution(
            host,
            "hostname cannot contain consecutive dots",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_at_host() {
        let (user, host, port) = parse_host("admin@192.168.1.100").unwrap();
        assert_eq!(user, "admin");
        assert_eq!(host, "192.168.1.100");
        assert_eq!(port, "22");
    }

    #[test]
    fn test_parse_user_at_host_with_port() {
        let (user, host, port) = parse_host("admin@192.168.1.100:2222").unwrap();
        assert_eq!(user, "admin");
        assert_eq!(host, "192.168.1.100");
        assert_eq!(port, "2222");
    }

    #[test]
    fn test_parse_host_only_uses_local_user() {
        let spec = HostSpec::parse("docker.lan").unwrap();
        assert_eq!(spec.username, current_username());
        assert_eq!(spec.hostname, "docker.lan");
        assert_eq!(spec.port, "22");
    }

    #[test]
    fn test_parse_host_with_port() {
        let spec: HostSpec = "docker.lan:2200".parse().unwrap();
        assert_eq!(spec.hostname, "docker.lan");
        assert_eq!(spec.port, "2200");
        assert_eq!(spec.port_number(), 2200);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let spec = HostSpec::parse("  ops @ docker.lan : 22 ").unwrap();
        assert_eq!(spec.username, "ops");
        assert_eq!(spec.hostname, "docker.lan");
        assert_eq!(spec.port, "22");
    }

    #[test]
    fn test_parse_rejects_double_at() {
        let err = parse_host("user@host@x").unwrap_err();
        assert!(err.to_string().contains("invalid SSH host format"));
    }

    #[test]
    fn test_parse_rejects_empty_host_before_port() {
        let err = parse_host("user@:2222").unwrap_err();
        assert!(err.to_string().contains("invalid SSH host format"));
        assert!(err.to_string().contains("hostname cannot be empty"));
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        let err = parse_host("").unwrap_err();
        assert!(matches!(err, TunnelError::EmptyHost));
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_parse_rejects_empty_user() {
        let err = parse_host("@host").unwrap_err();
        assert!(err.to_string().contains("username cannot be empty"));
    }

    #[test]
    fn test_parse_rejects_extra_colon() {
        let err = parse_host("user@host:port:extra").unwrap_err();
        assert!(err.to_string().contains("invalid SSH host format"));
    }

    #[test]
    fn test_parse_rejects_non_numeric_port() {
        let err = parse_host("user@host:ssh").unwrap_err();
        assert!(err.to_string().contains("must be numeric"));

        let err = parse_host("host:").unwrap_err();
        assert!(err.to_string().contains("port cannot be empty"));
    }

    #[test]
    fn test_display_round_trips() {
        let spec = HostSpec::parse("root@10.0.0.5:2022").unwrap();
        assert_eq!(spec.to_string(), "root@10.0.0.5:2022");
    }

    #[test]
    fn test_strip_domain() {
        assert_eq!(strip_domain("CORP\\alice"), "alice");
        assert_eq!(strip_domain("alice"), "alice");
        assert_eq!(strip_domain("A\\B\\c"), "A\\B\\c");
    }

    #[tokio::test]
    async fn test_validate_hostname_accepts_ip_literals() {
        assert!(validate_hostname("127.0.0.1").await.is_ok());
        assert!(validate_hostname("::1").await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_hostname_rejects_bad_dots() {
        for host in [".example.com", "example.com.", "a..b"] {
            let err = validate_hostname(host).await.unwrap_err();
            assert!(matches!(err, TunnelError::HostResolution { .. }), "{host}");
        }
    }

    #[tokio::test]
    async fn test_validate_hostname_resolves_localhost() {
        assert!(validate_hostname("localhost").await.is_ok());
    }
}
