//! Remote command execution
//!
//! Provides `CommandOutput`, the `RemoteShell` seam, and the loop that drains
//! an exec channel.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::error::Result;

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: u32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Check if the command succeeded (exit code 0 or no exit code available)
    pub fn success(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// First non-blank stdout line, trimmed
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

/// Something that can run a shell command on the remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` in a fresh session and wait for it to exit
    async fn exec(&self, command: &str) -> Result<CommandOutput>;
}

/// Drain an exec channel until the server closes it
pub(crate) async fn collect_output(mut channel: Channel<Msg>) -> CommandOutput {
    let mut output = CommandOutput::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                output.stdout.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext 1 is stderr
                if ext == 1 {
                    output.stderr.push_str(&String::from_utf8_lossy(&data));
                } else {
                    output.stdout.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_code = Some(exit_status);
            }
            // exit-status may still follow EOF
            ChannelMsg::Eof => {}
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    output
}
