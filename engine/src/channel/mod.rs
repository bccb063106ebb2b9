//! Remote command channel
//!
//! The sole path to the managed host. Every remote side effect in the
//! engine — supervisor calls, port probes, proxy provisioning, the
//! launcher script — is a command executed through this channel.

pub mod ssh;

use async_trait::async_trait;

use crate::errors::EngineError;

/// Captured result of one remote command.
///
/// A nonzero exit code is a structured outcome, not an error: only
/// connectivity failures surface as `EngineError::Connectivity`.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr if non-empty, else stdout — the more useful half for
    /// attaching to failure messages.
    pub fn detail(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Command channel trait
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Execute a command on the managed host
    async fn exec(&self, command: &str) -> Result<CommandOutput, EngineError>;

    /// Execute a command with the given stdin contents
    async fn exec_with_stdin(
        &self,
        command: &str,
        stdin: &str,
    ) -> Result<CommandOutput, EngineError>;

    /// Read a remote file. Expressed as a command over the same channel,
    /// not a separate transport.
    async fn read_file(&self, path: &str) -> Result<CommandOutput, EngineError> {
        self.exec(&format!("cat {}", shell_quote(path))).await
    }

    /// Write a remote file via stdin piping
    async fn write_file(&self, path: &str, contents: &str) -> Result<CommandOutput, EngineError> {
        self.exec_with_stdin(&format!("cat > {}", shell_quote(path)), contents)
            .await
    }
}

/// Quote a string for safe interpolation into a remote shell command
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}
