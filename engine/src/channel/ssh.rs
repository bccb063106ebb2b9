//! SSH-backed command channel
//!
//! Drives the OpenSSH client binary with a shared control-master socket.
//! One async mutex serializes all execution: shell-global state on the
//! host (working directory, environment) is channel-wide, so pipelining
//! is never assumed safe.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::channel::{CommandChannel, CommandOutput};
use crate::errors::EngineError;
use crate::settings::HostSettings;

/// The ssh client reserves exit code 255 for its own failures
/// (unreachable host, auth rejection). Everything else belongs to the
/// remote command.
const SSH_CLIENT_FAILURE: i32 = 255;

/// SSH channel options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Hostname or IP of the managed host
    pub hostname: String,

    /// SSH user
    pub user: String,

    /// SSH port
    pub port: u16,

    /// Path to an identity file
    pub identity_file: Option<String>,

    /// Optional password, forwarded through sshpass
    pub password: Option<Arc<SecretString>>,

    /// Control socket path for connection reuse
    pub control_path: String,

    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            user: "deploy".to_string(),
            port: 22,
            identity_file: None,
            password: None,
            control_path: "/tmp/wharf-ssh-%r@%h:%p".to_string(),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl SshOptions {
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            hostname: settings.hostname.clone(),
            user: settings.user.clone(),
            port: settings.ssh_port,
            identity_file: settings.identity_file.clone(),
            password: settings.password.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            ..Default::default()
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.hostname)
    }
}

/// Command channel over a persistent SSH control connection
pub struct SshChannel {
    options: SshOptions,
    /// Single serialization point for the managed host
    lock: Mutex<()>,
}

impl SshChannel {
    pub fn new(options: SshOptions) -> Self {
        Self {
            options,
            lock: Mutex::new(()),
        }
    }

    /// Establish the control-master connection. Idempotent: if the
    /// control socket is already alive this is a no-op.
    pub async fn connect(&self) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        self.ensure_connected().await
    }

    async fn ensure_connected(&self) -> Result<(), EngineError> {
        let destination = self.options.destination();

        // `ssh -O check` queries the master without opening a session
        let check = self
            .ssh_command(&["-O", "check", destination.as_str()])
            .output()
            .await?;
        if check.status.success() {
            return Ok(());
        }

        debug!("Control connection down, reestablishing...");
        // ControlPersist daemonizes the master with detached descriptors,
        // so this probe command returns promptly
        let mut cmd = self.ssh_command(&[
            "-o",
            "ControlMaster=auto",
            "-o",
            "ControlPersist=600",
            destination.as_str(),
            "--",
            "true",
        ]);
        let established = cmd.output().await?;
        if !established.status.success() {
            return Err(EngineError::Connectivity(format!(
                "cannot reach {}: {}",
                destination,
                String::from_utf8_lossy(&established.stderr).trim()
            )));
        }
        Ok(())
    }

    fn ssh_command(&self, args: &[&str]) -> Command {
        let mut cmd = if let Some(password) = &self.options.password {
            let mut c = Command::new("sshpass");
            c.args(["-p", password.expose_secret(), "ssh"]);
            c
        } else {
            Command::new("ssh")
        };

        cmd.args(["-o", "BatchMode=yes"]);
        cmd.args(["-o", "StrictHostKeyChecking=accept-new"]);
        cmd.arg("-o").arg(format!(
            "ConnectTimeout={}",
            self.options.connect_timeout.as_secs()
        ));
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.options.control_path));
        cmd.arg("-p").arg(self.options.port.to_string());
        if let Some(identity) = &self.options.identity_file {
            cmd.args(["-i", identity]);
        }
        cmd.args(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput, EngineError> {
        let _guard = self.lock.lock().await;

        // Every operation auto-establishes the connection before running
        self.ensure_connected().await?;

        let destination = self.options.destination();
        let mut cmd = self.ssh_command(&[destination.as_str(), "--", command]);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn()?;
        if let Some(contents) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(contents.as_bytes()).await?;
            }
        }
        let output = child.wait_with_output().await?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == SSH_CLIENT_FAILURE {
            warn!("SSH transport failure: {}", stderr.trim());
            return Err(EngineError::Connectivity(stderr.trim().to_string()));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn exec(&self, command: &str) -> Result<CommandOutput, EngineError> {
        debug!("exec: {}", command);
        self.run(command, None).await
    }

    async fn exec_with_stdin(
        &self,
        command: &str,
        stdin: &str,
    ) -> Result<CommandOutput, EngineError> {
        debug!("exec (with stdin): {}", command);
        self.run(command, Some(stdin)).await
    }
}
