//! PM2 supervisor adapter
//!
//! Parses `pm2 jlist` JSON and drives stop/restart/delete/logs through
//! the command channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::channel::{shell_quote, CommandChannel};
use crate::errors::EngineError;
use crate::supervisor::{DeleteReport, ProcessInfo, ProcessStatus, Supervisor};

/// Raw pm2 jlist entry. Only the fields the engine consumes.
#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    pid: Option<u32>,
    monit: Option<Pm2Monit>,
    pm2_env: Pm2Env,
}

#[derive(Debug, Deserialize)]
struct Pm2Monit {
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    cpu: f32,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: String,
    #[serde(default)]
    pm_uptime: Option<i64>,
    #[serde(default)]
    restart_time: Option<u32>,
    #[serde(default)]
    pm_cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, serde_json::Value>,
}

/// Supervisor adapter backed by pm2
pub struct Pm2Supervisor {
    channel: Arc<dyn CommandChannel>,
    /// Working directories are only ever removed under this root
    apps_root: String,
}

impl Pm2Supervisor {
    pub fn new(channel: Arc<dyn CommandChannel>, apps_root: impl Into<String>) -> Self {
        Self {
            channel,
            apps_root: apps_root.into(),
        }
    }

    fn to_info(raw: Pm2Process, now_ms: i64) -> ProcessInfo {
        let env_port = raw
            .pm2_env
            .env
            .get("PORT")
            .and_then(|v| match v {
                serde_json::Value::String(s) => s.parse::<u16>().ok(),
                serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                _ => None,
            });

        let uptime_ms = raw
            .pm2_env
            .pm_uptime
            .map(|started| (now_ms - started).max(0))
            .unwrap_or(0);

        ProcessInfo {
            name: raw.name,
            status: ProcessStatus::from_raw(&raw.pm2_env.status),
            pid: raw.pid.filter(|pid| *pid > 0),
            memory_bytes: raw.monit.as_ref().map(|m| m.memory).unwrap_or(0),
            cpu_percent: raw.monit.as_ref().map(|m| m.cpu).unwrap_or(0.0),
            uptime_ms,
            restarts: raw.pm2_env.restart_time.unwrap_or(0),
            cwd: raw.pm2_env.pm_cwd,
            env_port,
        }
    }
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn list(&self) -> Result<Vec<ProcessInfo>, EngineError> {
        let output = self.channel.exec("pm2 jlist").await?;
        if !output.success() {
            return Err(EngineError::SupervisorError(format!(
                "pm2 jlist failed: {}",
                output.detail()
            )));
        }

        // pm2 occasionally prefixes jlist output with daemon chatter;
        // the JSON array starts at the first '['
        let json_start = output.stdout.find('[').unwrap_or(0);
        let raw: Vec<Pm2Process> = serde_json::from_str(output.stdout[json_start..].trim())?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(raw.into_iter().map(|p| Self::to_info(p, now_ms)).collect())
    }

    async fn stop(&self, name: &str) -> Result<bool, EngineError> {
        let output = self
            .channel
            .exec(&format!("pm2 stop {}", shell_quote(name)))
            .await?;
        if !output.success() {
            debug!("pm2 stop {} failed: {}", name, output.detail());
        }
        Ok(output.success())
    }

    async fn restart(&self, name: &str) -> Result<bool, EngineError> {
        let output = self
            .channel
            .exec(&format!("pm2 restart {}", shell_quote(name)))
            .await?;
        if !output.success() {
            debug!("pm2 restart {} failed: {}", name, output.detail());
        }
        Ok(output.success())
    }

    async fn delete(&self, name: &str) -> Result<DeleteReport, EngineError> {
        let mut report = DeleteReport::default();

        // Resolve the working directory before the process record is gone
        let cwd = self.find(name).await?.and_then(|p| p.cwd);

        let output = self
            .channel
            .exec(&format!("pm2 delete {}", shell_quote(name)))
            .await?;
        report.process_removed = output.success();
        if !report.process_removed {
            warn!("pm2 delete {} failed: {}", name, output.detail());
        }

        match cwd {
            Some(dir) if dir.starts_with(&self.apps_root) => {
                let output = self
                    .channel
                    .exec(&format!("rm -rf {}", shell_quote(&dir)))
                    .await?;
                report.workdir_removed = output.success();
                if !report.workdir_removed {
                    // Partial cleanup is a logged defect, never silent
                    warn!(
                        "process {} removed but working directory {} was not: {}",
                        name,
                        dir,
                        output.detail()
                    );
                }
            }
            Some(dir) => {
                warn!(
                    "refusing to remove working directory {} outside {}",
                    dir, self.apps_root
                );
            }
            None => {
                // Nothing recorded: nothing to clean
                report.workdir_removed = true;
            }
        }

        Ok(report)
    }

    async fn tail_logs(&self, name: &str, lines: u32) -> Result<Vec<String>, EngineError> {
        let output = self
            .channel
            .exec(&format!(
                "pm2 logs {} --lines {} --nostream --raw",
                shell_quote(name),
                lines
            ))
            .await?;
        if !output.success() {
            return Err(EngineError::SupervisorError(format!(
                "pm2 logs {} failed: {}",
                name,
                output.detail()
            )));
        }
        Ok(output
            .stdout
            .lines()
            .map(|line| line.to_string())
            .collect())
    }
}
