//! Process supervisor adapter
//!
//! Queries and mutates named long-running processes on the managed host
//! through the command channel.

pub mod pm2;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Status of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Errored,
    Launching,
    Unknown,
}

impl ProcessStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "online" => ProcessStatus::Online,
            "stopped" => ProcessStatus::Stopped,
            "errored" => ProcessStatus::Errored,
            "launching" => ProcessStatus::Launching,
            _ => ProcessStatus::Unknown,
        }
    }
}

/// A supervised process as reported by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub uptime_ms: i64,
    pub restarts: u32,
    pub cwd: Option<String>,
    /// PORT value recorded in the process environment, if any
    pub env_port: Option<u16>,
}

/// Result of a cascading delete: the process half and the working
/// directory half are reported separately so partial cleanup is visible.
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub process_removed: bool,
    pub workdir_removed: bool,
}

impl DeleteReport {
    pub fn complete(&self) -> bool {
        self.process_removed && self.workdir_removed
    }
}

/// Supervisor trait
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// List all supervised processes
    async fn list(&self) -> Result<Vec<ProcessInfo>, EngineError>;

    /// Stop a process by name
    async fn stop(&self, name: &str) -> Result<bool, EngineError>;

    /// Restart a process by name
    async fn restart(&self, name: &str) -> Result<bool, EngineError>;

    /// Stop a process and remove its working directory as one cascading
    /// operation
    async fn delete(&self, name: &str) -> Result<DeleteReport, EngineError>;

    /// Return the last `lines` lines of captured process output
    async fn tail_logs(&self, name: &str, lines: u32) -> Result<Vec<String>, EngineError>;

    /// Find one process by name
    async fn find(&self, name: &str) -> Result<Option<ProcessInfo>, EngineError> {
        let processes = self.list().await?;
        Ok(processes.into_iter().find(|p| p.name == name))
    }
}
