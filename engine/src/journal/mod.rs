//! Deployment journal
//!
//! Every orchestration step emits a severity-tagged progress message that
//! is both persisted (ordered per deployment by sequence number) and
//! pushed to live subscribers. A lagging or absent subscriber never
//! blocks emission.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::errors::EngineError;
use crate::models::deployment::{DeploymentLogEntry, Severity};
use crate::store::LogStore;

const CHANNEL_CAPACITY: usize = 256;

/// Persisted + live deployment progress streams
pub struct Journal {
    logs: Arc<dyn LogStore>,
    channels: Mutex<HashMap<String, broadcast::Sender<DeploymentLogEntry>>>,
    firehose: broadcast::Sender<DeploymentLogEntry>,
}

impl Journal {
    pub fn new(logs: Arc<dyn LogStore>) -> Self {
        let (firehose, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            logs,
            channels: Mutex::new(HashMap::new()),
            firehose,
        }
    }

    /// Append an entry and fan it out to subscribers
    pub async fn emit(
        &self,
        deployment_id: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Result<DeploymentLogEntry, EngineError> {
        let message = message.into();
        match severity {
            Severity::Error => error!("[{}] {}", deployment_id, message),
            Severity::Warning => warn!("[{}] {}", deployment_id, message),
            _ => info!("[{}] {}", deployment_id, message),
        }

        let entry = self
            .logs
            .append(deployment_id, severity, message, Utc::now())
            .await?;

        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(deployment_id) {
            let _ = tx.send(entry.clone());
        }
        let _ = self.firehose.send(entry.clone());
        Ok(entry)
    }

    /// Subscribe to one deployment's live stream
    pub fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<DeploymentLogEntry> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(deployment_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every deployment's live stream at once
    pub fn subscribe_all(&self) -> broadcast::Receiver<DeploymentLogEntry> {
        self.firehose.subscribe()
    }

    /// Persisted history for a deployment, in sequence order
    pub async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, EngineError> {
        self.logs.entries(deployment_id).await
    }

    /// Drop a deployment's history and live channel. Part of the delete
    /// cascade.
    pub async fn purge(&self, deployment_id: &str) -> Result<(), EngineError> {
        self.logs.purge(deployment_id).await?;
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(deployment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryLogStore;

    #[tokio::test]
    async fn test_emit_persists_and_broadcasts() {
        let journal = Journal::new(Arc::new(MemoryLogStore::new()));
        let mut rx = journal.subscribe("d-1");

        journal
            .emit("d-1", Severity::Info, "allocating ports")
            .await
            .unwrap();
        journal
            .emit("d-1", Severity::Warning, "port not confirmed")
            .await
            .unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(second.severity, Severity::Warning);

        let history = journal.entries("d-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "allocating ports");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let journal = Journal::new(Arc::new(MemoryLogStore::new()));
        journal
            .emit("d-2", Severity::Success, "deployed")
            .await
            .unwrap();
        assert_eq!(journal.entries("d-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_clears_history() {
        let journal = Journal::new(Arc::new(MemoryLogStore::new()));
        journal.emit("d-3", Severity::Info, "x").await.unwrap();
        journal.purge("d-3").await.unwrap();
        assert!(journal.entries("d-3").await.unwrap().is_empty());
    }
}
