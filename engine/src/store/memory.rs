//! In-memory store implementations
//!
//! The deployment map is the arena (truth); the subdomain map is an
//! index over it — rebuildable, never authoritative on its own.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentLogEntry, Severity};
use crate::models::grant::SubscriptionGrant;
use crate::store::{DeploymentStore, GrantStore, LogStore};

#[derive(Default)]
struct DeploymentArena {
    by_id: HashMap<String, Deployment>,
    subdomain_index: HashMap<String, String>,
}

/// In-memory deployment store
#[derive(Default)]
pub struct MemoryDeploymentStore {
    inner: RwLock<DeploymentArena>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn insert(&self, deployment: Deployment) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if inner.subdomain_index.contains_key(&deployment.subdomain) {
            return Err(EngineError::StoreError(format!(
                "subdomain {} already taken",
                deployment.subdomain
            )));
        }
        if inner.by_id.contains_key(&deployment.id) {
            return Err(EngineError::StoreError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        inner
            .subdomain_index
            .insert(deployment.subdomain.clone(), deployment.id.clone());
        inner.by_id.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn update(&self, deployment: Deployment) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if !inner.by_id.contains_key(&deployment.id) {
            return Err(EngineError::NotFound(format!(
                "deployment {}",
                deployment.id
            )));
        }
        inner.by_id.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        Ok(self.inner.read().await.by_id.get(id).cloned())
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Deployment>, EngineError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subdomain_index
            .get(subdomain)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Deployment>, EngineError> {
        let inner = self.inner.read().await;
        let mut deployments: Vec<Deployment> = inner
            .by_id
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(deployments)
    }

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError> {
        let inner = self.inner.read().await;
        let mut deployments: Vec<Deployment> = inner.by_id.values().cloned().collect();
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(deployments)
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if let Some(deployment) = inner.by_id.remove(id) {
            inner.subdomain_index.remove(&deployment.subdomain);
        }
        Ok(())
    }
}

/// In-memory grant store
#[derive(Default)]
pub struct MemoryGrantStore {
    inner: RwLock<HashMap<String, SubscriptionGrant>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn insert(&self, grant: SubscriptionGrant) -> Result<(), EngineError> {
        self.inner.write().await.insert(grant.id.clone(), grant);
        Ok(())
    }

    async fn update(&self, grant: SubscriptionGrant) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if !inner.contains_key(&grant.id) {
            return Err(EngineError::NotFound(format!("grant {}", grant.id)));
        }
        inner.insert(grant.id.clone(), grant);
        Ok(())
    }

    async fn grants_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionGrant>, EngineError> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn user_ids(&self) -> Result<Vec<String>, EngineError> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .await
            .values()
            .map(|g| g.user_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[derive(Default)]
struct LogArena {
    entries: HashMap<String, Vec<DeploymentLogEntry>>,
    next_seq: HashMap<String, u64>,
}

/// In-memory log store
#[derive(Default)]
pub struct MemoryLogStore {
    inner: RwLock<LogArena>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        deployment_id: &str,
        severity: Severity,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Result<DeploymentLogEntry, EngineError> {
        let mut inner = self.inner.write().await;
        let seq = inner
            .next_seq
            .entry(deployment_id.to_string())
            .or_insert(0);
        let entry = DeploymentLogEntry {
            deployment_id: deployment_id.to_string(),
            seq: *seq,
            severity,
            message,
            timestamp,
        };
        *seq += 1;
        inner
            .entries
            .entry(deployment_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, EngineError> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .get(deployment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn purge(&self, deployment_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        inner.entries.remove(deployment_id);
        inner.next_seq.remove(deployment_id);
        Ok(())
    }
}
