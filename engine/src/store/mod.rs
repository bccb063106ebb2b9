//! Persistence seams
//!
//! The database's storage mechanics are out of scope: these traits are
//! the interface the engine persists through, with complete in-memory
//! implementations as the default backing. A SQL-backed store is a
//! drop-in behind the same traits.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentLogEntry, Severity};
use crate::models::grant::SubscriptionGrant;

/// Deployment persistence
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment. Fails if the subdomain is already taken:
    /// the store is the authority on subdomain uniqueness.
    async fn insert(&self, deployment: Deployment) -> Result<(), EngineError>;

    /// Replace an existing deployment record
    async fn update(&self, deployment: Deployment) -> Result<(), EngineError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError>;

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Deployment>, EngineError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Deployment>, EngineError>;

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError>;

    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    async fn subdomain_taken(&self, subdomain: &str) -> Result<bool, EngineError> {
        Ok(self.get_by_subdomain(subdomain).await?.is_some())
    }
}

/// Grant persistence. Written by the external payment-webhook handler;
/// the engine only reads and sweeps expiries.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn insert(&self, grant: SubscriptionGrant) -> Result<(), EngineError>;

    async fn update(&self, grant: SubscriptionGrant) -> Result<(), EngineError>;

    async fn grants_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionGrant>, EngineError>;

    /// All user ids holding at least one grant
    async fn user_ids(&self) -> Result<Vec<String>, EngineError>;
}

/// Deployment log persistence
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an entry, assigning the next per-deployment sequence number
    async fn append(
        &self,
        deployment_id: &str,
        severity: Severity,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Result<DeploymentLogEntry, EngineError>;

    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, EngineError>;

    /// Remove all entries for a deployment
    async fn purge(&self, deployment_id: &str) -> Result<(), EngineError>;
}
