//! Subscription lifecycle monitor
//!
//! Reconciles entitlements against live deployments: expires lapsed
//! grants, suspends over-quota capacity with a grace deadline, and reaps
//! suspended deployments once the deadline passes. Per-user failures are
//! logged and swallowed so one user's trouble never halts the sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::EngineError;
use crate::journal::Journal;
use crate::models::deployment::{OpStatus, Severity};
use crate::models::grant::{effective_grant, latest_grant, GrantStatus};
use crate::orchestrator::Orchestrator;
use crate::store::{DeploymentStore, GrantStore};
use crate::supervisor::Supervisor;

/// Monitor policy options
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Grace window between suspension and permanent deletion
    pub grace: Duration,

    /// Deployments an unentitled user keeps running. Users whose most
    /// recent grant lapsed keep none.
    pub retained_deployments: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            grace: Duration::days(7),
            retained_deployments: 1,
        }
    }
}

/// A single user-facing notice
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningItem {
    SubscriptionExpired {
        affected_deployments: usize,
    },
    PendingDeletion {
        deployment_id: String,
        subdomain: String,
        days_until_deletion: i64,
    },
}

/// Read-only warning derivation for one user
#[derive(Debug, Clone, Serialize)]
pub struct Warnings {
    pub has_warnings: bool,
    pub items: Vec<WarningItem>,
}

/// The subscription lifecycle monitor
pub struct LifecycleMonitor {
    deployments: Arc<dyn DeploymentStore>,
    grants: Arc<dyn GrantStore>,
    supervisor: Arc<dyn Supervisor>,
    orchestrator: Arc<Orchestrator>,
    journal: Arc<Journal>,
    options: MonitorOptions,
}

impl LifecycleMonitor {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        grants: Arc<dyn GrantStore>,
        supervisor: Arc<dyn Supervisor>,
        orchestrator: Arc<Orchestrator>,
        journal: Arc<Journal>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            deployments,
            grants,
            supervisor,
            orchestrator,
            journal,
            options,
        }
    }

    /// One full pass: expire grants, enforce limits per user, then reap.
    pub async fn sweep(&self) {
        let users = match self.known_users().await {
            Ok(users) => users,
            Err(e) => {
                error!("lifecycle sweep aborted, cannot list users: {}", e);
                return;
            }
        };

        for user_id in users {
            if let Err(e) = self.expire_grants(&user_id).await {
                warn!("grant expiry for {} failed: {}", user_id, e);
            }
            if let Err(e) = self.enforce_limits(&user_id).await {
                warn!("limit enforcement for {} failed: {}", user_id, e);
            }
        }

        self.reap().await;
    }

    /// Flip grants past their validity window to `expired`, and keep at
    /// most one active-or-trialing grant per user — storage does not
    /// enforce that, this sweep does.
    pub async fn expire_grants(&self, user_id: &str) -> Result<(), EngineError> {
        let now = Utc::now();
        for grant in self.grants.grants_for_user(user_id).await? {
            if grant.is_past_validity(now) {
                info!("grant {} for {} expired", grant.id, user_id);
                let mut expired = grant;
                expired.status = GrantStatus::Expired;
                self.grants.update(expired).await?;
            }
        }

        let mut usable: Vec<_> = self
            .grants
            .grants_for_user(user_id)
            .await?
            .into_iter()
            .filter(|g| g.is_usable(now))
            .collect();
        usable.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for superseded in usable.into_iter().skip(1) {
            info!(
                "grant {} for {} superseded by a newer grant",
                superseded.id, user_id
            );
            let mut canceled = superseded;
            canceled.status = GrantStatus::Canceled;
            self.grants.update(canceled).await?;
        }
        Ok(())
    }

    /// Suspend capacity the user is no longer entitled to.
    ///
    /// Idempotent: already-suspended deployments keep their original
    /// delete deadline. Deployments mid-orchestration are skipped for
    /// this pass.
    pub async fn enforce_limits(&self, user_id: &str) -> Result<(), EngineError> {
        let now = Utc::now();
        let grants = self.grants.grants_for_user(user_id).await?;
        if effective_grant(&grants, now).is_some() {
            return Ok(());
        }

        // A lapsed subscriber keeps nothing; a user who never subscribed
        // keeps the retained allowance
        let retained = if latest_grant(&grants).is_some() {
            0
        } else {
            self.options.retained_deployments
        };

        let mut deployments = self.deployments.list_by_user(user_id).await?;
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for mut deployment in deployments.into_iter().skip(retained) {
            if deployment.is_suspended() {
                continue;
            }
            if deployment.status == OpStatus::Deploying {
                // Not in a suspendable state; pick it up next pass
                continue;
            }

            for state in deployment.roles.values() {
                if !self.supervisor.stop(&state.process_name).await.unwrap_or(false) {
                    warn!("stopping {} during suspension failed", state.process_name);
                }
            }
            if deployment.status == OpStatus::Deployed {
                deployment
                    .transition(OpStatus::Stopped)
                    .map_err(EngineError::Internal)?;
            }

            let deadline = now + self.options.grace;
            deployment.suspend(deadline);
            self.deployments.update(deployment.clone()).await?;
            self.journal
                .emit(
                    &deployment.id,
                    Severity::Warning,
                    format!(
                        "suspended for lack of an active subscription; permanent deletion after {}",
                        deadline.format("%Y-%m-%d")
                    ),
                )
                .await?;
        }
        Ok(())
    }

    /// Delete suspended deployments whose grace deadline has passed. The
    /// only path performing billing-driven deletion.
    pub async fn reap(&self) {
        let now = Utc::now();
        let deployments = match self.deployments.list_all().await {
            Ok(deployments) => deployments,
            Err(e) => {
                error!("reap pass aborted, cannot list deployments: {}", e);
                return;
            }
        };

        for deployment in deployments {
            let Some(deadline) = deployment.delete_deadline() else {
                continue;
            };
            if deadline > now {
                continue;
            }
            info!(
                "reaping deployment {} (deadline {} passed)",
                deployment.id, deadline
            );
            if let Err(e) = self.orchestrator.delete(&deployment.id).await {
                error!("reaping {} failed: {}", deployment.id, e);
            }
        }
    }

    /// Read-only notices for one user. No mutation side effect.
    pub async fn get_warnings(&self, user_id: &str) -> Result<Warnings, EngineError> {
        let now = Utc::now();
        let mut items = Vec::new();

        let grants = self.grants.grants_for_user(user_id).await?;
        let deployments = self.deployments.list_by_user(user_id).await?;

        let lapsed = effective_grant(&grants, now).is_none()
            && latest_grant(&grants).is_some();
        if lapsed {
            items.push(WarningItem::SubscriptionExpired {
                affected_deployments: deployments.len(),
            });
        }

        for deployment in &deployments {
            if let Some(deadline) = deployment.delete_deadline() {
                let seconds_left = (deadline - now).num_seconds().max(0);
                items.push(WarningItem::PendingDeletion {
                    deployment_id: deployment.id.clone(),
                    subdomain: deployment.subdomain.clone(),
                    days_until_deletion: (seconds_left + 86_399) / 86_400,
                });
            }
        }

        Ok(Warnings {
            has_warnings: !items.is_empty(),
            items,
        })
    }

    /// Everyone the sweep must consider: grant holders plus deployment
    /// owners (a deployment can outlive its last grant)
    async fn known_users(&self) -> Result<Vec<String>, EngineError> {
        let mut users = self.grants.user_ids().await?;
        for deployment in self.deployments.list_all().await? {
            users.push(deployment.user_id);
        }
        users.sort();
        users.dedup();
        Ok(users)
    }
}
