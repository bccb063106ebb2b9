//! Deployment orchestrator
//!
//! Sequences subdomain/port allocation, the opaque build/start call,
//! verification, proxy provisioning, state transitions, and journal
//! emission. Orchestrations for different deployments run concurrently
//! at this level and serialize on the shared command channel underneath.

pub mod deploy;
pub mod subdomain;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::builder::AppBuilder;
use crate::channel::CommandChannel;
use crate::errors::EngineError;
use crate::journal::Journal;
use crate::models::deployment::{Deployment, OpStatus, RoleKind, Severity};
use crate::ports::detect::{default_probes, PortProbe};
use crate::ports::PortAllocator;
use crate::proxy::ProxyProvisioner;
use crate::store::{DeploymentStore, GrantStore};
use crate::supervisor::{ProcessInfo, Supervisor};
use self::subdomain::SubdomainOptions;

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Delay between a successful launch and the first supervisor check
    pub settle_delay: Duration,

    /// Delay before the detection cascade's single retry
    pub detect_retry_delay: Duration,

    /// Attempts for post-detection port verification
    pub verify_attempts: u32,

    /// Supervisor log lines attached to a failed role
    pub failure_log_tail: u32,

    /// Subdomain generation
    pub subdomain: SubdomainOptions,

    /// Probe the external URL once after provisioning (warning-only)
    pub probe_external_url: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(8),
            detect_retry_delay: Duration::from_secs(3),
            verify_attempts: 3,
            failure_log_tail: 30,
            subdomain: SubdomainOptions::default(),
            probe_external_url: true,
        }
    }
}

/// What a caller asks to deploy: one repo per requested role, plus
/// free-form environment variables shared by the roles
#[derive(Debug, Clone, Default)]
pub struct DeploySpec {
    pub roles: BTreeMap<RoleKind, String>,
    pub env: HashMap<String, String>,

    /// Requested subdomain label; generated when absent, rejected when
    /// taken or malformed
    pub subdomain: Option<String>,
}

impl DeploySpec {
    pub fn frontend(repo_url: impl Into<String>) -> Self {
        Self {
            roles: BTreeMap::from([(RoleKind::Frontend, repo_url.into())]),
            env: HashMap::new(),
            subdomain: None,
        }
    }

    pub fn with_backend(mut self, repo_url: impl Into<String>) -> Self {
        self.roles.insert(RoleKind::Backend, repo_url.into());
        self
    }

    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }
}

/// Per-role outcome of an orchestration or control operation
#[derive(Debug, Clone)]
pub struct RoleResult {
    pub role: RoleKind,
    pub success: bool,
    pub detail: String,
}

/// Final result of `deploy`
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub deployment: Deployment,
    pub roles: Vec<RoleResult>,
}

/// Result of stop/restart/delete
#[derive(Debug, Clone)]
pub struct ControlOutcome {
    pub success: bool,
    pub roles: Vec<RoleResult>,
}

/// Live status report
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub deployment: Deployment,
    pub processes: BTreeMap<RoleKind, Option<ProcessInfo>>,
}

/// The deployment orchestrator
pub struct Orchestrator {
    pub(crate) supervisor: Arc<dyn Supervisor>,
    pub(crate) channel: Arc<dyn CommandChannel>,
    pub(crate) ports: Arc<PortAllocator>,
    pub(crate) proxy: Arc<ProxyProvisioner>,
    pub(crate) builder: Arc<dyn AppBuilder>,
    pub(crate) deployments: Arc<dyn DeploymentStore>,
    pub(crate) grants: Arc<dyn GrantStore>,
    pub(crate) journal: Arc<Journal>,
    pub(crate) probes: Vec<Box<dyn PortProbe>>,
    pub(crate) http: reqwest::Client,
    pub(crate) options: OrchestratorOptions,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        supervisor: Arc<dyn Supervisor>,
        ports: Arc<PortAllocator>,
        proxy: Arc<ProxyProvisioner>,
        builder: Arc<dyn AppBuilder>,
        deployments: Arc<dyn DeploymentStore>,
        grants: Arc<dyn GrantStore>,
        journal: Arc<Journal>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            channel,
            supervisor,
            ports,
            proxy,
            builder,
            deployments,
            grants,
            journal,
            probes: default_probes(),
            http: reqwest::Client::new(),
            options,
        }
    }

    /// Stop every role's process. The status flips to `Stopped` only when
    /// all present roles succeed; partial failure leaves it unchanged.
    pub async fn stop(&self, deployment_id: &str) -> Result<ControlOutcome, EngineError> {
        let mut deployment = self.require(deployment_id).await?;

        let mut roles = Vec::new();
        for (role, state) in &deployment.roles {
            let stopped = self.supervisor.stop(&state.process_name).await?;
            roles.push(RoleResult {
                role: *role,
                success: stopped,
                detail: if stopped {
                    format!("{} stopped", state.process_name)
                } else {
                    format!("{} did not stop", state.process_name)
                },
            });
        }

        let success = !roles.is_empty() && roles.iter().all(|r| r.success);
        if success && deployment.status == OpStatus::Deployed {
            deployment
                .transition(OpStatus::Stopped)
                .map_err(EngineError::Internal)?;
            self.deployments.update(deployment.clone()).await?;
            self.journal
                .emit(deployment_id, Severity::Info, "deployment stopped")
                .await?;
        } else if !success {
            self.journal
                .emit(
                    deployment_id,
                    Severity::Warning,
                    "stop incomplete, status unchanged",
                )
                .await?;
        }

        Ok(ControlOutcome { success, roles })
    }

    /// Restart every role's process; all-or-nothing for the status
    /// transition, same as `stop`.
    pub async fn restart(&self, deployment_id: &str) -> Result<ControlOutcome, EngineError> {
        let mut deployment = self.require(deployment_id).await?;

        let mut roles = Vec::new();
        for (role, state) in &deployment.roles {
            let restarted = self.supervisor.restart(&state.process_name).await?;
            roles.push(RoleResult {
                role: *role,
                success: restarted,
                detail: if restarted {
                    format!("{} restarted", state.process_name)
                } else {
                    format!("{} did not restart", state.process_name)
                },
            });
        }

        let success = !roles.is_empty() && roles.iter().all(|r| r.success);
        if success && deployment.status == OpStatus::Stopped {
            deployment
                .transition(OpStatus::Deployed)
                .map_err(EngineError::Internal)?;
            self.deployments.update(deployment.clone()).await?;
            self.journal
                .emit(deployment_id, Severity::Success, "deployment restarted")
                .await?;
        } else if !success {
            self.journal
                .emit(
                    deployment_id,
                    Severity::Warning,
                    "restart incomplete, status unchanged",
                )
                .await?;
        }

        Ok(ControlOutcome { success, roles })
    }

    /// Tear everything down as one cascading unit: processes + working
    /// directories, vhosts + certificates, port leases, journal history,
    /// and finally the record. Steps are best-effort-complete — one
    /// step's failure is journaled and does not block the rest.
    pub async fn delete(&self, deployment_id: &str) -> Result<ControlOutcome, EngineError> {
        let deployment = self.require(deployment_id).await?;

        self.journal
            .emit(deployment_id, Severity::Info, "deleting deployment")
            .await?;

        let mut roles = Vec::new();
        for (role, state) in &deployment.roles {
            let mut success = true;
            let mut details = Vec::new();

            match self.supervisor.delete(&state.process_name).await {
                Ok(report) if report.complete() => {
                    details.push("process and working directory removed".to_string());
                }
                Ok(report) => {
                    success = false;
                    // Partial cleanup is a defect worth recording, not a
                    // valid end state
                    let what = format!(
                        "partial cleanup: process removed={}, workdir removed={}",
                        report.process_removed, report.workdir_removed
                    );
                    self.journal
                        .emit(deployment_id, Severity::Error, what.clone())
                        .await?;
                    details.push(what);
                }
                Err(e) => {
                    success = false;
                    let what = format!("supervisor teardown failed: {}", e);
                    self.journal
                        .emit(deployment_id, Severity::Error, what.clone())
                        .await?;
                    details.push(what);
                }
            }

            if state.provisioned {
                if let Err(e) = self
                    .proxy
                    .delete_subdomain_config(&deployment.subdomain, *role)
                    .await
                {
                    success = false;
                    let what = format!("proxy teardown failed: {}", e);
                    self.journal
                        .emit(deployment_id, Severity::Error, what.clone())
                        .await?;
                    details.push(what);
                }
            }

            self.ports.release(state.allocated_port).await;
            if let Some(actual) = state.actual_port {
                self.ports.release(actual).await;
            }

            roles.push(RoleResult {
                role: *role,
                success,
                detail: details.join("; "),
            });
        }

        let success = roles.iter().all(|r| r.success);
        self.journal
            .emit(deployment_id, Severity::Info, "deployment deleted")
            .await?;
        if let Err(e) = self.journal.purge(deployment_id).await {
            warn!("purging journal for {} failed: {}", deployment_id, e);
        }
        self.deployments.remove(deployment_id).await?;

        Ok(ControlOutcome { success, roles })
    }

    /// Deployment snapshot plus per-role runtime status read live from
    /// the supervisor
    pub async fn get_status(&self, deployment_id: &str) -> Result<StatusReport, EngineError> {
        let deployment = self.require(deployment_id).await?;
        let processes = self.supervisor.list().await?;

        let mut by_role = BTreeMap::new();
        for (role, state) in &deployment.roles {
            let process = processes
                .iter()
                .find(|p| p.name == state.process_name)
                .cloned();
            by_role.insert(*role, process);
        }

        Ok(StatusReport {
            deployment,
            processes: by_role,
        })
    }

    pub(crate) async fn require(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        self.deployments
            .get(deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("deployment {}", deployment_id)))
    }
}
