//! The deploy sequence
//!
//! Allocation happens before the opaque build/start call and the record
//! is persisted in between, so a crash mid-deploy leaves an inspectable
//! record rather than an orphaned remote process. Roles run in order;
//! one role's failure never silently aborts its sibling.

use std::time::Duration;

use tracing::debug;

use crate::builder::{BuildOutcome, BuildRequest};
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, OpStatus, RoleKind, RoleState, Severity};
use crate::models::grant::effective_grant;
use crate::orchestrator::{subdomain, DeployOutcome, DeploySpec, Orchestrator, RoleResult};
use crate::ports::detect::{detect_actual_port, ProbeContext};
use crate::supervisor::ProcessStatus;

impl Orchestrator {
    /// Run a full deployment for `user_id`.
    ///
    /// Always resolves to a definite status: `Deployed` when every
    /// requested role succeeded, `Failed` otherwise. Roles that succeeded
    /// before a sibling failed are not rolled back — retry and cleanup
    /// decisions belong to the caller (see [`Orchestrator::retry_role`]).
    pub async fn deploy(
        &self,
        user_id: &str,
        spec: DeploySpec,
    ) -> Result<DeployOutcome, EngineError> {
        if spec.roles.is_empty() {
            return Err(EngineError::ConfigError(
                "deploy spec names no roles".to_string(),
            ));
        }

        // 1. Quota headroom, before any remote side effect
        self.check_quota(user_id, &spec).await?;

        // 2. Globally unique subdomain: honored when requested and free,
        //    generated otherwise
        let sub = match &spec.subdomain {
            Some(requested) => {
                if !subdomain::is_valid_label(requested) {
                    return Err(EngineError::ConfigError(format!(
                        "invalid subdomain {:?}",
                        requested
                    )));
                }
                if self.deployments.subdomain_taken(requested).await? {
                    return Err(EngineError::ConfigError(format!(
                        "subdomain {} is taken",
                        requested
                    )));
                }
                requested.clone()
            }
            None => {
                subdomain::generate(self.deployments.as_ref(), &self.options.subdomain).await?
            }
        };

        // 3. One port per requested role
        let mut deployment = Deployment::new(user_id, sub.clone());
        deployment.env = spec.env.clone();
        for (role, repo_url) in &spec.roles {
            let port = match self.ports.find_free_port().await {
                Ok(port) => port,
                Err(e) => {
                    // Nothing persisted yet: hand back the ports already
                    // taken for earlier roles
                    for state in deployment.roles.values() {
                        self.ports.release(state.allocated_port).await;
                    }
                    return Err(e);
                }
            };
            let process_name = format!("{}-{}", sub, role);
            deployment
                .roles
                .insert(*role, RoleState::new(repo_url.clone(), port, process_name));
        }

        // 4. Persist allocated identifiers before the opaque RPC
        self.deployments.insert(deployment.clone()).await?;
        self.journal
            .emit(
                &deployment.id,
                Severity::Info,
                format!("deployment {} created under {}", deployment.id, sub),
            )
            .await?;

        // 5. Launch, verify, and provision each role
        let roles: Vec<RoleKind> = deployment.roles.keys().copied().collect();
        let mut results = Vec::new();
        for role in roles {
            let result = self.run_role(&mut deployment, role).await?;
            results.push(result);
        }

        // 6. Overall success requires every requested role to succeed
        let all_ok = results.iter().all(|r| r.success);
        let final_status = if all_ok {
            OpStatus::Deployed
        } else {
            OpStatus::Failed
        };
        deployment
            .transition(final_status)
            .map_err(EngineError::Internal)?;
        self.deployments.update(deployment.clone()).await?;

        if all_ok {
            self.journal
                .emit(&deployment.id, Severity::Success, "deployment is live")
                .await?;
        } else {
            self.journal
                .emit(&deployment.id, Severity::Error, "deployment failed")
                .await?;
        }

        Ok(DeployOutcome {
            deployment,
            roles: results,
        })
    }

    /// Re-run the launch → verify → provision pipeline for one role,
    /// keeping its allocated port and subdomain. Siblings that already
    /// succeeded are untouched; the deployment goes back to `Deployed`
    /// once every requested role is provisioned.
    pub async fn retry_role(
        &self,
        deployment_id: &str,
        role: RoleKind,
    ) -> Result<RoleResult, EngineError> {
        let mut deployment = self.require(deployment_id).await?;
        if !deployment.roles.contains_key(&role) {
            return Err(EngineError::NotFound(format!(
                "role {} on deployment {}",
                role, deployment_id
            )));
        }
        if deployment.status != OpStatus::Failed {
            return Err(EngineError::Internal(format!(
                "retry requires a failed deployment, found {:?}",
                deployment.status
            )));
        }

        deployment
            .transition(OpStatus::Deploying)
            .map_err(EngineError::Internal)?;
        self.deployments.update(deployment.clone()).await?;
        self.journal
            .emit(deployment_id, Severity::Info, format!("retrying {} role", role))
            .await?;

        let result = self.run_role(&mut deployment, role).await?;

        let final_status = if deployment.fully_provisioned() {
            OpStatus::Deployed
        } else {
            OpStatus::Failed
        };
        deployment
            .transition(final_status)
            .map_err(EngineError::Internal)?;
        self.deployments.update(deployment).await?;

        Ok(result)
    }

    async fn check_quota(&self, user_id: &str, spec: &DeploySpec) -> Result<(), EngineError> {
        let grants = self.grants.grants_for_user(user_id).await?;
        let now = chrono::Utc::now();
        let quota = effective_grant(&grants, now)
            .map(|g| g.quota)
            .unwrap_or_default();

        let existing = self.deployments.list_by_user(user_id).await?;
        for role in spec.roles.keys() {
            let used = existing
                .iter()
                .filter(|d| d.roles.contains_key(role))
                .count() as u32;
            if used + 1 > quota.limit(*role) {
                return Err(EngineError::QuotaExceeded(format!(
                    "plan allows {} {} deployment(s), {} in use",
                    quota.limit(*role),
                    role,
                    used
                )));
            }
        }
        Ok(())
    }

    /// Launch one role and carry it through settle, supervisor check,
    /// port detection, verification, and proxy provisioning. Failures
    /// are journaled and returned as a per-role result, never thrown.
    async fn run_role(
        &self,
        deployment: &mut Deployment,
        role: RoleKind,
    ) -> Result<RoleResult, EngineError> {
        let id = deployment.id.clone();
        let subdomain = deployment.subdomain.clone();
        let state = deployment
            .roles
            .get(&role)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("role {}", role)))?;
        let domain = self.proxy.fqdn(&subdomain, role);

        self.journal
            .emit(
                &id,
                Severity::Info,
                format!("building {} from {}", role, state.repo_url),
            )
            .await?;

        // Opaque build/start RPC
        let request = BuildRequest {
            repo_url: state.repo_url.clone(),
            port: state.allocated_port,
            domain: domain.clone(),
            process_name: state.process_name.clone(),
            env: deployment.env.clone(),
        };
        let outcome = match self.builder.build_and_start(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return self
                    .fail_role(deployment, role, format!("build failed: {}", e))
                    .await;
            }
        };
        match outcome {
            BuildOutcome::Started {
                message,
                reported_port,
            } => {
                self.journal
                    .emit(&id, Severity::Info, format!("{} launcher: {}", role, message))
                    .await?;
                if let Some(hint) = reported_port {
                    // A hint only; detection decides what actually bound
                    debug!("launcher reported port {} for {}", hint, state.process_name);
                }
            }
            BuildOutcome::Failed { error } => {
                return self
                    .fail_role(deployment, role, format!("build failed: {}", error))
                    .await;
            }
        }

        // Give the process a moment before judging it
        tokio::time::sleep(self.options.settle_delay).await;

        let process = match self.supervisor.find(&state.process_name).await? {
            Some(process) if process.status == ProcessStatus::Online => process,
            other => {
                let status = other
                    .map(|p| format!("{:?}", p.status))
                    .unwrap_or_else(|| "missing".to_string());
                let tail = self
                    .supervisor
                    .tail_logs(&state.process_name, self.options.failure_log_tail)
                    .await
                    .unwrap_or_default();
                let mut message =
                    format!("{} process is {} after launch", role, status.to_lowercase());
                if !tail.is_empty() {
                    message.push_str(&format!("; last output:\n{}", tail.join("\n")));
                }
                return self.fail_role(deployment, role, message).await;
            }
        };

        // Which port did it actually bind?
        let ctx = ProbeContext {
            channel: self.channel.as_ref(),
            supervisor: self.supervisor.as_ref(),
            process: &process,
            allocated_port: state.allocated_port,
        };
        let detected =
            detect_actual_port(&self.probes, &ctx, self.options.detect_retry_delay).await?;

        {
            let state = deployment.roles.get_mut(&role).expect("role present");
            state.port_confirmed = detected.confirmed;
            state.actual_port = detected.confirmed.then_some(detected.port);
        }
        if detected.confirmed && detected.port != state.allocated_port {
            self.journal
                .emit(
                    &id,
                    Severity::Warning,
                    format!(
                        "{} bound port {} instead of allocated {} (via {})",
                        role, detected.port, state.allocated_port, detected.source
                    ),
                )
                .await?;
        } else if !detected.confirmed {
            // Supervisor says online; that is an accepted, weaker signal
            self.journal
                .emit(
                    &id,
                    Severity::Warning,
                    format!(
                        "{} port not confirmed, assuming allocated port {}",
                        role, state.allocated_port
                    ),
                )
                .await?;
        }

        let effective_port = deployment.roles[&role].effective_port();
        if !self
            .ports
            .verify(effective_port, self.options.verify_attempts)
            .await?
        {
            // Process is online, so this degrades to a warning
            self.journal
                .emit(
                    &id,
                    Severity::Warning,
                    format!(
                        "{} port {} not verifiably listening, continuing",
                        role, effective_port
                    ),
                )
                .await?;
        }
        self.deployments.update(deployment.clone()).await?;

        // Make it reachable
        let vhost = match self
            .proxy
            .create_subdomain_config(&subdomain, effective_port, role)
            .await
        {
            Ok(vhost) => vhost,
            Err(e) => {
                // The process may be healthy, but an unreachable service
                // is a failure from the user's viewpoint
                return self
                    .fail_role(deployment, role, format!("proxy provisioning failed: {}", e))
                    .await;
            }
        };

        {
            let state = deployment.roles.get_mut(&role).expect("role present");
            state.url = Some(vhost.url.clone());
            state.provisioned = true;
            state.last_error = None;
        }
        self.deployments.update(deployment.clone()).await?;
        self.journal
            .emit(
                &id,
                Severity::Success,
                format!("{} live at {}", role, vhost.url),
            )
            .await?;

        if self.options.probe_external_url {
            self.probe_external(&id, role, &vhost.url).await;
        }

        Ok(RoleResult {
            role,
            success: true,
            detail: vhost.url,
        })
    }

    /// One reachability probe after provisioning. DNS propagation lag is
    /// expected, so an unreachable URL is only ever a warning.
    async fn probe_external(&self, deployment_id: &str, role: RoleKind, url: &str) {
        let reachable = match self
            .http
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        };
        if !reachable {
            let _ = self
                .journal
                .emit(
                    deployment_id,
                    Severity::Warning,
                    format!("{} not yet reachable at {}", role, url),
                )
                .await;
        }
    }

    async fn fail_role(
        &self,
        deployment: &mut Deployment,
        role: RoleKind,
        message: String,
    ) -> Result<RoleResult, EngineError> {
        self.journal
            .emit(&deployment.id, Severity::Error, message.clone())
            .await?;
        if let Some(state) = deployment.roles.get_mut(&role) {
            state.last_error = Some(message.clone());
        }
        self.deployments.update(deployment.clone()).await?;
        Ok(RoleResult {
            role,
            success: false,
            detail: message,
        })
    }
}
