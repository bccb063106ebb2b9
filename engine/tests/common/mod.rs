//! Shared test doubles: a scripted command channel, a mock builder, and
//! a fully wired engine harness over the in-memory stores.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use wharf::builder::{AppBuilder, BuildOutcome, BuildRequest};
use wharf::channel::{CommandChannel, CommandOutput};
use wharf::errors::EngineError;
use wharf::journal::Journal;
use wharf::models::grant::{GrantStatus, RoleQuota, SubscriptionGrant};
use wharf::monitor::{LifecycleMonitor, MonitorOptions};
use wharf::orchestrator::subdomain::SubdomainOptions;
use wharf::orchestrator::{Orchestrator, OrchestratorOptions};
use wharf::ports::{PortAllocator, PortRange};
use wharf::proxy::{ProxyOptions, ProxyProvisioner};
use wharf::store::memory::{MemoryDeploymentStore, MemoryGrantStore, MemoryLogStore};
use wharf::supervisor::pm2::Pm2Supervisor;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// A command channel answering from substring-matched rules. The most
/// recently pushed rule wins; unmatched commands succeed with empty
/// output.
#[derive(Default)]
pub struct ScriptedChannel {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    executed: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, String)>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap()
            .insert(0, (needle.to_string(), output));
    }

    pub fn commands(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    fn respond(&self, command: &str) -> CommandOutput {
        self.executed.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap();
        rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn exec(&self, command: &str) -> Result<CommandOutput, EngineError> {
        Ok(self.respond(command))
    }

    async fn exec_with_stdin(
        &self,
        command: &str,
        stdin: &str,
    ) -> Result<CommandOutput, EngineError> {
        self.writes
            .lock()
            .unwrap()
            .push((command.to_string(), stdin.to_string()));
        Ok(self.respond(command))
    }
}

/// Build/start collaborator double: succeeds unless told otherwise per
/// process name.
#[derive(Default)]
pub struct MockBuilder {
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<BuildRequest>>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_process(&self, process_name: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(process_name.to_string(), error.to_string());
    }

    pub fn clear_failure(&self, process_name: &str) {
        self.failures.lock().unwrap().remove(process_name);
    }

    pub fn calls(&self) -> Vec<BuildRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppBuilder for MockBuilder {
    async fn build_and_start(&self, request: &BuildRequest) -> Result<BuildOutcome, EngineError> {
        self.calls.lock().unwrap().push(request.clone());
        let failures = self.failures.lock().unwrap();
        Ok(match failures.get(&request.process_name) {
            Some(error) => BuildOutcome::Failed {
                error: error.clone(),
            },
            None => BuildOutcome::Started {
                message: "started".to_string(),
                reported_port: None,
            },
        })
    }
}

/// A fully wired engine over the in-memory stores and the scripted
/// channel, with delays zeroed for tests.
pub struct Harness {
    pub channel: Arc<ScriptedChannel>,
    pub builder: Arc<MockBuilder>,
    pub deployments: Arc<MemoryDeploymentStore>,
    pub grants: Arc<MemoryGrantStore>,
    pub journal: Arc<Journal>,
    pub orchestrator: Arc<Orchestrator>,
    pub monitor: LifecycleMonitor,
}

pub fn harness() -> Harness {
    let channel = Arc::new(ScriptedChannel::new());
    // Baseline: an empty supervisor and whatever ss reports by default
    channel.on("pm2 jlist", ok("[]"));

    let builder = Arc::new(MockBuilder::new());
    let deployments = Arc::new(MemoryDeploymentStore::new());
    let grants = Arc::new(MemoryGrantStore::new());
    let journal = Arc::new(Journal::new(Arc::new(MemoryLogStore::new())));
    let supervisor = Arc::new(Pm2Supervisor::new(channel.clone(), "/srv/apps"));
    let ports = Arc::new(PortAllocator::new(
        channel.clone(),
        PortRange {
            min: 4000,
            max: 4999,
        },
    ));
    let proxy = Arc::new(ProxyProvisioner::new(
        channel.clone(),
        ProxyOptions {
            tls: false,
            ..Default::default()
        },
    ));

    let options = OrchestratorOptions {
        settle_delay: Duration::ZERO,
        detect_retry_delay: Duration::ZERO,
        verify_attempts: 1,
        failure_log_tail: 10,
        subdomain: SubdomainOptions::default(),
        probe_external_url: false,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        channel.clone(),
        supervisor.clone(),
        ports,
        proxy,
        builder.clone(),
        deployments.clone(),
        grants.clone(),
        journal.clone(),
        options,
    ));

    let monitor = LifecycleMonitor::new(
        deployments.clone(),
        grants.clone(),
        supervisor,
        orchestrator.clone(),
        journal.clone(),
        MonitorOptions::default(),
    );

    Harness {
        channel,
        builder,
        deployments,
        grants,
        journal,
        orchestrator,
        monitor,
    }
}

/// An active grant with the given per-role limits, valid for
/// `days_left` more days (negative means the window already closed)
pub fn grant(user_id: &str, max_frontend: u32, max_backend: u32, days_left: i64) -> SubscriptionGrant {
    let now = Utc::now();
    SubscriptionGrant {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        plan_id: "pro".to_string(),
        quota: RoleQuota {
            max_frontend,
            max_backend,
        },
        features: vec!["custom-domains".to_string()],
        valid_from: now - chrono::Duration::days(30),
        valid_until: now + chrono::Duration::days(days_left),
        status: GrantStatus::Active,
        created_at: now,
    }
}

/// One pm2 jlist entry
pub fn jlist_entry(name: &str, status: &str, pid: Option<u32>) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "pid": pid,
        "monit": { "memory": 10_000_000, "cpu": 0.5 },
        "pm2_env": {
            "status": status,
            "pm_uptime": Utc::now().timestamp_millis() - 5_000,
            "restart_time": 0,
            "pm_cwd": format!("/srv/apps/{}", name),
            "env": {}
        }
    })
}

pub fn jlist(entries: Vec<serde_json::Value>) -> String {
    serde_json::Value::Array(entries).to_string()
}
