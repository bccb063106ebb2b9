//! Deployment models
//!
//! The operational axis (deploying/deployed/stopped/failed) and the
//! billing axis (active/suspended/deleted) are two orthogonal fields:
//! "deployed AND suspended" is a legal, representable combination. The
//! suspended variant structurally owns its delete deadline, so a
//! suspension without one cannot exist.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the (at most two) independently deployed parts of a Deployment
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Frontend,
    Backend,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Frontend => "frontend",
            RoleKind::Backend => "backend",
        }
    }

    pub fn all() -> [RoleKind; 2] {
        [RoleKind::Frontend, RoleKind::Backend]
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    /// Orchestration in progress
    Deploying,

    /// Every requested role is provisioned and reachable
    Deployed,

    /// Processes stopped, provisioning intact
    Stopped,

    /// At least one role failed
    Failed,
}

impl OpStatus {
    /// Status is monotonic except the reversible deployed/stopped cycle;
    /// a failed deployment may re-enter deploying through per-role retry.
    pub fn can_transition(&self, to: OpStatus) -> bool {
        matches!(
            (self, to),
            (OpStatus::Deploying, OpStatus::Deployed)
                | (OpStatus::Deploying, OpStatus::Failed)
                | (OpStatus::Deployed, OpStatus::Stopped)
                | (OpStatus::Stopped, OpStatus::Deployed)
                | (OpStatus::Failed, OpStatus::Deploying)
        )
    }
}

/// Billing status, orthogonal to `OpStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BillingStatus {
    Active,
    Suspended {
        /// Absolute deadline after which the deployment is reaped
        delete_deadline: DateTime<Utc>,
    },
    Deleted,
}

/// Per-role deployment state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleState {
    /// Source repository
    pub repo_url: String,

    /// Port handed to the launcher
    pub allocated_port: u16,

    /// Port the process was observed to actually bind
    pub actual_port: Option<u16>,

    /// False when detection stayed inconclusive and the allocated port
    /// was assumed
    pub port_confirmed: bool,

    /// External URL once the proxy is provisioned
    pub url: Option<String>,

    /// Supervisor process name
    pub process_name: String,

    /// True once the role's vhost is enabled
    pub provisioned: bool,

    /// Last role-level failure, if any
    pub last_error: Option<String>,
}

impl RoleState {
    pub fn new(repo_url: String, allocated_port: u16, process_name: String) -> Self {
        Self {
            repo_url,
            allocated_port,
            actual_port: None,
            port_confirmed: false,
            url: None,
            process_name,
            provisioned: false,
            last_error: None,
        }
    }

    /// The port the proxy should target: the confirmed actual port when
    /// known, else the allocated one
    pub fn effective_port(&self) -> u16 {
        self.actual_port.unwrap_or(self.allocated_port)
    }
}

/// A user's request to run one or two roles of a repository as a public
/// service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub user_id: String,
    pub subdomain: String,
    pub roles: BTreeMap<RoleKind, RoleState>,
    pub status: OpStatus,
    pub billing: BillingStatus,
    pub env: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(user_id: impl Into<String>, subdomain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            subdomain: subdomain.into(),
            roles: BTreeMap::new(),
            status: OpStatus::Deploying,
            billing: BillingStatus::Active,
            env: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a guarded operational transition
    pub fn transition(&mut self, to: OpStatus) -> Result<(), String> {
        if !self.status.can_transition(to) {
            return Err(format!(
                "invalid transition: {:?} -> {:?}",
                self.status, to
            ));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.billing, BillingStatus::Suspended { .. })
    }

    pub fn delete_deadline(&self) -> Option<DateTime<Utc>> {
        match self.billing {
            BillingStatus::Suspended { delete_deadline } => Some(delete_deadline),
            _ => None,
        }
    }

    /// Suspend with an absolute delete deadline. Idempotent: an existing
    /// suspension keeps its deadline.
    pub fn suspend(&mut self, delete_deadline: DateTime<Utc>) {
        if self.is_suspended() {
            return;
        }
        self.billing = BillingStatus::Suspended { delete_deadline };
        self.updated_at = Utc::now();
    }

    /// True when every present role is fully provisioned
    pub fn fully_provisioned(&self) -> bool {
        !self.roles.is_empty() && self.roles.values().all(|r| r.provisioned)
    }
}

/// Severity of a deployment log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One entry in a deployment's ordered, append-only progress stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub deployment_id: String,

    /// Per-deployment monotonically increasing sequence number
    pub seq: u64,

    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
