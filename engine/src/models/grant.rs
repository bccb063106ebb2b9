//! Subscription grant models
//!
//! Grant records are produced by an external payment-webhook handler and
//! consumed read-only here, except for the expiry sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::RoleKind;

/// Grant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Trialing,
    Expired,
    Canceled,
}

/// Per-role quota limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleQuota {
    pub max_frontend: u32,
    pub max_backend: u32,
}

impl RoleQuota {
    pub fn limit(&self, role: RoleKind) -> u32 {
        match role {
            RoleKind::Frontend => self.max_frontend,
            RoleKind::Backend => self.max_backend,
        }
    }
}

/// A time-bounded subscription record defining quota and feature
/// entitlements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionGrant {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub quota: RoleQuota,
    pub features: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: GrantStatus,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionGrant {
    /// A grant confers quota while active or trialing and inside its
    /// validity window
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, GrantStatus::Active | GrantStatus::Trialing)
            && self.valid_from <= now
            && now < self.valid_until
    }

    /// True for a grant whose window has closed but whose status has not
    /// been flipped yet — the expiry sweep's input
    pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, GrantStatus::Active | GrantStatus::Trialing)
            && now >= self.valid_until
    }
}

/// The single grant quota derives from: the most recently created
/// usable grant. None means zero fresh-deploy quota.
pub fn effective_grant(
    grants: &[SubscriptionGrant],
    now: DateTime<Utc>,
) -> Option<&SubscriptionGrant> {
    grants
        .iter()
        .filter(|g| g.is_usable(now))
        .max_by_key(|g| g.created_at)
}

/// The user's most recent grant regardless of usability — distinguishes
/// "subscription lapsed" from "never subscribed"
pub fn latest_grant(grants: &[SubscriptionGrant]) -> Option<&SubscriptionGrant> {
    grants.iter().max_by_key(|g| g.created_at)
}
