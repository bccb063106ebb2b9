//! Port allocation and verification
//!
//! Free ports are found by probing the host's live socket table, never
//! from persisted state: any local lease set is a transient cache,
//! rebuilt by probing and safe to discard.

pub mod detect;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::channel::CommandChannel;
use crate::errors::EngineError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// A transient, in-memory claim on a port. Leases exist only so
/// concurrent deploys in one process do not hand out the same port
/// before either binds it; they are recomputed by live probing and
/// never persisted as truth.
#[derive(Debug, Clone)]
pub struct PortLease {
    pub port: u16,
    pub allocated_at: DateTime<Utc>,
}

/// Port allocator options
#[derive(Debug, Clone)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 4000,
            max: 4999,
        }
    }
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

/// Allocates ports from a bounded range by probing the host
pub struct PortAllocator {
    channel: Arc<dyn CommandChannel>,
    range: PortRange,
    leases: Mutex<HashMap<u16, PortLease>>,
    cooldown: CooldownOptions,
}

impl PortAllocator {
    pub fn new(channel: Arc<dyn CommandChannel>, range: PortRange) -> Self {
        Self {
            channel,
            range,
            leases: Mutex::new(HashMap::new()),
            cooldown: CooldownOptions::default(),
        }
    }

    /// Find the first free port in the range.
    ///
    /// Best-effort only: the scan and the eventual bind are not atomic,
    /// so a race with another tenant is possible and accepted. Post-launch
    /// verification is the safety net, not this allocation.
    pub async fn find_free_port(&self) -> Result<u16, EngineError> {
        let listening = self.listening_ports().await?;
        let mut leases = self.leases.lock().await;

        let candidate = (self.range.min..=self.range.max)
            .find(|port| !listening.contains(port) && !leases.contains_key(port));

        let port = candidate.ok_or_else(|| {
            EngineError::PortExhausted(format!(
                "no free port in {}-{}",
                self.range.min, self.range.max
            ))
        })?;

        // Re-check the single candidate once before handing it out
        drop(leases);
        if self.is_listening(port).await? {
            warn!("port {} grabbed between scan and re-check", port);
            return Err(EngineError::PortExhausted(format!(
                "port {} was taken during allocation",
                port
            )));
        }

        self.leases.lock().await.insert(
            port,
            PortLease {
                port,
                allocated_at: Utc::now(),
            },
        );
        debug!("allocated port {}", port);
        Ok(port)
    }

    /// Confirm a candidate port is listening, retrying with short backoff.
    pub async fn verify(&self, port: u16, attempts: u32) -> Result<bool, EngineError> {
        for attempt in 0..attempts {
            if self.is_listening(port).await? {
                return Ok(true);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(calc_exp_backoff(&self.cooldown, attempt)).await;
            }
        }
        Ok(false)
    }

    /// Release a lease. Safe to call for ports never leased.
    pub async fn release(&self, port: u16) {
        self.leases.lock().await.remove(&port);
    }

    async fn listening_ports(&self) -> Result<BTreeSet<u16>, EngineError> {
        let output = self.channel.exec("ss -tlnH").await?;
        if !output.success() {
            return Err(EngineError::Internal(format!(
                "ss failed: {}",
                output.detail()
            )));
        }
        Ok(parse_listening_ports(&output.stdout))
    }

    async fn is_listening(&self, port: u16) -> Result<bool, EngineError> {
        let output = self
            .channel
            .exec(&format!("ss -tlnH \"sport = :{}\"", port))
            .await?;
        Ok(output.success() && !output.stdout.trim().is_empty())
    }
}

/// Parse local ports out of headerless `ss -tln` output
pub fn parse_listening_ports(text: &str) -> BTreeSet<u16> {
    text.lines()
        .filter_map(|line| {
            // LISTEN 0 511 0.0.0.0:4000 0.0.0.0:*
            let local = line.split_whitespace().nth(3)?;
            local.rsplit(':').next()?.parse::<u16>().ok()
        })
        .collect()
}
