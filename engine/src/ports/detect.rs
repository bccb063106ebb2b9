//! Actual-port detection cascade
//!
//! A process told to bind an allocated port may bind another one (dev
//! servers self-select when their preferred port is taken). Detection is
//! an ordered list of independent, uniformly-signed probes that
//! short-circuit on the first positive result.

use async_trait::async_trait;
use regex_lite::Regex;
use std::time::Duration;
use tracing::{debug, info};

use crate::channel::CommandChannel;
use crate::errors::EngineError;
use crate::supervisor::{ProcessInfo, Supervisor};

/// Context shared by every probe in one detection run
pub struct ProbeContext<'a> {
    pub channel: &'a dyn CommandChannel,
    pub supervisor: &'a dyn Supervisor,
    pub process: &'a ProcessInfo,
    pub allocated_port: u16,
}

/// A single port detection strategy
#[async_trait]
pub trait PortProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "this probe saw nothing", not failure.
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<u16>, EngineError>;
}

/// Outcome of a full detection run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    pub port: u16,
    /// Name of the probe that found it, or "allocated-fallback"
    pub source: &'static str,
    /// False when the cascade stayed inconclusive and the allocated port
    /// was assumed
    pub confirmed: bool,
}

/// The default probe cascade, most authoritative first
pub fn default_probes() -> Vec<Box<dyn PortProbe>> {
    vec![
        Box::new(SocketsByPidProbe),
        Box::new(LsofByPidProbe),
        Box::new(LogPatternProbe::new()),
        Box::new(SupervisorEnvProbe),
    ]
}

/// Run the cascade; retry once after `retry_delay` if every probe comes
/// back empty. An inconclusive run falls back to the allocated port with
/// `confirmed = false` — the supervisor's own "online" is an accepted,
/// weaker success signal.
pub async fn detect_actual_port(
    probes: &[Box<dyn PortProbe>],
    ctx: &ProbeContext<'_>,
    retry_delay: Duration,
) -> Result<DetectedPort, EngineError> {
    for pass in 0..2 {
        for probe in probes {
            match probe.probe(ctx).await {
                Ok(Some(port)) => {
                    info!(
                        "process {} listening on {} (via {})",
                        ctx.process.name,
                        port,
                        probe.name()
                    );
                    return Ok(DetectedPort {
                        port,
                        source: probe.name(),
                        confirmed: true,
                    });
                }
                Ok(None) => {
                    debug!("probe {} found nothing", probe.name());
                }
                Err(e) => {
                    // Probes are independent; one failing moves the
                    // cascade along rather than aborting it
                    debug!("probe {} errored: {}", probe.name(), e);
                }
            }
        }
        if pass == 0 {
            tokio::time::sleep(retry_delay).await;
        }
    }

    Ok(DetectedPort {
        port: ctx.allocated_port,
        source: "allocated-fallback",
        confirmed: false,
    })
}

/// Probe 1: OS socket table filtered by pid (most authoritative)
pub struct SocketsByPidProbe;

#[async_trait]
impl PortProbe for SocketsByPidProbe {
    fn name(&self) -> &'static str {
        "ss-by-pid"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<u16>, EngineError> {
        let Some(pid) = ctx.process.pid else {
            return Ok(None);
        };
        let output = ctx.channel.exec("ss -tlnpH").await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(first_port_for_pid(&output.stdout, pid))
    }
}

/// Probe 2: lsof fallback when ss is unavailable or came back empty
pub struct LsofByPidProbe;

#[async_trait]
impl PortProbe for LsofByPidProbe {
    fn name(&self) -> &'static str {
        "lsof-by-pid"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<u16>, EngineError> {
        let Some(pid) = ctx.process.pid else {
            return Ok(None);
        };
        let output = ctx
            .channel
            .exec(&format!("lsof -iTCP -sTCP:LISTEN -P -n -a -p {}", pid))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        // node  4312 deploy 23u IPv4 ... TCP *:5173 (LISTEN)
        let port = output.stdout.lines().find_map(|line| {
            let addr = line.split_whitespace().nth(8)?;
            addr.rsplit(':').next()?.parse::<u16>().ok()
        });
        Ok(port)
    }
}

/// Probe 3: scan recent process output for "listening on port N" phrases.
///
/// Patterns are ordered most specific first and checked pattern-by-pattern
/// across the whole tail, so priority wins over line order.
pub struct LogPatternProbe {
    patterns: Vec<Regex>,
    lines: u32,
}

impl LogPatternProbe {
    pub fn new() -> Self {
        let sources = [
            // Vite/Next style: "Local:   http://localhost:5173/"
            r"(?i)local:\s+https?://[^\s:]+:(\d{2,5})",
            // "listening on http://0.0.0.0:4000" / "listening on port 4000"
            r"(?i)listening (?:on|at)\s+(?:https?://)?[^\s:]*:?(?:port\s+)?(\d{2,5})",
            // "server running on port 4000"
            r"(?i)running (?:on|at)\s+(?:https?://)?[^\s:]*:?(?:port\s+)?(\d{2,5})",
            // Last resort: any "port 4000"
            r"(?i)port[:\s]+(\d{2,5})",
        ];
        Self {
            patterns: sources
                .iter()
                .map(|p| Regex::new(p).expect("static pattern"))
                .collect(),
            lines: 60,
        }
    }

    /// Pure matching half, unit-testable without a host
    pub fn scan(&self, lines: &[String]) -> Option<u16> {
        for pattern in &self.patterns {
            for line in lines {
                if let Some(captures) = pattern.captures(line) {
                    if let Some(port) = captures.get(1).and_then(|m| m.as_str().parse::<u16>().ok())
                    {
                        return Some(port);
                    }
                }
            }
        }
        None
    }
}

impl Default for LogPatternProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortProbe for LogPatternProbe {
    fn name(&self) -> &'static str {
        "log-pattern"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<u16>, EngineError> {
        let lines = ctx
            .supervisor
            .tail_logs(&ctx.process.name, self.lines)
            .await?;
        Ok(self.scan(&lines))
    }
}

/// Probe 4: PORT recorded in the supervisor's environment snapshot
pub struct SupervisorEnvProbe;

#[async_trait]
impl PortProbe for SupervisorEnvProbe {
    fn name(&self) -> &'static str {
        "supervisor-env"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<u16>, EngineError> {
        Ok(ctx.process.env_port)
    }
}

/// Extract the first listening port attributed to `pid` from
/// headerless `ss -tlnp` output
pub fn first_port_for_pid(text: &str, pid: u32) -> Option<u16> {
    let needle = format!("pid={},", pid);
    text.lines()
        .filter(|line| line.contains(&needle))
        .find_map(|line| {
            let local = line.split_whitespace().nth(3)?;
            local.rsplit(':').next()?.parse::<u16>().ok()
        })
}
