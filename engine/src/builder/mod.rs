//! Opaque build/start RPC
//!
//! The repository-analysis/build/start logic lives outside this engine.
//! `AppBuilder` is the typed invocation boundary; the default
//! implementation drives a templated launcher script on the managed host,
//! so the remote analysis tool is swappable without touching the
//! orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::channel::{shell_quote, CommandChannel};
use crate::errors::EngineError;

/// Request to build and start one role
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub repo_url: String,
    pub port: u16,
    pub domain: String,
    pub process_name: String,
    pub env: HashMap<String, String>,
}

/// Result of a build/start invocation.
///
/// `reported_port` is a hint only, never authoritative: the detection
/// cascade decides what the process actually bound.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Started {
        message: String,
        reported_port: Option<u16>,
    },
    Failed {
        error: String,
    },
}

/// The opaque build/start collaborator
#[async_trait]
pub trait AppBuilder: Send + Sync {
    async fn build_and_start(&self, request: &BuildRequest) -> Result<BuildOutcome, EngineError>;
}

/// Response line the launcher script prints as its last stdout line
#[derive(Debug, Deserialize)]
struct ScriptResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// Launcher-script-backed builder
pub struct ScriptBuilder {
    channel: Arc<dyn CommandChannel>,
    script_path: String,
}

impl ScriptBuilder {
    pub fn new(channel: Arc<dyn CommandChannel>, script_path: impl Into<String>) -> Self {
        Self {
            channel,
            script_path: script_path.into(),
        }
    }

    fn render_command(&self, request: &BuildRequest) -> String {
        let mut command = String::new();
        if !request.env.is_empty() {
            command.push_str("env ");
            // Deterministic order keeps the command reproducible
            let mut keys: Vec<&String> = request.env.keys().collect();
            keys.sort();
            for key in keys {
                command.push_str(&format!(
                    "{}={} ",
                    key,
                    shell_quote(&request.env[key])
                ));
            }
        }
        command.push_str(&format!(
            "{} --repo {} --port {} --domain {} --name {}",
            shell_quote(&self.script_path),
            shell_quote(&request.repo_url),
            request.port,
            shell_quote(&request.domain),
            shell_quote(&request.process_name),
        ));
        command
    }
}

#[async_trait]
impl AppBuilder for ScriptBuilder {
    async fn build_and_start(&self, request: &BuildRequest) -> Result<BuildOutcome, EngineError> {
        // Reject malformed repo URLs before spending a round trip
        Url::parse(&request.repo_url)
            .map_err(|e| EngineError::BuildFailed(format!("invalid repo url: {}", e)))?;

        let command = self.render_command(request);
        debug!("launching {} via {}", request.process_name, self.script_path);
        let output = self.channel.exec(&command).await?;

        // The script reports through a JSON tail line; exit code is the
        // fallback when it could not
        if let Some(line) = output.stdout.lines().rev().find(|l| !l.trim().is_empty()) {
            if let Ok(response) = serde_json::from_str::<ScriptResponse>(line.trim()) {
                return Ok(if response.success {
                    BuildOutcome::Started {
                        message: response.message.unwrap_or_else(|| "started".to_string()),
                        reported_port: response.port,
                    }
                } else {
                    BuildOutcome::Failed {
                        error: response
                            .error
                            .unwrap_or_else(|| "launcher reported failure".to_string()),
                    }
                });
            }
        }

        Ok(if output.success() {
            BuildOutcome::Started {
                message: "started".to_string(),
                reported_port: None,
            }
        } else {
            BuildOutcome::Failed {
                error: output.detail().to_string(),
            }
        })
    }
}
