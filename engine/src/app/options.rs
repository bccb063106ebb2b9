//! Application configuration options

use std::time::Duration;

use crate::channel::ssh::SshOptions;
use crate::monitor::MonitorOptions;
use crate::orchestrator::OrchestratorOptions;
use crate::ports::PortRange;
use crate::proxy::ProxyOptions;
use crate::settings::Settings;
use crate::workers::monitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// SSH channel configuration
    pub ssh: SshOptions,

    /// Application port range
    pub ports: PortRange,

    /// Reverse-proxy configuration
    pub proxy: ProxyOptions,

    /// Launcher script path on the managed host
    pub launcher_script: String,

    /// Root directory for per-deployment working directories
    pub apps_root: String,

    /// Orchestrator behavior
    pub orchestrator: OrchestratorOptions,

    /// Lifecycle monitor policy
    pub monitor: MonitorOptions,

    /// Enable the lifecycle monitor worker
    pub enable_monitor: bool,

    /// Monitor worker options
    pub monitor_worker: monitor::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            ssh: SshOptions::default(),
            ports: PortRange::default(),
            proxy: ProxyOptions::default(),
            launcher_script: "/opt/wharf/bin/launch-app".to_string(),
            apps_root: "/srv/apps".to_string(),
            orchestrator: OrchestratorOptions::default(),
            monitor: MonitorOptions::default(),
            enable_monitor: true,
            monitor_worker: monitor::Options::default(),
        }
    }
}

impl AppOptions {
    /// Derive options from a settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ssh: SshOptions::from_settings(&settings.host),
            ports: PortRange {
                min: settings.ports.min,
                max: settings.ports.max,
            },
            proxy: ProxyOptions {
                apex_domain: settings.proxy.apex_domain.clone(),
                backend_suffix: settings.proxy.backend_suffix.clone(),
                sites_available: settings.proxy.sites_available.clone(),
                sites_enabled: settings.proxy.sites_enabled.clone(),
                tls: settings.proxy.tls,
                certbot_email: settings.proxy.certbot_email.clone(),
            },
            launcher_script: settings.builder.script_path.clone(),
            apps_root: settings.builder.apps_root.clone(),
            orchestrator: OrchestratorOptions {
                settle_delay: Duration::from_secs(settings.policy.settle_delay_secs),
                verify_attempts: settings.policy.verify_attempts,
                ..Default::default()
            },
            monitor: MonitorOptions {
                grace: chrono::Duration::days(settings.policy.grace_days),
                retained_deployments: settings.policy.retained_deployments,
            },
            enable_monitor: settings.enable_monitor,
            monitor_worker: monitor::Options {
                interval: Duration::from_secs(settings.policy.monitor_interval_secs),
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the engine process
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
