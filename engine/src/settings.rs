//! Settings file management

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Managed host connection
    #[serde(default)]
    pub host: HostSettings,

    /// Application port range
    #[serde(default)]
    pub ports: PortRangeSettings,

    /// Reverse-proxy and TLS configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Launcher script configuration
    #[serde(default)]
    pub builder: BuilderSettings,

    /// Lifecycle policy constants
    #[serde(default)]
    pub policy: PolicySettings,

    /// Enable the subscription lifecycle monitor
    #[serde(default = "default_true")]
    pub enable_monitor: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            host: HostSettings::default(),
            ports: PortRangeSettings::default(),
            proxy: ProxySettings::default(),
            builder: BuilderSettings::default(),
            policy: PolicySettings::default(),
            enable_monitor: true,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(path: &str) -> Result<Self, EngineError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }
}

/// Managed host connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Hostname or IP of the managed host
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// SSH user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Path to an SSH identity file. When absent, the default agent/key
    /// resolution of the ssh client applies.
    #[serde(default)]
    pub identity_file: Option<String>,

    /// Optional SSH password, forwarded through sshpass. Key-based
    /// authentication is preferred; this exists for bootstrap hosts.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<Arc<SecretString>>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<Arc<SecretString>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|secret| Arc::new(SecretString::from(secret))))
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_ssh_user() -> String {
    "deploy".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            identity_file: None,
            password: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Application port range settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRangeSettings {
    #[serde(default = "default_port_min")]
    pub min: u16,

    #[serde(default = "default_port_max")]
    pub max: u16,
}

fn default_port_min() -> u16 {
    4000
}

fn default_port_max() -> u16 {
    4999
}

impl Default for PortRangeSettings {
    fn default() -> Self {
        Self {
            min: default_port_min(),
            max: default_port_max(),
        }
    }
}

/// Reverse-proxy and TLS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Apex domain under which subdomains are published
    #[serde(default = "default_apex_domain")]
    pub apex_domain: String,

    /// Suffix appended to the subdomain label for backend roles
    #[serde(default = "default_backend_suffix")]
    pub backend_suffix: String,

    /// Directory holding available vhost files
    #[serde(default = "default_sites_available")]
    pub sites_available: String,

    /// Directory holding enabled vhost symlinks
    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: String,

    /// Enable TLS issuance via certbot
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Registration email for certificate issuance
    #[serde(default)]
    pub certbot_email: Option<String>,
}

fn default_apex_domain() -> String {
    "apps.wharf.sh".to_string()
}

fn default_backend_suffix() -> String {
    "-api".to_string()
}

fn default_sites_available() -> String {
    "/etc/nginx/sites-available".to_string()
}

fn default_sites_enabled() -> String {
    "/etc/nginx/sites-enabled".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            apex_domain: default_apex_domain(),
            backend_suffix: default_backend_suffix(),
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
            tls: true,
            certbot_email: None,
        }
    }
}

/// Launcher script settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSettings {
    /// Path to the launcher script on the managed host
    #[serde(default = "default_launcher_script")]
    pub script_path: String,

    /// Root directory for per-deployment working directories
    #[serde(default = "default_apps_root")]
    pub apps_root: String,
}

fn default_launcher_script() -> String {
    "/opt/wharf/bin/launch-app".to_string()
}

fn default_apps_root() -> String {
    "/srv/apps".to_string()
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            script_path: default_launcher_script(),
            apps_root: default_apps_root(),
        }
    }
}

/// Lifecycle policy constants. These are configuration, not fixed behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Delay between a successful launch and the first supervisor check,
    /// in seconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Attempts for post-detection port verification
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Grace window between suspension and permanent deletion, in days
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,

    /// Deployments an unentitled user keeps running
    #[serde(default = "default_retained_deployments")]
    pub retained_deployments: usize,

    /// Lifecycle monitor sweep interval, in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
}

fn default_settle_delay() -> u64 {
    8
}

fn default_verify_attempts() -> u32 {
    3
}

fn default_grace_days() -> i64 {
    7
}

fn default_retained_deployments() -> usize {
    1
}

fn default_monitor_interval() -> u64 {
    60
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay(),
            verify_attempts: default_verify_attempts(),
            grace_days: default_grace_days(),
            retained_deployments: default_retained_deployments(),
            monitor_interval_secs: default_monitor_interval(),
        }
    }
}
