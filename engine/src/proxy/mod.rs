//! Reverse-proxy and TLS provisioning
//!
//! Writes per-subdomain nginx vhosts through the command channel, drives
//! standalone certbot issuance, and enforces validate-before-enable:
//! a config that is written but not linked, or linked but not reloaded,
//! is never left behind.

pub mod vhost;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{shell_quote, CommandChannel};
use crate::errors::EngineError;
use crate::models::deployment::RoleKind;
use crate::utils::sha256_hash;

/// Proxy provisioner options
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Apex domain under which subdomains are published
    pub apex_domain: String,

    /// Suffix appended to the subdomain label for backend roles
    pub backend_suffix: String,

    /// Directory holding available vhost files
    pub sites_available: String,

    /// Directory holding enabled vhost symlinks
    pub sites_enabled: String,

    /// Enable TLS issuance
    pub tls: bool,

    /// Registration email for issuance
    pub certbot_email: Option<String>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            apex_domain: "apps.wharf.sh".to_string(),
            backend_suffix: "-api".to_string(),
            sites_available: "/etc/nginx/sites-available".to_string(),
            sites_enabled: "/etc/nginx/sites-enabled".to_string(),
            tls: true,
            certbot_email: None,
        }
    }
}

/// A provisioned vhost
#[derive(Debug, Clone)]
pub struct ProvisionedVhost {
    pub domain: String,
    pub url: String,
    pub tls: bool,
}

/// Provisions nginx vhosts and certificates for subdomains
pub struct ProxyProvisioner {
    channel: Arc<dyn CommandChannel>,
    options: ProxyOptions,
}

impl ProxyProvisioner {
    pub fn new(channel: Arc<dyn CommandChannel>, options: ProxyOptions) -> Self {
        Self { channel, options }
    }

    /// Fully-qualified domain for a subdomain + role
    pub fn fqdn(&self, subdomain: &str, role: RoleKind) -> String {
        match role {
            RoleKind::Frontend => format!("{}.{}", subdomain, self.options.apex_domain),
            RoleKind::Backend => format!(
                "{}{}.{}",
                subdomain, self.options.backend_suffix, self.options.apex_domain
            ),
        }
    }

    /// Create and enable a vhost routing `fqdn(subdomain, role)` to
    /// `port` on the host
    pub async fn create_subdomain_config(
        &self,
        subdomain: &str,
        port: u16,
        role: RoleKind,
    ) -> Result<ProvisionedVhost, EngineError> {
        let domain = self.fqdn(subdomain, role);

        let tls = if self.options.tls {
            match self.issue_certificate(&domain).await {
                Ok(()) => true,
                Err(e) => {
                    // Fall back to plain HTTP rather than aborting
                    warn!("certificate issuance for {} failed: {}", domain, e);
                    false
                }
            }
        } else {
            false
        };

        let rendered = if tls {
            vhost::render_https(&domain, port)
        } else {
            vhost::render_http(&domain, port)
        };

        let available = format!("{}/{}", self.options.sites_available, domain);
        let enabled = format!("{}/{}", self.options.sites_enabled, domain);

        if self.remote_digest(&available).await? != Some(sha256_hash(rendered.as_bytes())) {
            let written = self.channel.write_file(&available, &rendered).await?;
            if !written.success() {
                return Err(EngineError::ProxyError(format!(
                    "writing vhost {} failed: {}",
                    available,
                    written.detail()
                )));
            }

            // Validate before enabling; never leave an invalid file behind
            let validated = self.channel.exec("nginx -t").await?;
            if !validated.success() {
                let _ = self
                    .channel
                    .exec(&format!("rm -f {}", shell_quote(&available)))
                    .await;
                return Err(EngineError::ProxyError(format!(
                    "vhost for {} failed validation: {}",
                    domain,
                    validated.detail()
                )));
            }
        } else {
            debug!("vhost for {} unchanged, skipping rewrite", domain);
        }

        let linked = self
            .channel
            .exec(&format!(
                "ln -sfn {} {}",
                shell_quote(&available),
                shell_quote(&enabled)
            ))
            .await?;
        if !linked.success() {
            return Err(EngineError::ProxyError(format!(
                "enabling vhost for {} failed: {}",
                domain,
                linked.detail()
            )));
        }

        let reloaded = self.channel.exec("systemctl reload nginx").await?;
        if !reloaded.success() {
            // Linked-but-unreloaded is not an acceptable resting state
            let _ = self
                .channel
                .exec(&format!("rm -f {}", shell_quote(&enabled)))
                .await;
            return Err(EngineError::ProxyError(format!(
                "nginx reload after enabling {} failed: {}",
                domain,
                reloaded.detail()
            )));
        }

        let scheme = if tls { "https" } else { "http" };
        info!("provisioned {}://{} -> 127.0.0.1:{}", scheme, domain, port);
        Ok(ProvisionedVhost {
            url: format!("{}://{}", scheme, domain),
            domain,
            tls,
        })
    }

    /// Remove the vhost (symlink + file), reload, and best-effort revoke
    /// the certificate
    pub async fn delete_subdomain_config(
        &self,
        subdomain: &str,
        role: RoleKind,
    ) -> Result<(), EngineError> {
        let domain = self.fqdn(subdomain, role);
        let available = format!("{}/{}", self.options.sites_available, domain);
        let enabled = format!("{}/{}", self.options.sites_enabled, domain);

        let removed = self
            .channel
            .exec(&format!(
                "rm -f {} {}",
                shell_quote(&enabled),
                shell_quote(&available)
            ))
            .await?;
        if !removed.success() {
            return Err(EngineError::ProxyError(format!(
                "removing vhost for {} failed: {}",
                domain,
                removed.detail()
            )));
        }

        let reloaded = self.channel.exec("systemctl reload nginx").await?;
        if !reloaded.success() {
            return Err(EngineError::ProxyError(format!(
                "nginx reload after removing {} failed: {}",
                domain,
                reloaded.detail()
            )));
        }

        if self.options.tls {
            let revoked = self
                .channel
                .exec(&format!(
                    "certbot revoke --cert-name {} --delete-after-revoke --non-interactive",
                    shell_quote(&domain)
                ))
                .await?;
            if !revoked.success() {
                // Revocation failure is logged only
                warn!(
                    "certificate revocation for {} failed: {}",
                    domain,
                    revoked.detail()
                );
            }
        }

        info!("removed vhost for {}", domain);
        Ok(())
    }

    /// Standalone issuance: certbot needs port 80, so the public proxy is
    /// briefly halted around it. The proxy is restarted even when
    /// issuance fails.
    async fn issue_certificate(&self, domain: &str) -> Result<(), EngineError> {
        let stopped = self.channel.exec("systemctl stop nginx").await?;
        if !stopped.success() {
            return Err(EngineError::ProxyError(format!(
                "stopping nginx for issuance failed: {}",
                stopped.detail()
            )));
        }

        let email = match &self.options.certbot_email {
            Some(email) => format!("-m {}", shell_quote(email)),
            None => "--register-unsafely-without-email".to_string(),
        };
        let issued = self
            .channel
            .exec(&format!(
                "certbot certonly --standalone -d {} --non-interactive --agree-tos {}",
                shell_quote(domain),
                email
            ))
            .await?;

        let restarted = self.channel.exec("systemctl start nginx").await?;
        if !restarted.success() {
            return Err(EngineError::ProxyError(format!(
                "restarting nginx after issuance failed: {}",
                restarted.detail()
            )));
        }

        if !issued.success() {
            return Err(EngineError::ProxyError(format!(
                "certbot issuance for {} failed: {}",
                domain,
                issued.detail()
            )));
        }
        Ok(())
    }

    async fn remote_digest(&self, path: &str) -> Result<Option<String>, EngineError> {
        let output = self
            .channel
            .exec(&format!("sha256sum {}", shell_quote(path)))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output
            .stdout
            .split_whitespace()
            .next()
            .map(|digest| digest.to_string()))
    }
}
