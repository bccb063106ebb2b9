//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::builder::ScriptBuilder;
use crate::channel::ssh::SshChannel;
use crate::channel::CommandChannel;
use crate::errors::EngineError;
use crate::journal::Journal;
use crate::monitor::LifecycleMonitor;
use crate::orchestrator::Orchestrator;
use crate::ports::PortAllocator;
use crate::proxy::ProxyProvisioner;
use crate::store::memory::{MemoryDeploymentStore, MemoryGrantStore, MemoryLogStore};
use crate::store::{DeploymentStore, GrantStore};
use crate::supervisor::pm2::Pm2Supervisor;
use crate::supervisor::Supervisor;

/// Main application state
pub struct AppState {
    /// Command channel to the managed host
    pub channel: Arc<dyn CommandChannel>,

    /// Process supervisor adapter
    pub supervisor: Arc<dyn Supervisor>,

    /// Deployment store
    pub deployments: Arc<dyn DeploymentStore>,

    /// Grant store
    pub grants: Arc<dyn GrantStore>,

    /// Deployment journal
    pub journal: Arc<Journal>,

    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Subscription lifecycle monitor
    pub monitor: Arc<LifecycleMonitor>,
}

impl AppState {
    /// Initialize application state with in-memory stores
    pub async fn init(options: &AppOptions) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        let channel: Arc<dyn CommandChannel> = Arc::new(SshChannel::new(options.ssh.clone()));
        let supervisor: Arc<dyn Supervisor> = Arc::new(Pm2Supervisor::new(
            channel.clone(),
            options.apps_root.clone(),
        ));

        let deployments: Arc<dyn DeploymentStore> = Arc::new(MemoryDeploymentStore::new());
        let grants: Arc<dyn GrantStore> = Arc::new(MemoryGrantStore::new());
        let journal = Arc::new(Journal::new(Arc::new(MemoryLogStore::new())));

        let ports = Arc::new(PortAllocator::new(channel.clone(), options.ports.clone()));
        let proxy = Arc::new(ProxyProvisioner::new(
            channel.clone(),
            options.proxy.clone(),
        ));
        let builder = Arc::new(ScriptBuilder::new(
            channel.clone(),
            options.launcher_script.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            channel.clone(),
            supervisor.clone(),
            ports,
            proxy,
            builder,
            deployments.clone(),
            grants.clone(),
            journal.clone(),
            options.orchestrator.clone(),
        ));

        let monitor = Arc::new(LifecycleMonitor::new(
            deployments.clone(),
            grants.clone(),
            supervisor.clone(),
            orchestrator.clone(),
            journal.clone(),
            options.monitor.clone(),
        ));

        Ok(Self {
            channel,
            supervisor,
            deployments,
            grants,
            journal,
            orchestrator,
            monitor,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
