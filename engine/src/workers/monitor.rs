//! Lifecycle monitor worker
//!
//! Runs one sweep at startup and then on a fixed interval, fully
//! asynchronous relative to user-triggered orchestration.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::monitor::LifecycleMonitor;

/// Monitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the monitor worker
pub async fn run<S, F>(
    options: &Options,
    monitor: &LifecycleMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Lifecycle monitor worker starting...");

    // Startup sweep, before the first interval elapses
    monitor.sweep().await;

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Lifecycle monitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with sweep
            }
        }

        debug!("Running lifecycle sweep...");
        monitor.sweep().await;
    }
}
