//! Wharf Engine - Entry Point
//!
//! Hosts the deployment orchestration engine and its subscription
//! lifecycle monitor against one managed host.

use std::collections::HashMap;
use std::env;

use wharf::app::options::AppOptions;
use wharf::app::run::run;
use wharf::channel::ssh::{SshChannel, SshOptions};
use wharf::channel::CommandChannel;
use wharf::logs::{init_logging, LogOptions};
use wharf::settings::Settings;
use wharf::utils::version_info;

use tracing::{error, info};

const DEFAULT_SETTINGS_PATH: &str = "/etc/wharf/settings.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("settings")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SETTINGS_PATH);
    let settings = match Settings::load(settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {} — using defaults",
                settings_path, e
            );
            Settings::default()
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Run connectivity diagnostics and exit
    if cli_args.contains_key("check") {
        run_check(&settings).await;
        return;
    }

    // Run the engine
    let options = AppOptions::from_settings(&settings);
    info!("Running Wharf engine with options: {:?}", options);
    let result = run(version.version, options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the engine: {e}");
    }
}

/// Verify the managed host is reachable and carries the tools the engine
/// drives
async fn run_check(settings: &Settings) {
    let channel = SshChannel::new(SshOptions::from_settings(&settings.host));

    if let Err(e) = channel.connect().await {
        error!("Host unreachable: {}", e);
        return;
    }
    info!("Host {} reachable", settings.host.hostname);

    for (tool, command) in [
        ("pm2", "pm2 --version"),
        ("nginx", "nginx -v"),
        ("certbot", "certbot --version"),
    ] {
        match channel.exec(command).await {
            Ok(output) if output.success() => info!("{} present", tool),
            Ok(output) => error!("{} check failed: {}", tool, output.detail()),
            Err(e) => error!("{} check failed: {}", tool, e),
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
