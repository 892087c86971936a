use clap::Parser;
use minerd::cli::Cli;
use minerd::config::AppConfig;
use minerd::error::{MinerdError, Result};
use minerd::host::SystemHost;
use minerd::logging::{init_logging, init_logging_simple};
use minerd::supervisor::{Supervisor, SupervisorExit};
use minerd::worker::ProcessBackend;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _log_guard = init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(MinerdError::InvalidConfig(errors.join("; ")));
    }

    let raw = config.launch.clone().merge(cli.launch_overrides());
    info!("Launch parameters: {:?}", raw);

    let supervisor = Supervisor::new(
        config.supervisor.clone(),
        raw,
        Arc::new(SystemHost),
        Arc::new(ProcessBackend::new(config.worker.clone())),
    );

    match supervisor.run(shutdown_signal()).await {
        SupervisorExit::Shutdown => info!("Supervisor stopped"),
        SupervisorExit::Terminated(reason) => info!("Supervisor stopped after termination: {}", reason),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
