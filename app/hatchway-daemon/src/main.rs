use anyhow::{Context, Result};
use clap::Parser;
use hatchway_core::config::LoggingConfig;
use hatchway_core::{Config, LocalRuntime};
use hatchway_docker::{AppState, DockerApiServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hatchway-daemon")]
#[command(author, version, about, long_about = None)]
pub struct DaemonArgs {
    /// Configuration file (default: ~/.config/hatchway/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Unix socket path for Docker API (default: ~/.hatchway/docker.sock).
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Data directory for hatchway.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(data_dir) = &args.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    if let Some(socket) = &args.socket {
        config.docker.socket_path.clone_from(socket);
    } else if args.data_dir.is_some() {
        config.docker.socket_path = config.data_dir.join("docker.sock");
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }

    init_logging(&config.logging);
    run(config).await
}

fn init_logging(logging: &LoggingConfig) {
    let level = &logging.level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hatchway_core={level},hatchway_docker={level},hatchway_daemon={level}").into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting hatchway daemon...");

    let data_dir = config.data_dir.clone();
    let pid_file = data_dir.join("daemon.pid");
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))
        .context("Failed to write daemon PID file")?;

    let runtime = LocalRuntime::from_config(&config).context("Failed to create runtime")?;
    for definition in config.containers.iter().filter(|c| c.autostart) {
        match runtime.start(&definition.id).await {
            Ok(()) => info!(container = %definition.id, "container started"),
            Err(e) => warn!(container = %definition.id, "Failed to start container: {}", e),
        }
    }

    info!(
        data_dir = %data_dir.display(),
        containers = config.containers.len(),
        "Runtime initialized"
    );

    let server_config = ServerConfig::from(&config.docker);
    let socket_path = server_config.socket_path.clone();
    let state = AppState::new(Arc::new(runtime.clone()), config.stream.clone());
    let docker_server = DockerApiServer::new(server_config, state);

    let docker_handle = tokio::spawn(async move {
        if let Err(e) = docker_server.run().await {
            tracing::error!("Docker API server error: {}", e);
        }
    });

    println!("hatchway daemon started");
    println!("  Docker API: {}", socket_path.display());
    println!("  Data:       {}", data_dir.display());
    println!();
    println!("Press Ctrl+C to stop.");

    shutdown_signal().await;
    info!("Shutdown signal received");

    info!("Shutting down...");
    docker_handle.abort();

    for id in runtime.container_ids() {
        if let Err(e) = runtime.stop(&id).await {
            warn!(container = %id, "Failed to stop container: {}", e);
        }
    }

    if let Err(e) = std::fs::remove_file(&socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove socket {}: {}", socket_path.display(), e);
        }
    }

    if let Err(e) = std::fs::remove_file(&pid_file) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove PID file {}: {}", pid_file.display(), e);
        }
    }

    info!("hatchway daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
