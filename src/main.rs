//! Lockstep - rendezvous for lockstep startup of distributed peers
//!
//! CLI entry point for the coordinator and participant roles.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info};

use lockstep::cli::{Cli, Command};
use lockstep::config::Config;
use lockstep::coordinator::Coordinator;
use lockstep::launcher::{ProcessLauncher, TaskLauncher};
use lockstep::participant::Participant;

fn setup_logging(role: &str, cli_log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lockstep")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match cli_log_level.map(|s| s.to_uppercase()).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    // One append-mode log per role, surviving restarts
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{role}.log")))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(role, "Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            if !matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                if setup_logging("lockstep", None).is_ok() {
                    error!(
                        "Arguments not valid. Expected: coordinator <task> <port> <p1-ip> <p1-port> <p2-ip> <p2-port> \
                         or participant <task> <port> <coordinator-ip> <coordinator-port>"
                    );
                }
            }
            // Malformed invocations exit cleanly: nothing was started
            std::process::exit(0);
        }
    };

    match cli.command {
        Command::Coordinator {
            task,
            port,
            participant1_ip,
            participant1_port,
            participant2_ip,
            participant2_port,
        } => {
            setup_logging("coordinator", cli.log_level.as_deref()).context("Failed to setup logging")?;
            let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
            let participants = vec![
                SocketAddr::new(participant1_ip, participant1_port),
                SocketAddr::new(participant2_ip, participant2_port),
            ];
            cmd_coordinator(task, port, participants, config).await
        }
        Command::Participant {
            task,
            port,
            coordinator_ip,
            coordinator_port,
        } => {
            setup_logging("participant", cli.log_level.as_deref()).context("Failed to setup logging")?;
            let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
            cmd_participant(task, port, SocketAddr::new(coordinator_ip, coordinator_port), config).await
        }
    }
}

/// Run the coordinator role to barrier completion
async fn cmd_coordinator(task: String, port: u16, participants: Vec<SocketAddr>, config: Config) -> Result<()> {
    info!(%task, port, ?participants, "Starting coordinator");

    let launcher = Arc::new(ProcessLauncher);
    let coordinator = Coordinator::bind(task, port, participants, config.coordinator, launcher)
        .await
        .inspect_err(|e| error!(error = %e, "Coordinator could not start"))?;

    // Ctrl-C fails the barrier instead of leaving peers half-synchronized
    let handle = coordinator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = handle.shutdown().await;
        }
    });

    coordinator
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "Barrier failed"))?;

    info!("Barrier complete; all participants released");
    Ok(())
}

/// Run the participant role until released, then start the local task
async fn cmd_participant(task: String, port: u16, coordinator: SocketAddr, config: Config) -> Result<()> {
    info!(%task, port, %coordinator, "Starting participant");

    let mut participant = Participant::new(port, coordinator, config.participant);
    participant
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "Participant failed"))?;

    // Released: start the local task; a failed spawn is logged but the
    // rendezvous itself already succeeded
    if let Err(e) = ProcessLauncher.launch(&task).await {
        error!(%task, error = %e, "Task could not be executed");
    }

    Ok(())
}
