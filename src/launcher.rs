//! External task launcher
//!
//! The launched task is an opaque collaborator: the barrier only needs to
//! know whether the spawn itself succeeded. Nothing waits on the child.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from launching the external task
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Empty launch command")]
    EmptyCommand,

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fire-and-forget launcher for the configured task
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(&self, command: &str) -> Result<(), LaunchError>;
}

/// Launches the task as a detached child process
///
/// The command string is split on whitespace; the first token is the program
/// and the rest are its arguments. The child's stdio is detached and the
/// child is never waited on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl TaskLauncher for ProcessLauncher {
    async fn launch(&self, command: &str) -> Result<(), LaunchError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(LaunchError::EmptyCommand)?;

        debug!(%program, "ProcessLauncher::launch: spawning");
        Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command.to_string(),
                source,
            })?;

        info!(%command, "Launched task");
        Ok(())
    }
}
