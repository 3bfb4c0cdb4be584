//! CLI command definitions and subcommands

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Lockstep - rendezvous coordinator for distributed two-party startup
#[derive(Parser)]
#[command(
    name = "lockstep",
    about = "Holds two networked peers at a barrier and releases them together",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Role to run
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands, one per role
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Wait for both participants, launch the task, then release them
    Coordinator {
        /// Program to start once both participants are ready
        task: String,

        /// Port to accept ready signals on
        port: u16,

        /// First participant's IP
        participant1_ip: IpAddr,

        /// First participant's release port
        participant1_port: u16,

        /// Second participant's IP
        participant2_ip: IpAddr,

        /// Second participant's release port
        participant2_port: u16,
    },

    /// Report readiness to the coordinator and wait for the release signal
    Participant {
        /// Program to start once released
        task: String,

        /// Local port to receive the release signal on
        port: u16,

        /// Coordinator's IP
        coordinator_ip: IpAddr,

        /// Coordinator's port
        coordinator_port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coordinator() {
        let cli = Cli::parse_from([
            "lockstep",
            "coordinator",
            "server --map de_dust2",
            "7000",
            "10.0.0.1",
            "7001",
            "10.0.0.2",
            "7002",
        ]);

        match cli.command {
            Command::Coordinator {
                task,
                port,
                participant1_ip,
                participant1_port,
                participant2_ip,
                participant2_port,
            } => {
                assert_eq!(task, "server --map de_dust2");
                assert_eq!(port, 7000);
                assert_eq!(participant1_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
                assert_eq!(participant1_port, 7001);
                assert_eq!(participant2_ip, "10.0.0.2".parse::<IpAddr>().unwrap());
                assert_eq!(participant2_port, 7002);
            }
            _ => panic!("Expected Coordinator command"),
        }
    }

    #[test]
    fn test_parse_participant() {
        let cli = Cli::parse_from(["lockstep", "participant", "client", "7001", "10.0.0.9", "7000"]);

        match cli.command {
            Command::Participant {
                task,
                port,
                coordinator_ip,
                coordinator_port,
            } => {
                assert_eq!(task, "client");
                assert_eq!(port, 7001);
                assert_eq!(coordinator_ip, "10.0.0.9".parse::<IpAddr>().unwrap());
                assert_eq!(coordinator_port, 7000);
            }
            _ => panic!("Expected Participant command"),
        }
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["lockstep"]).is_err());
    }

    #[test]
    fn test_coordinator_requires_six_positionals() {
        assert!(Cli::try_parse_from(["lockstep", "coordinator", "task", "7000", "10.0.0.1", "7001"]).is_err());
        assert!(Cli::try_parse_from([
            "lockstep",
            "coordinator",
            "task",
            "7000",
            "10.0.0.1",
            "7001",
            "10.0.0.2",
            "7002",
            "extra"
        ])
        .is_err());
    }

    #[test]
    fn test_participant_requires_four_positionals() {
        assert!(Cli::try_parse_from(["lockstep", "participant", "task", "7001", "10.0.0.9"]).is_err());
    }

    #[test]
    fn test_invalid_ip_rejected() {
        assert!(
            Cli::try_parse_from(["lockstep", "participant", "task", "7001", "not-an-ip", "7000"]).is_err()
        );
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(
            Cli::try_parse_from(["lockstep", "participant", "task", "70001", "10.0.0.9", "7000"]).is_err()
        );
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "lockstep",
            "participant",
            "task",
            "7001",
            "10.0.0.9",
            "7000",
            "-c",
            "/path/to/config.yml",
            "--log-level",
            "DEBUG",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("DEBUG"));
    }
}
