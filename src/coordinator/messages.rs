//! Message types for the Coordinator actor

use std::net::IpAddr;

/// Requests funneled into the Coordinator's barrier task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordRequest {
    /// A connection handler decoded a valid ready signal from this address
    ReadySignal { source: IpAddr },

    /// Stop waiting; a non-terminal barrier transitions to failed
    Shutdown,
}
