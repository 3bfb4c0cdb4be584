//! Per-participant session record
//!
//! A Session is owned exclusively by the coordinator's barrier task and is
//! keyed by the participant's configured identity, never by the transient
//! socket that delivered its ready signal.

use std::net::SocketAddr;

use tracing::debug;

/// Readiness record for one configured participant
#[derive(Debug)]
pub struct Session {
    identity: SocketAddr,
    ready: bool,
}

impl Session {
    pub fn new(identity: SocketAddr) -> Self {
        Self {
            identity,
            ready: false,
        }
    }

    /// The configured address:port this participant listens on for release
    pub fn identity(&self) -> SocketAddr {
        self.identity
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Set the readiness flag; returns false if it was already set
    pub fn mark_ready(&mut self) -> bool {
        if self.ready {
            debug!(identity = %self.identity, "Session::mark_ready: already ready");
            return false;
        }
        self.ready = true;
        true
    }
}
