//! Readiness barrier over the configured participant set
//!
//! The barrier owns one [`Session`] per configured participant, in
//! configuration order. That order is load-bearing: the release phase walks
//! the sessions in the same order the identities were configured.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, warn};

use crate::session::Session;

/// Barrier lifecycle; terminal after `Done` or `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Waiting,
    Launching,
    Releasing,
    Done,
    Failed,
}

/// Outcome of recording one inbound ready signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Counted; more participants still pending
    Counted,
    /// Counted, and the barrier target is now met
    AllReady,
    /// All sessions from this address are already ready
    Duplicate,
    /// Source address matches no configured participant
    Unknown,
}

#[derive(Debug)]
pub struct Barrier {
    sessions: Vec<Session>,
    state: BarrierState,
}

impl Barrier {
    pub fn new(identities: &[SocketAddr]) -> Self {
        Self {
            sessions: identities.iter().map(|&id| Session::new(id)).collect(),
            state: BarrierState::Waiting,
        }
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, BarrierState::Done | BarrierState::Failed)
    }

    /// Number of participants required before launch
    pub fn target(&self) -> usize {
        self.sessions.len()
    }

    pub fn ready_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_ready()).count()
    }

    /// Sessions in configuration order
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Record a ready signal arriving from `source`
    ///
    /// The signal carries no identity of its own, so it is resolved against
    /// the configured list by source IP: the first not-yet-ready session with
    /// a matching IP claims it. The `Waiting -> Launching` transition happens
    /// here, exactly once, when the last required signal lands.
    pub fn record_ready(&mut self, source: IpAddr) -> ReadyOutcome {
        let slot = self
            .sessions
            .iter()
            .position(|s| s.identity().ip() == source && !s.is_ready());

        let Some(slot) = slot else {
            return if self.sessions.iter().any(|s| s.identity().ip() == source) {
                ReadyOutcome::Duplicate
            } else {
                ReadyOutcome::Unknown
            };
        };

        self.sessions[slot].mark_ready();
        debug!(identity = %self.sessions[slot].identity(), ready = self.ready_count(), "Barrier: recorded ready signal");

        if self.state == BarrierState::Waiting && self.ready_count() == self.target() {
            self.state = BarrierState::Launching;
            ReadyOutcome::AllReady
        } else {
            ReadyOutcome::Counted
        }
    }

    /// Advance the barrier; transitions out of a terminal state are ignored
    pub fn set_state(&mut self, next: BarrierState) {
        if self.is_terminal() {
            warn!(state = ?self.state, ?next, "Barrier: ignoring transition out of terminal state");
            return;
        }
        debug!(from = ?self.state, to = ?next, "Barrier: state transition");
        self.state = next;
    }
}
