//! Handle for observing and stopping a running Coordinator

use eyre::Result;
use tokio::sync::{mpsc, watch};

use crate::barrier::BarrierState;

use super::messages::CoordRequest;

/// Cloneable handle onto the Coordinator's barrier task
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    state_rx: watch::Receiver<BarrierState>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>, state_rx: watch::Receiver<BarrierState>) -> Self {
        Self { tx, state_rx }
    }

    /// Latest observed barrier state
    pub fn state(&self) -> BarrierState {
        *self.state_rx.borrow()
    }

    /// Wait until the barrier reaches `Done` or `Failed`
    pub async fn wait_terminal(&mut self) -> BarrierState {
        loop {
            let state = *self.state_rx.borrow_and_update();
            if matches!(state, BarrierState::Done | BarrierState::Failed) {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                return *self.state_rx.borrow();
            }
        }
    }

    /// Request shutdown; a non-terminal barrier transitions to failed
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| eyre::eyre!("Coordinator channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_reflects_latest_value() {
        let (tx, _rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(BarrierState::Waiting);
        let handle = CoordinatorHandle::new(tx, state_rx);

        assert_eq!(handle.state(), BarrierState::Waiting);
        state_tx.send_replace(BarrierState::Launching);
        assert_eq!(handle.state(), BarrierState::Launching);
    }

    #[tokio::test]
    async fn test_wait_terminal_sees_done() {
        let (tx, _rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(BarrierState::Waiting);
        let mut handle = CoordinatorHandle::new(tx, state_rx);

        tokio::spawn(async move {
            state_tx.send_replace(BarrierState::Launching);
            state_tx.send_replace(BarrierState::Done);
        });

        assert_eq!(handle.wait_terminal().await, BarrierState::Done);
    }

    #[tokio::test]
    async fn test_shutdown_sends_request() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(BarrierState::Waiting);
        let handle = CoordinatorHandle::new(tx, state_rx);

        handle.shutdown().await.unwrap();
        assert_eq!(rx.recv().await, Some(CoordRequest::Shutdown));
    }

    #[tokio::test]
    async fn test_shutdown_on_closed_channel_errors() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let (_state_tx, state_rx) = watch::channel(BarrierState::Waiting);
        let handle = CoordinatorHandle::new(tx, state_rx);

        assert!(handle.shutdown().await.is_err());
    }
}
