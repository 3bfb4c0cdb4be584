//! Coordinator barrier task implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::barrier::{Barrier, BarrierState, ReadyOutcome};
use crate::config::CoordinatorConfig;
use crate::launcher::TaskLauncher;
use crate::retry::{RetryPolicy, retry};
use crate::wire::{Frame, Signal, read_frame, write_frame};

use super::handle::CoordinatorHandle;
use super::messages::CoordRequest;

/// Fatal coordinator failures
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Release to {identity} failed after {attempts} attempts")]
    ReleaseExhausted { identity: SocketAddr, attempts: u32 },

    #[error("Not all participants ready within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Shutdown requested before barrier completion")]
    ShutdownRequested,
}

/// The Coordinator holds both participants at the barrier, launches the
/// task, and releases them after the warm-up interval
pub struct Coordinator {
    task: String,
    participants: Vec<SocketAddr>,
    config: CoordinatorConfig,
    launcher: Arc<dyn TaskLauncher>,
    listener: TcpListener,
    local_addr: SocketAddr,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    state_tx: watch::Sender<BarrierState>,
}

impl Coordinator {
    /// Bind the ready-signal listener
    ///
    /// Binding eagerly (rather than inside [`run`](Self::run)) lets callers
    /// learn the bound address before any participant connects.
    pub async fn bind(
        task: impl Into<String>,
        port: u16,
        participants: Vec<SocketAddr>,
        config: CoordinatorConfig,
        launcher: Arc<dyn TaskLauncher>,
    ) -> Result<Self, CoordinatorError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| CoordinatorError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| CoordinatorError::Bind { port, source })?;
        debug!(%local_addr, "Coordinator: listener bound");

        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let (state_tx, _) = watch::channel(BarrierState::Waiting);

        Ok(Self {
            task: task.into(),
            participants,
            config,
            launcher,
            listener,
            local_addr,
            tx,
            rx,
            state_tx,
        })
    }

    /// Address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Create a handle for state observation and shutdown
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone(), self.state_tx.subscribe())
    }

    /// Run the barrier to completion
    ///
    /// Accepts ready signals until every configured participant has reported,
    /// launches the task, sleeps the warm-up interval, then sends each
    /// participant its release signal in configuration order. Returns once
    /// the barrier is terminal.
    pub async fn run(self) -> Result<(), CoordinatorError> {
        let Coordinator {
            task,
            participants,
            config,
            launcher,
            listener,
            local_addr: _,
            tx,
            mut rx,
            state_tx,
        } = self;

        let mut barrier = Barrier::new(&participants);
        let deadline = config.readiness_timeout().map(|d| Instant::now() + d);

        let accept = tokio::spawn(accept_loop(listener, tx.clone()));

        info!(required = barrier.target(), "Coordinator started; waiting on participants");

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(CoordRequest::ReadySignal { source }) => match barrier.record_ready(source) {
                        ReadyOutcome::Counted => {
                            info!(%source, ready = barrier.ready_count(), required = barrier.target(), "Participant ready");
                        }
                        ReadyOutcome::AllReady => {
                            state_tx.send_replace(barrier.state());
                            info!(ready = barrier.ready_count(), "All participants ready");
                            break;
                        }
                        ReadyOutcome::Duplicate => warn!(%source, "Duplicate ready signal ignored"),
                        ReadyOutcome::Unknown => warn!(%source, "Ready signal from unconfigured address ignored"),
                    },
                    Some(CoordRequest::Shutdown) | None => {
                        error!("Shutdown requested while waiting on participants");
                        barrier.set_state(BarrierState::Failed);
                        state_tx.send_replace(barrier.state());
                        accept.abort();
                        return Err(CoordinatorError::ShutdownRequested);
                    }
                },
                _ = wait_for(deadline) => {
                    let timeout = config.readiness_timeout().expect("deadline is only set when a timeout is configured");
                    error!(?timeout, ready = barrier.ready_count(), "Readiness timeout elapsed; failing barrier");
                    barrier.set_state(BarrierState::Failed);
                    state_tx.send_replace(barrier.state());
                    accept.abort();
                    return Err(CoordinatorError::ReadinessTimeout(timeout));
                }
            }
        }

        accept.abort();

        info!(task = %task, "Launching task");
        if let Err(e) = launcher.launch(&task).await {
            // Peers are still released: a failed launch is not a failed barrier
            error!(task = %task, error = %e, "Task could not be executed");
        }

        info!(warmup_secs = config.warmup_secs, "Waiting warm-up interval before release");
        time::sleep(config.warmup()).await;

        barrier.set_state(BarrierState::Releasing);
        state_tx.send_replace(barrier.state());

        let policy = RetryPolicy::immediate(config.release_max_retries);
        let identities: Vec<SocketAddr> = barrier.sessions().iter().map(|s| s.identity()).collect();
        for identity in identities {
            match retry(policy, "send release signal", move || send_release(identity)).await {
                Ok(()) => info!(%identity, "Participant released"),
                Err(e) => {
                    error!(
                        %identity,
                        attempts = e.attempts,
                        error = %e.source,
                        "Could not send release signal; failing barrier"
                    );
                    barrier.set_state(BarrierState::Failed);
                    state_tx.send_replace(barrier.state());
                    return Err(CoordinatorError::ReleaseExhausted {
                        identity,
                        attempts: e.attempts,
                    });
                }
            }
        }

        barrier.set_state(BarrierState::Done);
        state_tx.send_replace(barrier.state());
        info!("All participants released; barrier complete");
        Ok(())
    }
}

/// Send one release signal over a connection dedicated to this participant
async fn send_release(identity: SocketAddr) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(identity).await?;
    write_frame(&mut stream, Frame::release()).await
}

/// Accept inbound connections, one handler task per connection
async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<CoordRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Coordinator: accepted connection");
                tokio::spawn(handle_connection(stream, peer, tx.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Coordinator: accept failed");
            }
        }
    }
}

/// Read one frame from an inbound connection and forward a valid ready signal
///
/// Anything other than `READY/true` drops this connection only; the peer is
/// free to reconnect and try again.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, tx: mpsc::Sender<CoordRequest>) {
    match read_frame(&mut stream).await {
        Ok(Some(frame)) if frame.signal == Signal::Ready && frame.value => {
            if tx.send(CoordRequest::ReadySignal { source: peer.ip() }).await.is_err() {
                debug!(%peer, "Coordinator: barrier already terminal, dropping ready signal");
            }
        }
        Ok(Some(frame)) => {
            warn!(%peer, ?frame, "Coordinator: unexpected frame, closing connection");
        }
        Ok(None) => {
            debug!(%peer, "Coordinator: connection closed before any frame");
        }
        Err(e) => {
            warn!(%peer, error = %e, "Coordinator: protocol violation, closing connection");
        }
    }
}

/// Sleep until the deadline, or forever when none is configured
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
