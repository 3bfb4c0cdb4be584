//! Participant role: report readiness, then wait to be released
//!
//! A participant juggles two sockets: an outbound connection that carries its
//! ready signal to the coordinator, and a local listener where the release
//! signal arrives later. The outbound connection closes as soon as the ready
//! signal is written; release travels over a fresh connection the coordinator
//! opens toward the configured identity.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::ParticipantConfig;
use crate::retry::{RetryPolicy, retry};
use crate::wire::{Frame, ProtocolError, Signal, read_frame, write_frame};

/// Participant lifecycle; `Released` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantPhase {
    Init,
    Connecting,
    ReadySent,
    WaitingForRelease,
    Released,
    Failed,
}

/// Fatal participant failures
#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("Failed to bind release port {port} after {attempts} attempts: {source}")]
    Bind {
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deliver ready signal to {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("No release signal received within {0:?}")]
    ReleaseTimeout(Duration),
}

pub struct Participant {
    local_port: u16,
    coordinator: SocketAddr,
    config: ParticipantConfig,
    phase: ParticipantPhase,
    listener: Option<TcpListener>,
}

impl Participant {
    pub fn new(local_port: u16, coordinator: SocketAddr, config: ParticipantConfig) -> Self {
        Self {
            local_port,
            coordinator,
            config,
            phase: ParticipantPhase::Init,
            listener: None,
        }
    }

    pub fn phase(&self) -> ParticipantPhase {
        self.phase
    }

    /// Bind the local release listener, retrying per the configured policy
    ///
    /// Returns the bound address (useful with port 0). `run` binds lazily if
    /// this was not called first.
    pub async fn bind(&mut self) -> Result<SocketAddr, ParticipantError> {
        let policy = RetryPolicy::fixed(self.config.bind_max_retries, self.config.retry_delay());
        let port = self.local_port;

        let listener = retry(policy, "bind release port", || TcpListener::bind(("0.0.0.0", port)))
            .await
            .map_err(|e| {
                self.phase = ParticipantPhase::Failed;
                ParticipantError::Bind {
                    port,
                    attempts: e.attempts,
                    source: e.source,
                }
            })?;

        let addr = listener.local_addr().map_err(|source| ParticipantError::Bind {
            port,
            attempts: 1,
            source,
        })?;
        info!(%addr, "Participant listening for release signal");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Run the full lifecycle: bind, report ready, wait for release
    pub async fn run(&mut self) -> Result<(), ParticipantError> {
        let result = self.lifecycle().await;
        if result.is_err() {
            self.phase = ParticipantPhase::Failed;
        }
        result
    }

    async fn lifecycle(&mut self) -> Result<(), ParticipantError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self.listener.take().expect("listener bound above");

        self.phase = ParticipantPhase::Connecting;
        self.send_ready().await?;
        self.phase = ParticipantPhase::ReadySent;

        debug!("Awaiting release signal");
        self.phase = ParticipantPhase::WaitingForRelease;
        match self.config.release_timeout() {
            Some(limit) => tokio::time::timeout(limit, await_release(&listener))
                .await
                .map_err(|_| ParticipantError::ReleaseTimeout(limit))?,
            None => await_release(&listener).await,
        }

        self.phase = ParticipantPhase::Released;
        info!("Release signal received; proceeding");
        Ok(())
    }

    /// Connect out to the coordinator and deliver the ready signal
    ///
    /// Each attempt uses a fresh connection, closed as soon as the frame is
    /// flushed.
    async fn send_ready(&self) -> Result<(), ParticipantError> {
        let policy = RetryPolicy::fixed(self.config.connect_max_retries, self.config.retry_delay());
        let coordinator = self.coordinator;

        retry(policy, "send ready signal", move || async move {
            let mut stream = TcpStream::connect(coordinator).await?;
            write_frame(&mut stream, Frame::ready()).await?;
            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(|e| ParticipantError::Connect {
            addr: coordinator,
            attempts: e.attempts,
            source: e.source,
        })?;

        info!(%coordinator, "Ready signal delivered");
        Ok(())
    }
}

/// Block until a valid `RELEASE/true` frame arrives on the listener
///
/// Malformed frames are logged and skipped without dropping the connection;
/// a closed connection sends us back to accepting, since the coordinator
/// retries release over a fresh connection.
async fn await_release(listener: &TcpListener) {
    loop {
        let (mut conn, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Accept failed on release port");
                continue;
            }
        };
        debug!(%peer, "Connection on release port");

        loop {
            match read_frame(&mut conn).await {
                Ok(Some(frame)) if frame.signal == Signal::Release && frame.value => {
                    debug!(%peer, "Release signal received");
                    return;
                }
                Ok(Some(frame)) => {
                    warn!(%peer, ?frame, "Unexpected frame while awaiting release; still waiting");
                }
                Ok(None) => {
                    warn!(%peer, "Connection closed without release signal; waiting for reconnect");
                    break;
                }
                Err(ProtocolError::Io(e)) => {
                    warn!(%peer, error = %e, "I/O error on release connection; waiting for reconnect");
                    break;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Protocol violation while awaiting release; still waiting");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn fast_config() -> ParticipantConfig {
        ParticipantConfig {
            bind_max_retries: 1,
            connect_max_retries: 1,
            retry_delay_secs: 0,
            release_timeout_secs: None,
        }
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Bind the participant and return its loopback release address
    async fn bound_participant(coordinator: SocketAddr, config: ParticipantConfig) -> (Participant, SocketAddr) {
        let mut participant = Participant::new(0, coordinator, config);
        let addr = participant.bind().await.unwrap();
        (participant, loopback(addr.port()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let coord_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coord_addr = coord_listener.local_addr().unwrap();
        let (mut participant, release_addr) = bound_participant(coord_addr, fast_config()).await;

        let mock_coordinator = tokio::spawn(async move {
            let (mut conn, _) = coord_listener.accept().await.unwrap();
            let frame = read_frame(&mut conn).await.unwrap();
            assert_eq!(frame, Some(Frame::ready()));

            let mut release = TcpStream::connect(release_addr).await.unwrap();
            write_frame(&mut release, Frame::release()).await.unwrap();
        });

        participant.run().await.unwrap();
        assert_eq!(participant.phase(), ParticipantPhase::Released);
        mock_coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_then_release_on_same_connection() {
        let coord_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coord_addr = coord_listener.local_addr().unwrap();
        let (mut participant, release_addr) = bound_participant(coord_addr, fast_config()).await;

        let mock_coordinator = tokio::spawn(async move {
            let (mut conn, _) = coord_listener.accept().await.unwrap();
            read_frame(&mut conn).await.unwrap();

            let mut release = TcpStream::connect(release_addr).await.unwrap();
            // Garbage frame, then a release-false, then the real release,
            // all on the same connection
            release.write_all(&[0xff, 0x01]).await.unwrap();
            write_frame(&mut release, Frame::new(Signal::Release, false)).await.unwrap();
            write_frame(&mut release, Frame::release()).await.unwrap();
        });

        participant.run().await.unwrap();
        assert_eq!(participant.phase(), ParticipantPhase::Released);
        mock_coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_then_reconnect() {
        let coord_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coord_addr = coord_listener.local_addr().unwrap();
        let (mut participant, release_addr) = bound_participant(coord_addr, fast_config()).await;

        let mock_coordinator = tokio::spawn(async move {
            let (mut conn, _) = coord_listener.accept().await.unwrap();
            read_frame(&mut conn).await.unwrap();

            // First release connection dies without sending anything
            let dead = TcpStream::connect(release_addr).await.unwrap();
            drop(dead);

            let mut release = TcpStream::connect(release_addr).await.unwrap();
            write_frame(&mut release, Frame::release()).await.unwrap();
        });

        participant.run().await.unwrap();
        assert_eq!(participant.phase(), ParticipantPhase::Released);
        mock_coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_exhausts_retries() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut participant = Participant::new(port, loopback(1), fast_config());
        let err = participant.run().await.unwrap_err();

        match err {
            ParticipantError::Bind { port: p, attempts, .. } => {
                assert_eq!(p, port);
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected Bind error, got {other:?}"),
        }
        assert_eq!(participant.phase(), ParticipantPhase::Failed);
    }

    #[tokio::test]
    async fn test_bind_failure_sends_no_ready_signal() {
        let coord_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coord_addr = coord_listener.local_addr().unwrap();

        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut participant = Participant::new(port, coord_addr, fast_config());
        assert!(participant.run().await.is_err());

        // The coordinator must never have seen a connection
        let accepted = tokio::time::timeout(Duration::from_millis(300), coord_listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_connect_exhaustion_is_fatal() {
        // An address nothing listens on
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let mut participant = Participant::new(0, dead, fast_config());
        let err = participant.run().await.unwrap_err();

        match err {
            ParticipantError::Connect { addr, attempts, .. } => {
                assert_eq!(addr, dead);
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected Connect error, got {other:?}"),
        }
        assert_eq!(participant.phase(), ParticipantPhase::Failed);
    }

    #[tokio::test]
    async fn test_release_timeout() {
        let coord_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coord_addr = coord_listener.local_addr().unwrap();

        let config = ParticipantConfig {
            release_timeout_secs: Some(1),
            ..fast_config()
        };
        let mut participant = Participant::new(0, coord_addr, config);

        // Coordinator accepts the ready signal but never releases
        let mock_coordinator = tokio::spawn(async move {
            let (mut conn, _) = coord_listener.accept().await.unwrap();
            read_frame(&mut conn).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = participant.run().await.unwrap_err();
        assert!(matches!(err, ParticipantError::ReleaseTimeout(_)));
        assert_eq!(participant.phase(), ParticipantPhase::Failed);
        mock_coordinator.abort();
    }
}
