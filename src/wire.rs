//! Wire protocol for rendezvous signals
//!
//! Every message is a two-byte frame: a tag byte followed by a boolean
//! payload byte. The framing is explicit so independent implementations can
//! speak it without sharing a serialization library.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tag byte for a participant's ready signal
pub const READY_TAG: u8 = 0x01;

/// Tag byte for the coordinator's release signal
pub const RELEASE_TAG: u8 = 0x02;

const PAYLOAD_FALSE: u8 = 0x00;
const PAYLOAD_TRUE: u8 = 0x01;

/// Errors from decoding or reading a frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown message tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Invalid payload byte: {0:#04x}")]
    InvalidPayload(u8),

    #[error("Connection closed mid-frame")]
    Truncated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The two signal kinds carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Participant -> Coordinator: ready to proceed
    Ready,
    /// Coordinator -> Participant: proceed now
    Release,
}

impl Signal {
    fn tag(self) -> u8 {
        match self {
            Signal::Ready => READY_TAG,
            Signal::Release => RELEASE_TAG,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            READY_TAG => Ok(Signal::Ready),
            RELEASE_TAG => Ok(Signal::Release),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// One framed signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub signal: Signal,
    pub value: bool,
}

impl Frame {
    pub fn new(signal: Signal, value: bool) -> Self {
        Self { signal, value }
    }

    /// A `READY` frame with value true
    pub fn ready() -> Self {
        Self::new(Signal::Ready, true)
    }

    /// A `RELEASE` frame with value true
    pub fn release() -> Self {
        Self::new(Signal::Release, true)
    }

    pub fn encode(self) -> [u8; 2] {
        let payload = if self.value { PAYLOAD_TRUE } else { PAYLOAD_FALSE };
        [self.signal.tag(), payload]
    }

    pub fn decode(bytes: [u8; 2]) -> Result<Self, ProtocolError> {
        let signal = Signal::from_tag(bytes[0])?;
        let value = match bytes[1] {
            PAYLOAD_FALSE => false,
            PAYLOAD_TRUE => true,
            other => return Err(ProtocolError::InvalidPayload(other)),
        };
        Ok(Self { signal, value })
    }
}

/// Read one frame from the stream
///
/// Returns `Ok(None)` on a clean close before any byte of a frame; a close
/// between the tag and payload bytes is a [`ProtocolError::Truncated`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    let n = reader.read(&mut tag).await?;
    if n == 0 {
        return Ok(None);
    }

    let mut payload = [0u8; 1];
    if let Err(e) = reader.read_exact(&mut payload).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated),
            _ => Err(ProtocolError::Io(e)),
        };
    }

    Frame::decode([tag[0], payload[0]]).map(Some)
}

/// Write one frame to the stream and flush it
pub async fn write_frame<W>(writer: &mut W, frame: Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await
}
