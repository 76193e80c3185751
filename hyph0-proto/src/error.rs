use std::io;

/// The error taxonomy shared by every layer of the transport.
///
/// `IncompleteData` is the only variant that is ever recovered from locally (the codec and
/// framing layers buffer and retry); everything else is fatal to the connection it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Deserialization ran out of bytes. Never surfaced past the codec/framer.
    #[error("incomplete data")]
    IncompleteData,
    #[error("unknown packet id {0}")]
    UnknownPacket(u8),
    #[error("socket closed by peer")]
    SocketClosed,
    #[error("heartbeat flatlined: missed {0} heartbeats")]
    SocketFlatlined(u32),
    #[error("timed out waiting for {0}")]
    TimeoutError(&'static str),
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),
    #[error("kicked by peer: {0}")]
    WereKicked(String),
    #[error("disconnected by peer: {0}")]
    WereDisconnected(String),
    #[error("malformed zero-trust envelope: {0}")]
    Framing(String),
    #[error("cryptographic failure: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
