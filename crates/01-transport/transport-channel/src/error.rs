use std::io;
use std::path::PathBuf;

use thiserror::Error;

use transport::TransportError;

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to create fifo at {}: {source}", path.display())]
    CreateFifo { path: PathBuf, source: io::Error },

    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("socket setup failed for {}: {source}", path.display())]
    Socket { path: PathBuf, source: io::Error },

    #[error("no server at {} after {attempts} attempts: {source}", path.display())]
    ConnectExhausted {
        path: PathBuf,
        attempts: u32,
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(io::Error),

    #[error("connection lost: {0}")]
    ConnectionLost(io::Error),

    #[error("send failed: {0}")]
    Send(io::Error),

    #[error("receive failed: {0}")]
    Receive(io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("channel already closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] TransportError),
}

impl ChannelError {
    /// True for failures after which the channel cannot be used again.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::Codec(_) | ChannelError::Write(_))
    }
}
