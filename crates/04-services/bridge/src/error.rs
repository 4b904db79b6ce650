use thiserror::Error;

use transport::TransportError;
use transport_channel::ChannelError;

use crate::ClientError;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A broker operation was attempted while disconnected.
    #[error("broker client not connected")]
    NotConnected,

    #[error("broker client: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// Module error code carried in an outgoing error report.
    pub fn module_errno(&self) -> i32 {
        match self {
            BridgeError::NotConnected => -1,
            BridgeError::Client(err) => err.code,
            BridgeError::Channel(_) | BridgeError::Transport(_) => -2,
        }
    }
}
