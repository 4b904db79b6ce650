//! Seam to the external pub/sub client and its event inbox.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

/// Failure reported by the external client, carrying its return code.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} (rc {code})")]
pub struct ClientError {
    pub code: i32,
    pub message: String,
}

impl ClientError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Opaque pub/sub network client (an MQTT library in production).
///
/// Calls may block until the broker acknowledges them.
pub trait PubSubClient {
    fn connect(&mut self) -> Result<(), ClientError>;
    fn publish(&mut self, topic: &str, qos: u8, payload: &[u8]) -> Result<(), ClientError>;
    fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ClientError>;
    fn disconnect(&mut self) -> Result<(), ClientError>;
}

/// Connection state towards the broker.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BridgeStatus {
    #[default]
    Disconnected = 0,
    Connected = 1,
    AttemptConnect = 2,
}

/// Event raised by the client's callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A message arrived on a subscribed topic.
    MessageArrived {
        topic: String,
        payload: Vec<u8>,
        timestamp_ms: u64,
    },
    /// A publish was confirmed by the broker.
    Delivered { token: i32 },
    /// The broker connection dropped.
    ConnectionLost { cause: String },
}

/// Bounded queue between the client's callback context and the bridge loop.
pub fn inbox(capacity: usize) -> (NotificationSender, Receiver<Notification>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (NotificationSender { tx }, rx)
}

/// Cloneable handle given to the client's callbacks.
#[derive(Clone, Debug)]
pub struct NotificationSender {
    tx: Sender<Notification>,
}

impl NotificationSender {
    /// Queues `notification` without blocking. Returns false if it was dropped.
    pub fn notify(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                log::warn!("bridge inbox full, dropping {dropped:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("bridge inbox closed");
                false
            }
        }
    }

    pub fn message_arrived(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> bool {
        self.notify(Notification::MessageArrived {
            topic: topic.into(),
            payload: payload.into(),
            timestamp_ms: transport::now_ms(),
        })
    }

    pub fn connection_lost(&self, cause: impl Into<String>) -> bool {
        self.notify(Notification::ConnectionLost {
            cause: cause.into(),
        })
    }
}
