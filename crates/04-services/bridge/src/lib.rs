//! Bus module bridging Structured Messages to an external pub/sub network.
//!
//! The network client stays behind [`PubSubClient`]; its callbacks feed the
//! bridge through a bounded [`inbox`] that the control loop drains on every
//! tick.

mod client;
mod error;
mod service;

pub use client::{inbox, BridgeStatus, ClientError, Notification, NotificationSender, PubSubClient};
pub use error::{BridgeError, BridgeResult};
pub use service::Bridge;
