//! Cross-crate tests: a mock core and real modules talking over OS channels.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bridge::{ClientError, PubSubClient};
use parking_lot::Mutex;
use transport::Message;
use transport_channel::SeqPacketChannel;

#[cfg(test)]
mod bridge_e2e;

#[cfg(test)]
mod fifo_e2e;

/// Broker traffic recorded by [`SharedClient`].
#[derive(Debug, Default)]
pub struct BrokerLog {
    pub connected: bool,
    pub published: Vec<(String, Vec<u8>)>,
    pub subscriptions: Vec<String>,
}

/// In-memory pub/sub client whose log stays observable from other threads.
#[derive(Clone, Default)]
pub struct SharedClient {
    log: Arc<Mutex<BrokerLog>>,
}

impl SharedClient {
    pub fn log(&self) -> Arc<Mutex<BrokerLog>> {
        Arc::clone(&self.log)
    }
}

impl PubSubClient for SharedClient {
    fn connect(&mut self) -> Result<(), ClientError> {
        self.log.lock().connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, _qos: u8, payload: &[u8]) -> Result<(), ClientError> {
        self.log
            .lock()
            .published
            .push((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: u8) -> Result<(), ClientError> {
        self.log.lock().subscriptions.push(topic.to_owned());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.log.lock().connected = false;
        Ok(())
    }
}

/// Polls `channel` until a message arrives or `timeout` elapses.
pub fn recv_within(channel: &mut SeqPacketChannel, timeout: Duration) -> Option<Message> {
    let deadline = Instant::now() + timeout;
    loop {
        match channel.receive() {
            Ok(Some(message)) => return Some(message),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            Ok(None) => return None,
            Err(err) => {
                log::error!("mock core receive failed: {err}");
                return None;
            }
        }
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}
