//! Bridge module: relays bus messages to the pub/sub network and back.

use crossbeam_channel::{Receiver, TryRecvError};

use runtime_native::{ModuleHandler, ProcessMemory};
use transport::{
    Body, ErrorReport, Message, ModuleId, MqttPublish, MqttSubscription, TransportError,
    ERROR_TEXT_CAPACITY, MESSAGE_SIZE,
};
use transport_channel::{ChannelError, ChannelResult, MessageChannel};

use crate::{BridgeError, BridgeResult, BridgeStatus, Notification, PubSubClient};

/// Notifications drained from the inbox per loop iteration.
const INBOX_BATCH: usize = 8;

/// Bus module relaying between the core and a pub/sub broker.
///
/// Commands from the core are forwarded to `P`; broker notifications queued
/// in the inbox are turned into bus messages on every tick.
pub struct Bridge<'buf, P> {
    client: P,
    status: BridgeStatus,
    memory: ProcessMemory<'buf>,
    inbox: Receiver<Notification>,
    subscriptions: Vec<(String, u8)>,
    next_slab_id: u64,
}

impl<'buf, P: PubSubClient> Bridge<'buf, P> {
    /// `memory` must use a size class of at least [`MESSAGE_SIZE`] bytes.
    pub fn new(client: P, memory: ProcessMemory<'buf>, inbox: Receiver<Notification>) -> Self {
        Self {
            client,
            status: BridgeStatus::Disconnected,
            memory,
            inbox,
            subscriptions: Vec::new(),
            next_slab_id: 0,
        }
    }

    /// Current broker connection state.
    pub fn status(&self) -> BridgeStatus {
        self.status
    }

    /// Broker client, for inspection.
    pub fn client(&self) -> &P {
        &self.client
    }

    /// Region and slab stack used to encode outgoing frames.
    pub fn memory(&self) -> &ProcessMemory<'buf> {
        &self.memory
    }

    /// Connects to the broker and restores every recorded subscription.
    pub fn connect(&mut self) -> BridgeResult<()> {
        self.status = BridgeStatus::AttemptConnect;
        if let Err(err) = self.client.connect() {
            self.status = BridgeStatus::Disconnected;
            log::error!("failed to connect to broker: {err}");
            return Err(err.into());
        }
        self.status = BridgeStatus::Connected;
        log::info!("bridge connected to broker");

        for (topic, qos) in &self.subscriptions {
            self.client.subscribe(topic, *qos)?;
        }
        Ok(())
    }

    /// Subscribes now and again after every reconnect.
    pub fn subscribe(&mut self, topic: &str, qos: u8) -> BridgeResult<()> {
        if self.status != BridgeStatus::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.client.subscribe(topic, qos)?;
        log::info!("subscribed to {topic}");
        if !self.subscriptions.iter().any(|(t, _)| t == topic) {
            self.subscriptions.push((topic.to_owned(), qos));
        }
        Ok(())
    }

    /// Disconnects from the broker if connected.
    pub fn disconnect(&mut self) -> BridgeResult<()> {
        if self.status != BridgeStatus::Connected {
            self.status = BridgeStatus::Disconnected;
            return Ok(());
        }
        self.status = BridgeStatus::Disconnected;
        self.client.disconnect()?;
        log::info!("bridge disconnected from broker");
        Ok(())
    }

    fn publish(&mut self, cmd: &MqttPublish) -> BridgeResult<()> {
        if self.status != BridgeStatus::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.client.publish(cmd.topic(), cmd.qos(), cmd.data())?;
        log::info!("published {} bytes to {}", cmd.data().len(), cmd.topic());
        Ok(())
    }

    fn send(&mut self, channel: &mut dyn MessageChannel, body: Body) -> ChannelResult<()> {
        self.send_message(channel, Message::new(ModuleId::Bridge, body))
    }

    /// Encodes `message` inside a slab from the process stack and sends it.
    fn send_message(
        &mut self,
        channel: &mut dyn MessageChannel,
        message: Message,
    ) -> ChannelResult<()> {
        let id = self.next_slab_id;
        self.next_slab_id = self.next_slab_id.wrapping_add(1);

        let mut slab = self.memory.acquire(id)?;
        let sent = match slab.alloc(self.memory.region_mut(), MESSAGE_SIZE) {
            Some(span) => message
                .encode_into(self.memory.region_mut().bytes_mut(span))
                .map_err(ChannelError::from)
                .and_then(|()| channel.send_frame(self.memory.region().bytes(span))),
            None => Err(ChannelError::Codec(TransportError::RegionExhausted {
                requested: MESSAGE_SIZE,
                remaining: slab.remaining(),
            })),
        };
        self.memory.release(slab);

        sent?;
        log::debug!("sent {:?} to core", message.msg_type());
        Ok(())
    }

    fn report(&mut self, channel: &mut dyn MessageChannel, err: &BridgeError) -> ChannelResult<()> {
        let report = ErrorReport::new(0, err.module_errno(), error_text(&err.to_string()))?;
        self.send(channel, Body::Error(report))
    }

    fn on_notification(
        &mut self,
        channel: &mut dyn MessageChannel,
        notification: Notification,
    ) -> ChannelResult<()> {
        match notification {
            Notification::MessageArrived {
                topic,
                payload,
                timestamp_ms,
            } => match MqttSubscription::new(topic, payload) {
                Ok(event) => {
                    log::debug!("message arrived on {} at {timestamp_ms}", event.topic());
                    let body = Body::MqttSubscription(event);
                    let message = Message::with_timestamp(ModuleId::Bridge, timestamp_ms, body);
                    self.send_message(channel, message)
                }
                Err(err) => {
                    log::warn!("dropping incoming message that does not fit: {err}");
                    Ok(())
                }
            },
            Notification::Delivered { token } => {
                log::trace!("delivery token {token} confirmed");
                Ok(())
            }
            Notification::ConnectionLost { cause } => {
                log::error!("broker connection lost: {cause}");
                self.status = BridgeStatus::Disconnected;
                Ok(())
            }
        }
    }
}

impl<P: PubSubClient> ModuleHandler for Bridge<'_, P> {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn on_message(&mut self, channel: &mut dyn MessageChannel, message: Message) -> ChannelResult<()> {
        match message.into_body() {
            Body::MqttPublish(cmd) => {
                if let Err(err) = self.publish(&cmd) {
                    log::error!("publish to {} failed: {err}", cmd.topic());
                    self.report(channel, &err)?;
                }
                Ok(())
            }
            Body::Ping => self.send(channel, Body::Pong),
            Body::Start => {
                let started = match self.status {
                    BridgeStatus::Connected => Ok(()),
                    _ => self.connect(),
                };
                match started {
                    Ok(()) => self.send(channel, Body::Ack),
                    Err(err) => self.report(channel, &err),
                }
            }
            Body::Stop => match self.disconnect() {
                Ok(()) => self.send(channel, Body::Ack),
                Err(err) => self.report(channel, &err),
            },
            other => {
                log::debug!("bridge ignores {:?}", other.msg_type());
                Ok(())
            }
        }
    }

    fn tick(&mut self, channel: &mut dyn MessageChannel) -> ChannelResult<usize> {
        let mut handled = 0;
        while handled < INBOX_BATCH {
            match self.inbox.try_recv() {
                Ok(notification) => {
                    self.on_notification(channel, notification)?;
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(handled)
    }
}

// Keeps the text within the fixed report field, cutting on a char boundary.
fn error_text(text: &str) -> &str {
    let max = ERROR_TEXT_CAPACITY - 1;
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
