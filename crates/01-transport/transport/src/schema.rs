//! Fixed-layout message records exchanged between bus processes.
//!
//! Every message on the wire is exactly [`MESSAGE_SIZE`] bytes regardless of
//! which payload variant is active. The layout matches the control plane's
//! native record on 64-bit Linux, little-endian:
//!
//! ```text
//! offset  size  field
//!      0     4  origin        (ModuleId)
//!      4     4  type          (MsgType, selects the payload variant)
//!      8     8  timestamp_ms
//!     16     8  payload_len   (meaningful bytes of the active variant)
//!     24   324  payload union
//!    348     4  trailing pad
//! ```
//!
//! Payload variants, relative to the union start:
//!
//! ```text
//! MqttPublish       topic[64] @0  qos u8 @64  pad @65  data_len u16 @66  data[256] @68
//! MqttSubscription  topic[64] @0  data_len u16 @64  data[256] @66
//! Error             system_errno i32 @0  module_errno i32 @4  message[256] @8
//! ```
//!
//! Encoding zero-fills the whole record first, so unused union bytes are
//! always zero on the wire. Adding a variant larger than the union, or a new
//! discriminant, is a breaking wire change.

use crate::{TransportError, TransportResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of every message record on the wire.
pub const MESSAGE_SIZE: usize = 352;
/// Size of the fixed header preceding the payload union.
pub const MESSAGE_HEADER_SIZE: usize = 24;
/// Size of the payload union (its largest variant).
pub const PAYLOAD_UNION_SIZE: usize = 324;
/// Topic field size, NUL terminator included.
pub const TOPIC_CAPACITY: usize = 64;
/// Data field size of publish commands and subscription events.
pub const DATA_CAPACITY: usize = 256;
/// Message field size of error reports, NUL terminator included.
pub const ERROR_TEXT_CAPACITY: usize = 256;

const PUBLISH_WIRE_LEN: usize = 324;
const SUBSCRIPTION_WIRE_LEN: usize = 322;
const ERROR_WIRE_LEN: usize = 264;

/// Process that sent a message.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleId {
    /// Central controller.
    Core = 0,
    /// Pub/sub bridge.
    Bridge = 1,
    /// Display driver.
    Display = 2,
    /// Hardware input handler.
    HwInput = 3,
}

impl ModuleId {
    /// Maps a wire discriminant back to a module, if it names one.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ModuleId::Core),
            1 => Some(ModuleId::Bridge),
            2 => Some(ModuleId::Display),
            3 => Some(ModuleId::HwInput),
            _ => None,
        }
    }
}

/// Message kind; selects the active payload variant.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Acknowledges a command.
    Ack = 0,
    /// Liveness check; answered with [`MsgType::Pong`].
    Ping = 1,
    /// Reply to [`MsgType::Ping`].
    Pong = 2,
    /// Asks a module to start its work.
    Start = 3,
    /// Asks a module to stop its work.
    Stop = 4,
    RequestData = 5,
    /// Carries an [`MqttPublish`] command.
    MqttPublish = 6,
    Log = 7,
    /// Carries an [`MqttSubscription`] event.
    MqttSubscription = 8,
    /// Carries an [`ErrorReport`].
    Error = 9,
}

impl MsgType {
    /// Maps a wire discriminant back to a type, if it names one.
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => MsgType::Ack,
            1 => MsgType::Ping,
            2 => MsgType::Pong,
            3 => MsgType::Start,
            4 => MsgType::Stop,
            5 => MsgType::RequestData,
            6 => MsgType::MqttPublish,
            7 => MsgType::Log,
            8 => MsgType::MqttSubscription,
            9 => MsgType::Error,
            _ => return None,
        })
    }
}

/// Command asking the bridge to publish `data` on `topic`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttPublish {
    topic: String,
    qos: u8,
    data: Vec<u8>,
}

impl MqttPublish {
    /// Validates field sizes against the wire layout.
    pub fn new(topic: impl Into<String>, qos: u8, data: impl Into<Vec<u8>>) -> TransportResult<Self> {
        let topic = topic.into();
        let data = data.into();
        check_text("topic", &topic, TOPIC_CAPACITY)?;
        check_len("data", data.len(), DATA_CAPACITY)?;
        Ok(Self { topic, qos, data })
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Requested delivery guarantee, passed through to the broker as is.
    pub fn qos(&self) -> u8 {
        self.qos
    }

    /// Payload bytes to publish.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Event carrying a message that arrived on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSubscription {
    topic: String,
    data: Vec<u8>,
}

impl MqttSubscription {
    /// Validates field sizes against the wire layout.
    pub fn new(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> TransportResult<Self> {
        let topic = topic.into();
        let data = data.into();
        check_text("topic", &topic, TOPIC_CAPACITY)?;
        check_len("data", data.len(), DATA_CAPACITY)?;
        Ok(Self { topic, data })
    }

    /// Topic the message arrived on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload as received from the broker.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Failure report. A zero errno means the failure is not of that kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    system_errno: i32,
    module_errno: i32,
    message: String,
}

impl ErrorReport {
    /// Validates the message text against the wire layout.
    pub fn new(system_errno: i32, module_errno: i32, message: impl Into<String>) -> TransportResult<Self> {
        let message = message.into();
        check_text("error message", &message, ERROR_TEXT_CAPACITY)?;
        Ok(Self {
            system_errno,
            module_errno,
            message,
        })
    }

    /// OS error code, or zero.
    pub fn system_errno(&self) -> i32 {
        self.system_errno
    }

    /// Module-specific error code, or zero.
    pub fn module_errno(&self) -> i32 {
        self.module_errno
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Message body: the type tag and its payload variant in one value.
///
/// Variants mirror [`MsgType`] one to one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Ack,
    Ping,
    Pong,
    Start,
    Stop,
    RequestData,
    /// Publish command for the bridge.
    MqttPublish(MqttPublish),
    Log,
    /// Event relayed from a subscribed topic.
    MqttSubscription(MqttSubscription),
    /// Failure report.
    Error(ErrorReport),
}

impl Body {
    /// Wire discriminant for this body.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Body::Ack => MsgType::Ack,
            Body::Ping => MsgType::Ping,
            Body::Pong => MsgType::Pong,
            Body::Start => MsgType::Start,
            Body::Stop => MsgType::Stop,
            Body::RequestData => MsgType::RequestData,
            Body::MqttPublish(_) => MsgType::MqttPublish,
            Body::Log => MsgType::Log,
            Body::MqttSubscription(_) => MsgType::MqttSubscription,
            Body::Error(_) => MsgType::Error,
        }
    }

    /// Size of the active union variant; zero for bodies without payload.
    pub fn wire_len(&self) -> usize {
        match self {
            Body::MqttPublish(_) => PUBLISH_WIRE_LEN,
            Body::MqttSubscription(_) => SUBSCRIPTION_WIRE_LEN,
            Body::Error(_) => ERROR_WIRE_LEN,
            _ => 0,
        }
    }
}

/// Structured message exchanged over a channel.
///
/// The body is only reachable through accessors so that the declared
/// payload length always describes the body it travels with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Sending module.
    pub origin: ModuleId,
    /// Sender-local wall clock in milliseconds.
    pub timestamp_ms: u64,
    body: Body,
    payload_len: u64,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(origin: ModuleId, body: Body) -> Self {
        Self::with_timestamp(origin, now_ms(), body)
    }

    /// Builds a message with an explicit timestamp.
    pub fn with_timestamp(origin: ModuleId, timestamp_ms: u64, body: Body) -> Self {
        let payload_len = body.wire_len() as u64;
        Self {
            origin,
            timestamp_ms,
            body,
            payload_len,
        }
    }

    /// Wire discriminant of the body.
    pub fn msg_type(&self) -> MsgType {
        self.body.msg_type()
    }

    /// Type tag and payload.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the body and recomputes the declared payload length.
    pub fn set_body(&mut self, body: Body) {
        self.payload_len = body.wire_len() as u64;
        self.body = body;
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Declared payload length, as sent on the wire.
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Writes the record into the first [`MESSAGE_SIZE`] bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> TransportResult<()> {
        let actual = out.len();
        let frame: &mut [u8; MESSAGE_SIZE] = out
            .get_mut(..MESSAGE_SIZE)
            .and_then(|head| head.try_into().ok())
            .ok_or(TransportError::FrameLength {
                expected: MESSAGE_SIZE,
                actual,
            })?;
        self.write_frame(frame);
        Ok(())
    }

    /// Encodes the record into a fresh zero-filled frame.
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut frame = [0u8; MESSAGE_SIZE];
        self.write_frame(&mut frame);
        frame
    }

    fn write_frame(&self, frame: &mut [u8; MESSAGE_SIZE]) {
        frame.fill(0);

        frame[0..4].copy_from_slice(&(self.origin as u32).to_le_bytes());
        frame[4..8].copy_from_slice(&(self.msg_type() as u32).to_le_bytes());
        frame[8..16].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        frame[16..24].copy_from_slice(&self.payload_len.to_le_bytes());

        let payload = &mut frame[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + PAYLOAD_UNION_SIZE];
        match &self.body {
            Body::MqttPublish(cmd) => {
                write_bytes(&mut payload[0..TOPIC_CAPACITY], cmd.topic.as_bytes());
                payload[64] = cmd.qos;
                payload[66..68].copy_from_slice(&(cmd.data.len() as u16).to_le_bytes());
                write_bytes(&mut payload[68..68 + DATA_CAPACITY], &cmd.data);
            }
            Body::MqttSubscription(evt) => {
                write_bytes(&mut payload[0..TOPIC_CAPACITY], evt.topic.as_bytes());
                payload[64..66].copy_from_slice(&(evt.data.len() as u16).to_le_bytes());
                write_bytes(&mut payload[66..66 + DATA_CAPACITY], &evt.data);
            }
            Body::Error(report) => {
                payload[0..4].copy_from_slice(&report.system_errno.to_le_bytes());
                payload[4..8].copy_from_slice(&report.module_errno.to_le_bytes());
                write_bytes(&mut payload[8..8 + ERROR_TEXT_CAPACITY], report.message.as_bytes());
            }
            _ => {}
        }
    }

    /// Decodes and validates a complete wire record.
    pub fn decode(frame: &[u8]) -> TransportResult<Self> {
        if frame.len() != MESSAGE_SIZE {
            return Err(TransportError::FrameLength {
                expected: MESSAGE_SIZE,
                actual: frame.len(),
            });
        }

        let raw_origin = read_u32(frame, 0);
        let origin = ModuleId::from_u32(raw_origin).ok_or(TransportError::UnknownOrigin(raw_origin))?;
        let raw_type = read_u32(frame, 4);
        let msg_type = MsgType::from_u32(raw_type).ok_or(TransportError::UnknownType(raw_type))?;
        let timestamp_ms = read_u64(frame, 8);
        let payload_len = read_u64(frame, 16);
        if payload_len > PAYLOAD_UNION_SIZE as u64 {
            return Err(TransportError::FieldOverflow {
                field: "payload_len",
                len: usize::try_from(payload_len).unwrap_or(usize::MAX),
                capacity: PAYLOAD_UNION_SIZE,
            });
        }

        let payload = &frame[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + PAYLOAD_UNION_SIZE];
        let body = match msg_type {
            MsgType::Ack => Body::Ack,
            MsgType::Ping => Body::Ping,
            MsgType::Pong => Body::Pong,
            MsgType::Start => Body::Start,
            MsgType::Stop => Body::Stop,
            MsgType::RequestData => Body::RequestData,
            MsgType::Log => Body::Log,
            MsgType::MqttPublish => {
                let topic = read_text("topic", &payload[0..TOPIC_CAPACITY])?;
                let data_len = read_u16(payload, 66) as usize;
                check_len("data", data_len, DATA_CAPACITY)?;
                Body::MqttPublish(MqttPublish {
                    topic,
                    qos: payload[64],
                    data: payload[68..68 + data_len].to_vec(),
                })
            }
            MsgType::MqttSubscription => {
                let topic = read_text("topic", &payload[0..TOPIC_CAPACITY])?;
                let data_len = read_u16(payload, 64) as usize;
                check_len("data", data_len, DATA_CAPACITY)?;
                Body::MqttSubscription(MqttSubscription {
                    topic,
                    data: payload[66..66 + data_len].to_vec(),
                })
            }
            MsgType::Error => Body::Error(ErrorReport {
                system_errno: read_u32(payload, 0) as i32,
                module_errno: read_u32(payload, 4) as i32,
                message: read_text("error message", &payload[8..8 + ERROR_TEXT_CAPACITY])?,
            }),
        };

        Ok(Self {
            origin,
            timestamp_ms,
            body,
            payload_len,
        })
    }
}

/// Milliseconds since the Unix epoch on the local wall clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn check_len(field: &'static str, len: usize, capacity: usize) -> TransportResult<()> {
    if len > capacity {
        return Err(TransportError::FieldOverflow {
            field,
            len,
            capacity,
        });
    }
    Ok(())
}

// Text fields keep one byte for the NUL terminator and cannot embed NULs.
fn check_text(field: &'static str, text: &str, capacity: usize) -> TransportResult<()> {
    check_len(field, text.len(), capacity - 1)?;
    if text.as_bytes().contains(&0) {
        return Err(TransportError::InvalidText { field });
    }
    Ok(())
}

fn read_text(field: &'static str, bytes: &[u8]) -> TransportResult<String> {
    let len = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(TransportError::FieldOverflow {
            field,
            len: bytes.len(),
            capacity: bytes.len() - 1,
        })?;
    String::from_utf8(bytes[..len].to_vec()).map_err(|_| TransportError::InvalidText { field })
}

fn write_bytes(dst: &mut [u8], src: &[u8]) {
    dst[..src.len()].copy_from_slice(src);
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(raw)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
