//! OS-backed channels between modules: a named pipe for raw bytes and a
//! sequenced-packet local socket for [`transport::Message`] frames.

mod channel;
mod error;
mod fifo;
mod seqpacket;

pub use channel::MessageChannel;
pub use error::{ChannelError, ChannelResult};
pub use fifo::{FifoChannel, Framing};
pub use seqpacket::{RetryPolicy, SeqPacketChannel, SeqPacketListener};
