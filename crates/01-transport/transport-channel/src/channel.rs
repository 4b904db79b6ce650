use transport::Message;

use crate::error::ChannelResult;

/// A bidirectional, message-framed link to another module.
///
/// Services are written against this trait so they can run over a real
/// socket or an in-process pair alike.
pub trait MessageChannel {
    /// Sends one encoded frame.
    fn send_frame(&mut self, frame: &[u8]) -> ChannelResult<usize>;

    /// Receives one message if one is queued.
    fn try_recv(&mut self) -> ChannelResult<Option<Message>>;

    fn send(&mut self, message: &Message) -> ChannelResult<usize> {
        self.send_frame(&message.encode())
    }
}

impl<C: MessageChannel + ?Sized> MessageChannel for &mut C {
    fn send_frame(&mut self, frame: &[u8]) -> ChannelResult<usize> {
        (**self).send_frame(frame)
    }

    fn try_recv(&mut self) -> ChannelResult<Option<Message>> {
        (**self).try_recv()
    }

    fn send(&mut self, message: &Message) -> ChannelResult<usize> {
        (**self).send(message)
    }
}
