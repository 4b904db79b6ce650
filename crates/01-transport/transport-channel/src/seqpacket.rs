//! Connection-oriented local socket channel (`SOCK_SEQPACKET`).
//!
//! The socket preserves message boundaries: one send is one receive, so every
//! [`Message`] travels as a single fixed-size frame. Receives never block;
//! "nothing queued" and "peer closed" are told apart by the error code of
//! the receive call rather than by its length.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rustix::fd::OwnedFd;
use rustix::io::Errno;
use rustix::net::{self, AddressFamily, RecvFlags, SendFlags, SocketAddrUnix, SocketFlags, SocketType};

use transport::{Message, TransportError, MESSAGE_SIZE};

use crate::error::{ChannelError, ChannelResult};
use crate::MessageChannel;

const LISTEN_BACKLOG: i32 = 5;
const PAIR_PATH: &str = "<socketpair>";

/// Connect retry budget used while waiting for a server to come up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connect attempts before giving up; at least one is always made.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_millis(100),
        }
    }
}

/// One end of a connected local socket.
#[derive(Debug)]
pub struct SeqPacketChannel {
    fd: Option<OwnedFd>,
    path: PathBuf,
}

impl SeqPacketChannel {
    /// Connects to the server listening at `path`, retrying per `retry`.
    ///
    /// The client descriptor is closed again when every attempt fails.
    pub fn connect(path: impl AsRef<Path>, retry: RetryPolicy) -> ChannelResult<Self> {
        let path = path.as_ref().to_path_buf();
        let socket_err = |source: io::Error| ChannelError::Socket {
            path: path.clone(),
            source,
        };

        let fd = seqpacket_socket().map_err(|err| {
            log::error!("failed to create client socket: {err}");
            socket_err(err.into())
        })?;
        let addr = SocketAddrUnix::new(&path).map_err(|err| socket_err(err.into()))?;

        log::info!("waiting for server at {}", path.display());
        let attempts = retry.attempts.max(1);
        let mut last_err = Errno::NOENT;
        for attempt in 1..=attempts {
            match net::connect_unix(&fd, &addr) {
                Ok(()) => {
                    log::info!("connected to {} after {attempt} attempt(s)", path.display());
                    return Ok(Self {
                        fd: Some(fd),
                        path,
                    });
                }
                Err(err) => {
                    last_err = err;
                    if attempt < attempts {
                        thread::sleep(retry.delay);
                    }
                }
            }
        }

        log::error!(
            "failed to connect to {} after {attempts} attempts: {last_err}",
            path.display()
        );
        drop(fd);
        Err(ChannelError::ConnectExhausted {
            path,
            attempts,
            source: last_err.into(),
        })
    }

    /// Creates two connected ends without touching the filesystem.
    pub fn pair() -> ChannelResult<(Self, Self)> {
        let (a, b) = net::socketpair(
            AddressFamily::UNIX,
            SocketType::SEQPACKET,
            SocketFlags::CLOEXEC,
            None,
        )
        .map_err(|err| ChannelError::Socket {
            path: PathBuf::from(PAIR_PATH),
            source: err.into(),
        })?;
        Ok((Self::from_fd(a, PAIR_PATH), Self::from_fd(b, PAIR_PATH)))
    }

    fn from_fd(fd: OwnedFd, path: impl Into<PathBuf>) -> Self {
        Self {
            fd: Some(fd),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Encodes `message` and sends it as one frame.
    pub fn send(&mut self, message: &Message) -> ChannelResult<usize> {
        let frame = message.encode();
        let sent = self.send_frame(&frame)?;
        log::debug!(
            "sent {:?} from {:?} on {}",
            message.msg_type(),
            message.origin,
            self.path.display()
        );
        Ok(sent)
    }

    /// Sends already encoded bytes as one frame.
    ///
    /// A vanished peer is reported as [`ChannelError::ConnectionLost`]; other
    /// failures as [`ChannelError::Send`].
    pub fn send_frame(&mut self, frame: &[u8]) -> ChannelResult<usize> {
        let fd = self.fd.as_ref().ok_or(ChannelError::Closed)?;
        net::send(fd, frame, SendFlags::NOSIGNAL).map_err(|err| {
            if err == Errno::PIPE || err == Errno::CONNRESET {
                log::error!("connection on {} lost while sending: {err}", self.path.display());
                ChannelError::ConnectionLost(err.into())
            } else {
                log::error!("failed to send on {}: {err}", self.path.display());
                ChannelError::Send(err.into())
            }
        })
    }

    /// Receives one message without blocking.
    ///
    /// Returns `Ok(None)` when nothing is queued. A zero-length receive means
    /// the peer shut down and yields [`ChannelError::PeerClosed`]. A frame of
    /// any other size than [`MESSAGE_SIZE`] is consumed and reported as a
    /// codec error; the channel stays open.
    pub fn receive(&mut self) -> ChannelResult<Option<Message>> {
        let fd = self.fd.as_ref().ok_or(ChannelError::Closed)?;
        let mut frame = [0u8; MESSAGE_SIZE];
        // TRUNC makes the kernel report the full datagram length.
        let received = match net::recv(fd, &mut frame, RecvFlags::DONTWAIT | RecvFlags::TRUNC) {
            Ok(0) => {
                log::error!("peer on {} closed the connection", self.path.display());
                return Err(ChannelError::PeerClosed);
            }
            Ok(received) => received,
            Err(err) if err == Errno::AGAIN || err == Errno::WOULDBLOCK => return Ok(None),
            Err(err) if err == Errno::CONNRESET => {
                log::error!("connection on {} reset: {err}", self.path.display());
                return Err(ChannelError::ConnectionLost(err.into()));
            }
            Err(err) => {
                log::error!("failed to receive on {}: {err}", self.path.display());
                return Err(ChannelError::Receive(err.into()));
            }
        };

        if received != MESSAGE_SIZE {
            log::warn!(
                "dropping {received}-byte frame on {}, expected {MESSAGE_SIZE}",
                self.path.display()
            );
            return Err(TransportError::FrameLength {
                expected: MESSAGE_SIZE,
                actual: received,
            }
            .into());
        }
        let message = Message::decode(&frame)?;
        log::debug!(
            "received {:?} from {:?} on {}",
            message.msg_type(),
            message.origin,
            self.path.display()
        );
        Ok(Some(message))
    }

    /// Closes the descriptor; fails if it was already closed.
    pub fn disconnect(&mut self) -> ChannelResult<()> {
        match self.fd.take() {
            Some(fd) => {
                drop(fd);
                log::info!("socket channel {} closed", self.path.display());
                Ok(())
            }
            None => {
                log::error!("socket channel {} is already closed", self.path.display());
                Err(ChannelError::Closed)
            }
        }
    }
}

impl MessageChannel for SeqPacketChannel {
    fn send_frame(&mut self, frame: &[u8]) -> ChannelResult<usize> {
        SeqPacketChannel::send_frame(self, frame)
    }

    fn try_recv(&mut self) -> ChannelResult<Option<Message>> {
        self.receive()
    }

    fn send(&mut self, message: &Message) -> ChannelResult<usize> {
        SeqPacketChannel::send(self, message)
    }
}

/// Server side: a bound, listening socket handing out connected channels.
///
/// The socket file is removed again when the listener is dropped.
#[derive(Debug)]
pub struct SeqPacketListener {
    fd: OwnedFd,
    path: PathBuf,
}

impl SeqPacketListener {
    /// Binds and listens at `path`, replacing a stale socket file.
    pub fn bind(path: impl AsRef<Path>) -> ChannelResult<Self> {
        let path = path.as_ref().to_path_buf();
        let socket_err = |source: io::Error| ChannelError::Socket {
            path: path.clone(),
            source,
        };

        remove_socket_file(&path);
        let fd = seqpacket_socket().map_err(|err| socket_err(err.into()))?;
        let addr = SocketAddrUnix::new(&path).map_err(|err| socket_err(err.into()))?;
        net::bind_unix(&fd, &addr).map_err(|err| {
            log::error!("failed to bind {}: {err}", path.display());
            socket_err(err.into())
        })?;
        net::listen(&fd, LISTEN_BACKLOG).map_err(|err| {
            log::error!("failed to listen on {}: {err}", path.display());
            socket_err(err.into())
        })?;

        log::info!("listening on {}", path.display());
        Ok(Self { fd, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> ChannelResult<SeqPacketChannel> {
        let fd = net::accept_with(&self.fd, SocketFlags::CLOEXEC).map_err(|err| {
            log::error!("failed to accept on {}: {err}", self.path.display());
            ChannelError::Socket {
                path: self.path.clone(),
                source: err.into(),
            }
        })?;
        log::info!("client connected on {}", self.path.display());
        Ok(SeqPacketChannel::from_fd(fd, self.path.clone()))
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        remove_socket_file(&self.path);
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed socket file {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove socket file {}: {err}", path.display()),
    }
}

fn seqpacket_socket() -> rustix::io::Result<OwnedFd> {
    net::socket_with(
        AddressFamily::UNIX,
        SocketType::SEQPACKET,
        SocketFlags::CLOEXEC,
        None,
    )
}
