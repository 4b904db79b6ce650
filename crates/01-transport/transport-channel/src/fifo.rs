//! Named-pipe channel.
//!
//! The pipe is a plain byte stream: message boundaries are not preserved and
//! framing is left to the caller. Reads append a single terminator byte after
//! the data, chosen per deployment through [`Framing`].

use std::path::{Path, PathBuf};

use rustix::fd::OwnedFd;
use rustix::fs::{self, FileType, Mode, OFlags, CWD};
use rustix::io::{self as rio, Errno};
use serde::Deserialize;

use crate::error::{ChannelError, ChannelResult};

const FIFO_MODE: u32 = 0o666;

/// Byte written after the data returned by [`FifoChannel::read_nonblocking`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Terminate reads with `\n`.
    #[default]
    Newline,
    /// Terminate reads with `\0`.
    Nul,
}

impl Framing {
    pub fn terminator(self) -> u8 {
        match self {
            Framing::Newline => b'\n',
            Framing::Nul => 0,
        }
    }
}

/// Non-blocking handle on a named pipe.
#[derive(Debug)]
pub struct FifoChannel {
    fd: Option<OwnedFd>,
    path: PathBuf,
    framing: Framing,
}

impl FifoChannel {
    /// Creates the pipe node if needed and opens it for non-blocking
    /// read/write. An existing node is reused.
    pub fn open(path: impl AsRef<Path>, framing: Framing) -> ChannelResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mode = Mode::from_raw_mode(FIFO_MODE);

        match fs::mknodat(CWD, &path, FileType::Fifo, mode, 0) {
            Ok(()) => {}
            Err(Errno::EXIST) => log::debug!("fifo {} already exists", path.display()),
            Err(err) => {
                log::error!("failed to create fifo at {}: {err}", path.display());
                return Err(ChannelError::CreateFifo {
                    path,
                    source: err.into(),
                });
            }
        }
        // mknod honours the umask; the pipe must stay world read/write.
        if let Err(err) = fs::chmod(&path, mode) {
            log::warn!("could not set permissions on {}: {err}", path.display());
        }

        let flags = OFlags::RDWR | OFlags::NONBLOCK | OFlags::CLOEXEC;
        let fd = fs::open(&path, flags, Mode::empty()).map_err(|err| {
            log::error!("failed to open fifo at {}: {err}", path.display());
            ChannelError::Open {
                path: path.clone(),
                source: err.into(),
            }
        })?;

        log::info!("fifo channel opened at {}", path.display());
        Ok(Self {
            fd: Some(fd),
            path,
            framing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Reads up to `buf.len() - 1` bytes and writes the framing terminator
    /// right after them.
    ///
    /// Returns the number of data bytes, or 0 when nothing is available.
    /// Read failures are logged and also reported as 0 so polling loops
    /// simply retry.
    pub fn read_nonblocking(&mut self, buf: &mut [u8]) -> usize {
        let Some(fd) = &self.fd else {
            log::debug!("read on closed fifo {}", self.path.display());
            return 0;
        };
        let Some(max) = buf.len().checked_sub(1) else {
            return 0;
        };

        match rio::read(fd, &mut buf[..max]) {
            Ok(0) => 0,
            Ok(read) => {
                buf[read] = self.framing.terminator();
                read
            }
            Err(err) if err == Errno::AGAIN || err == Errno::WOULDBLOCK => 0,
            Err(err) => {
                log::error!("failed to read from fifo {}: {err}", self.path.display());
                0
            }
        }
    }

    /// Writes `bytes` without blocking and returns how many were accepted.
    ///
    /// A failed write is reported but leaves the channel open. A full pipe
    /// fails with [`std::io::ErrorKind::WouldBlock`] and is expected traffic.
    pub fn write_nonblocking(&mut self, bytes: &[u8]) -> ChannelResult<usize> {
        let fd = self.fd.as_ref().ok_or(ChannelError::Closed)?;
        rio::write(fd, bytes).map_err(|err| {
            if err == Errno::AGAIN || err == Errno::WOULDBLOCK {
                log::debug!("fifo {} is full", self.path.display());
            } else {
                log::error!("failed to write to fifo {}: {err}", self.path.display());
            }
            ChannelError::Write(err.into())
        })
    }

    /// Releases the descriptor. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.fd.take().is_some() {
            log::info!("fifo channel {} closed", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn open_creates_world_writable_fifo() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.fifo");
        let channel = FifoChannel::open(&path, Framing::Newline).unwrap();
        assert!(channel.is_open());

        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);

        let again = FifoChannel::open(&path, Framing::Newline);
        assert!(again.is_ok(), "existing fifo is reused");
    }

    #[test]
    fn empty_pipe_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = FifoChannel::open(dir.path().join("empty"), Framing::Nul).unwrap();
        let mut buf = [0xAAu8; 16];
        assert_eq!(channel.read_nonblocking(&mut buf), 0);
        assert_eq!(buf, [0xAA; 16], "nothing is written on an empty read");
    }

    #[test]
    fn reads_are_terminated_per_framing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framed");
        let mut writer = FifoChannel::open(&path, Framing::Newline).unwrap();
        let mut reader = FifoChannel::open(&path, Framing::Newline).unwrap();

        assert_eq!(writer.write_nonblocking(b"status").unwrap(), 6);
        let mut buf = [0u8; 32];
        let read = reader.read_nonblocking(&mut buf);
        assert_eq!(read, 6);
        assert_eq!(&buf[..7], b"status\n");

        let mut nul_reader = FifoChannel::open(&path, Framing::Nul).unwrap();
        writer.write_nonblocking(b"ok").unwrap();
        let read = nul_reader.read_nonblocking(&mut buf);
        assert_eq!(&buf[..read + 1], b"ok\0");
    }

    #[test]
    fn reads_leave_room_for_the_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small");
        let mut channel = FifoChannel::open(&path, Framing::Nul).unwrap();
        channel.write_nonblocking(b"abcdef").unwrap();

        let mut buf = [0xFFu8; 4];
        assert_eq!(channel.read_nonblocking(&mut buf), 3);
        assert_eq!(&buf, b"abc\0");
        assert_eq!(channel.read_nonblocking(&mut buf), 3);
        assert_eq!(&buf, b"def\0");
        assert_eq!(channel.read_nonblocking(&mut [0u8; 1]), 0);
    }

    #[test]
    fn full_pipe_rejects_writes_but_stays_open() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let mut channel = FifoChannel::open(dir.path().join("full"), Framing::Newline).unwrap();
        let chunk = [b'x'; 4096];

        let mut accepted = 0;
        let err = loop {
            match channel.write_nonblocking(&chunk) {
                Ok(written) => accepted += written,
                Err(err) => break err,
            }
            assert!(accepted < 64 << 20, "pipe never filled up");
        };
        match err {
            ChannelError::Write(source) => assert_eq!(source.kind(), std::io::ErrorKind::WouldBlock),
            other => panic!("expected would-block write error, got {other:?}"),
        }
        assert!(channel.is_open());

        let mut buf = [0u8; 4097];
        assert_eq!(channel.read_nonblocking(&mut buf), 4096);
        assert_eq!(channel.write_nonblocking(b"again").unwrap(), 5);
    }

    #[test]
    fn creation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bus.fifo");
        let err = FifoChannel::open(&path, Framing::Newline).unwrap_err();
        assert!(matches!(err, ChannelError::CreateFifo { .. }));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = FifoChannel::open(dir.path().join("closing"), Framing::Newline).unwrap();
        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.write_nonblocking(b"late"),
            Err(ChannelError::Closed)
        ));
        assert_eq!(channel.read_nonblocking(&mut [0u8; 8]), 0);
    }
}
