//! Cooperative single-threaded control loop.
//!
//! Each iteration checks the shutdown flag, attempts one non-blocking
//! receive, dispatches at most one message, lets the handler do periodic
//! work, then sleeps for the poll interval. Codec and write failures are
//! logged and the loop carries on; any other channel failure ends the loop.

use std::thread;
use std::time::Duration;

use transport::Message;
use transport_channel::{ChannelError, ChannelResult, MessageChannel};

use crate::ShutdownFlag;

/// Module logic driven by a [`ControlLoop`].
pub trait ModuleHandler {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Handles one received message; replies go out through `channel`.
    fn on_message(&mut self, channel: &mut dyn MessageChannel, message: Message) -> ChannelResult<()>;

    /// Periodic work run every iteration. Returns the number of items handled.
    fn tick(&mut self, _channel: &mut dyn MessageChannel) -> ChannelResult<usize> {
        Ok(0)
    }
}

/// Why [`ControlLoop::run`] returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The shutdown flag was triggered.
    Shutdown,
    /// The channel failed in a way it cannot recover from.
    ChannelFailed(ChannelError),
}

/// Counters collected while the loop runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Completed iterations.
    pub iterations: u64,
    /// Messages dispatched to the handler.
    pub messages: u64,
    /// Items reported by [`ModuleHandler::tick`].
    pub tick_work: u64,
    /// Non-fatal failures that were logged and skipped.
    pub recovered_errors: u64,
}

/// Drives a [`ModuleHandler`] over one channel.
pub struct ControlLoop<C> {
    channel: C,
    shutdown: ShutdownFlag,
    poll_interval: Duration,
    stats: LoopStats,
}

impl<C: MessageChannel> ControlLoop<C> {
    /// Creates a loop over `channel` that sleeps `poll_interval` per iteration.
    pub fn new(channel: C, shutdown: ShutdownFlag, poll_interval: Duration) -> Self {
        Self {
            channel,
            shutdown,
            poll_interval,
            stats: LoopStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// The underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Gives the channel back.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Runs one iteration without sleeping. Returns the work done.
    pub fn run_once<H: ModuleHandler>(&mut self, handler: &mut H) -> ChannelResult<usize> {
        self.stats.iterations += 1;
        let mut work = 0;
        if let Some(message) = self.channel.try_recv()? {
            log::trace!("{}: dispatching {:?}", handler.name(), message.msg_type());
            self.stats.messages += 1;
            handler.on_message(&mut self.channel, message)?;
            work += 1;
        }
        let ticked = handler.tick(&mut self.channel)?;
        self.stats.tick_work += ticked as u64;
        Ok(work + ticked)
    }

    /// Runs until shutdown is requested or the channel fails.
    pub fn run<H: ModuleHandler>(&mut self, handler: &mut H) -> LoopExit {
        log::info!("{}: control loop started", handler.name());
        while !self.shutdown.is_triggered() {
            match self.run_once(handler) {
                Ok(_) => {}
                Err(err) if !err.is_fatal() => {
                    self.stats.recovered_errors += 1;
                    log::warn!("{}: {err}", handler.name());
                }
                Err(err) => {
                    log::error!("{}: leaving control loop: {err}", handler.name());
                    return LoopExit::ChannelFailed(err);
                }
            }
            thread::sleep(self.poll_interval);
        }
        log::info!("{}: control loop stopped", handler.name());
        LoopExit::Shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{Body, ModuleId};
    use transport_channel::SeqPacketChannel;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Answers pings and asks for shutdown after `stop_after` messages.
    struct Echo {
        seen: Vec<Message>,
        stop_after: usize,
        shutdown: ShutdownFlag,
    }

    impl ModuleHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn on_message(&mut self, channel: &mut dyn MessageChannel, message: Message) -> ChannelResult<()> {
            if *message.body() == Body::Ping {
                channel.send(&Message::with_timestamp(ModuleId::Display, message.timestamp_ms, Body::Pong))?;
            }
            self.seen.push(message);
            if self.seen.len() >= self.stop_after {
                self.shutdown.trigger();
            }
            Ok(())
        }
    }

    fn echo(stop_after: usize, shutdown: &ShutdownFlag) -> Echo {
        Echo {
            seen: Vec::new(),
            stop_after,
            shutdown: shutdown.clone(),
        }
    }

    #[test]
    fn one_message_per_iteration() {
        init_logs();
        let (mut core, display) = SeqPacketChannel::pair().unwrap();
        let shutdown = ShutdownFlag::new();
        let mut control = ControlLoop::new(display, shutdown.clone(), Duration::ZERO);
        let mut handler = echo(usize::MAX, &shutdown);

        for ts in 0..2 {
            core.send(&Message::with_timestamp(ModuleId::Core, ts, Body::Ping)).unwrap();
        }
        assert_eq!(control.run_once(&mut handler).unwrap(), 1);
        assert_eq!(handler.seen.len(), 1);
        assert_eq!(control.run_once(&mut handler).unwrap(), 1);
        assert_eq!(control.run_once(&mut handler).unwrap(), 0);

        let pong = core.receive().unwrap().unwrap();
        assert_eq!(pong.body(), &Body::Pong);
        assert_eq!(pong.origin, ModuleId::Display);
        assert_eq!(control.stats().messages, 2);
        assert_eq!(control.stats().iterations, 3);
    }

    #[test]
    fn run_stops_on_shutdown() {
        let (mut core, display) = SeqPacketChannel::pair().unwrap();
        let shutdown = ShutdownFlag::new();
        let mut control = ControlLoop::new(display, shutdown.clone(), Duration::from_millis(1));
        let mut handler = echo(3, &shutdown);

        for ts in 0..3 {
            core.send(&Message::with_timestamp(ModuleId::Core, ts, Body::Start)).unwrap();
        }
        assert!(matches!(control.run(&mut handler), LoopExit::Shutdown));
        let stamps: Vec<u64> = handler.seen.iter().map(|m| m.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 1, 2]);
    }

    #[test]
    fn run_skips_malformed_frames_and_exits_on_peer_loss() {
        init_logs();
        let (mut core, display) = SeqPacketChannel::pair().unwrap();
        let shutdown = ShutdownFlag::new();
        let mut control = ControlLoop::new(display, shutdown.clone(), Duration::ZERO);
        let mut handler = echo(usize::MAX, &shutdown);

        let mut bad = Message::with_timestamp(ModuleId::Core, 1, Body::Ack).encode();
        bad[0] = 0xEE;
        core.send_frame(&bad).unwrap();
        core.send(&Message::with_timestamp(ModuleId::Core, 2, Body::Stop)).unwrap();
        drop(core);

        match control.run(&mut handler) {
            LoopExit::ChannelFailed(ChannelError::PeerClosed) => {}
            other => panic!("expected peer loss, got {other:?}"),
        }
        assert_eq!(handler.seen.len(), 1);
        assert_eq!(handler.seen[0].body(), &Body::Stop);
        assert_eq!(control.stats().recovered_errors, 1);
    }

    #[test]
    fn triggered_flag_skips_the_loop() {
        let (_core, display) = SeqPacketChannel::pair().unwrap();
        let shutdown = ShutdownFlag::new();
        shutdown.trigger();
        let mut control = ControlLoop::new(display, shutdown.clone(), Duration::from_secs(60));
        let mut handler = echo(1, &shutdown);
        assert!(matches!(control.run(&mut handler), LoopExit::Shutdown));
        assert_eq!(control.stats().iterations, 0);
    }
}
