//! Zero-copy (deferred-copy) strategy
// (c) 2024 Ross Younger

use std::io::{self, IoSlice};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{CompletionStats, CompletionTracker, DrainOutcome, StrategySettings, Transfer};
use crate::error::{CapabilityUnavailable, NotificationBackpressure, TransferError};
use crate::os::{SocketOptions as _, is_transient_send_error};
use crate::payload::SyntheticMessage;

/// How long to wait for the error queue between unproductive retries
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(1);

/// Gather `sendmsg` with `MSG_ZEROCOPY`.
///
/// The kernel holds on to the message's pages after each send returns; completions are
/// drained from the error queue every iteration, and once more (with a bounded wait)
/// after the loop.
///
/// If the socket refuses `SO_ZEROCOPY`, the strategy carries on regardless. The kernel
/// then copies as usual and no completions are expected.
///
/// A socket with a write timeout reports an expired send as `EAGAIN`. That is fatal here,
/// exactly as for the copying strategies; only `ENOBUFS` (and `EAGAIN` on a socket without
/// a write timeout) is treated as notification backpressure.
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct DeferredCopy {
    tracker: CompletionTracker,
    max_retries: u32,
    completion_timeout: Duration,
    write_timeout: Option<Duration>,
}

/// Consecutive failures of one send that draining has not relieved
#[derive(Debug, Default)]
struct Stall {
    attempts: u32,
    last: Option<io::Error>,
}

impl Stall {
    /// Records a transient failure and whether the drain that followed reclaimed anything.
    ///
    /// Returns the number of consecutive unproductive identical failures.
    fn record(&mut self, error: io::Error, outcome: DrainOutcome) -> u32 {
        let same = self.last.as_ref().is_some_and(|prev| {
            prev.kind() == error.kind() && prev.raw_os_error() == error.raw_os_error()
        });
        self.attempts = match outcome {
            DrainOutcome::Reclaimed(_) => 0,
            DrainOutcome::Nothing if same => self.attempts + 1,
            DrainOutcome::Nothing => 1,
        };
        self.last = Some(error);
        self.attempts
    }
}

impl DeferredCopy {
    /// Constructor
    #[must_use]
    pub fn new(settings: &StrategySettings) -> Self {
        Self {
            tracker: CompletionTracker::new(false),
            max_retries: settings.max_backpressure_retries,
            completion_timeout: settings.completion_timeout,
            write_timeout: None,
        }
    }

    /// Is this send failure worth a drain and a retry?
    fn is_backpressure(&self, e: &io::Error) -> bool {
        let timed_out =
            self.write_timeout.is_some() && e.kind() == io::ErrorKind::WouldBlock;
        is_transient_send_error(e) && !timed_out
    }

    /// Sends one message through `send`, which stands in for a single `MSG_ZEROCOPY`
    /// `sendmsg` on `socket`.
    fn send_with<S>(
        &mut self,
        socket: &TcpStream,
        message: &SyntheticMessage,
        sent: &mut u64,
        mut send: S,
    ) -> Result<(), TransferError>
    where
        S: FnMut(&[IoSlice<'_>]) -> io::Result<usize>,
    {
        let mut slices = message.gather().slices();
        let mut iov = &mut slices[..];
        IoSlice::advance_slices(&mut iov, 0);
        let mut stall = Stall::default();
        while !iov.is_empty() {
            match send(&*iov) {
                Ok(0) => return Err(TransferError::Closed),
                Ok(n) => {
                    self.tracker.record_send();
                    *sent += n as u64;
                    IoSlice::advance_slices(&mut iov, n);
                    stall = Stall::default();
                }
                Err(e) if self.is_backpressure(&e) => {
                    self.relieve(socket, NotificationBackpressure { source: e }, &mut stall)?;
                }
                Err(e) => return Err(TransferError::Send(e)),
            }
        }
        let _ = self.tracker.drain(socket).map_err(TransferError::Drain)?;
        Ok(())
    }

    /// Deals with a send the kernel transiently refused: drain, maybe wait, then let the
    /// caller retry the same send.
    fn relieve(
        &mut self,
        socket: &TcpStream,
        pressure: NotificationBackpressure,
        stall: &mut Stall,
    ) -> Result<(), TransferError> {
        trace!("{pressure}: {}", pressure.source);
        let outcome = self.tracker.drain(socket).map_err(TransferError::Drain)?;
        let attempts = stall.record(pressure.source, outcome);
        if attempts > self.max_retries {
            let source = stall
                .last
                .take()
                .unwrap_or_else(|| io::Error::from(io::ErrorKind::WouldBlock));
            return Err(TransferError::BackpressureExhausted { attempts, source });
        }
        if outcome == DrainOutcome::Nothing {
            let _ = socket
                .wait_error_queue(BACKPRESSURE_WAIT)
                .map_err(TransferError::Drain)?;
        }
        Ok(())
    }
}

impl Transfer for DeferredCopy {
    fn begin(&mut self, socket: &TcpStream) {
        self.write_timeout = socket.write_timeout().unwrap_or_default();
        match socket.enable_zerocopy() {
            Ok(()) => {
                debug!("zero-copy sends enabled");
                self.tracker = CompletionTracker::new(true);
            }
            Err(source) => {
                let e = CapabilityUnavailable { source };
                warn!("{e}: {}", e.source);
            }
        }
    }

    fn send_message(
        &mut self,
        socket: &TcpStream,
        message: &SyntheticMessage,
        sent: &mut u64,
    ) -> Result<(), TransferError> {
        self.send_with(socket, message, sent, |iov| socket.send_zerocopy(iov))
    }

    fn finish(&mut self, socket: &TcpStream) -> Option<CompletionStats> {
        match self.tracker.finish(socket, self.completion_timeout) {
            Ok(0) => (),
            Ok(n) => warn!(
                "{n} zero-copy sends still outstanding after {:?}",
                self.completion_timeout
            ),
            Err(e) => warn!("failed to collect zero-copy completions: {e}"),
        }
        let stats = self.tracker.stats();
        debug!(
            "zero-copy completions: {} issued, {} completed, {} copied by the kernel",
            stats.issued, stats.completed, stats.copied
        );
        Some(stats)
    }

    fn buffers_in_flight(&self) -> u64 {
        self.tracker.outstanding()
    }
}
