//! Deferred-copy completion accounting
// (c) 2024 Ross Younger
//!
//! Every successful `MSG_ZEROCOPY` send is assigned the next 32-bit sequence number by the
//! kernel. When the kernel has finished with the pages behind one or more sends it posts a
//! notification on the socket's error queue naming an inclusive range of those numbers.
//! The buffers behind a send may only be released or modified once its notification has
//! been seen.

use std::io;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::os::{ExtendedError, SocketOptions as _};

/// Upper bound on a single wait for the error queue while finishing
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No notifications were waiting
    Nothing,
    /// This many sends were retired
    Reclaimed(u64),
}

/// Snapshot of a [`CompletionTracker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    /// Sends registered with the tracker
    pub issued: u64,
    /// Sends retired by completion notifications
    pub completed: u64,
    /// Of those retired, sends the kernel ended up copying anyway
    pub copied: u64,
    /// Error-queue entries that were not deferred-copy completions
    pub unrelated: u64,
}

impl CompletionStats {
    /// Sends still awaiting their completion
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.issued.saturating_sub(self.completed)
    }
}

/// Counts deferred-copy sends in and completions out.
///
/// A tracker created with `enabled == false` (the socket refused `SO_ZEROCOPY`) never
/// counts sends as outstanding, because no notification will ever arrive for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionTracker {
    enabled: bool,
    stats: CompletionStats,
}

impl CompletionTracker {
    /// Constructor
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stats: CompletionStats::default(),
        }
    }

    /// Registers one successful deferred-copy send
    pub fn record_send(&mut self) {
        if self.enabled {
            self.stats.issued += 1;
        }
    }

    /// Sends whose buffers the kernel may still hold
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.stats.outstanding()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CompletionStats {
        self.stats
    }

    /// Interprets one error-queue entry, returning the number of sends it retires
    pub fn accept(&mut self, entry: ExtendedError) -> u64 {
        if !entry.is_zerocopy_completion() {
            trace!("ignoring unrelated error queue entry {entry:?}");
            self.stats.unrelated += 1;
            return 0;
        }
        let count = entry.completed_sends();
        self.stats.completed += count;
        if entry.was_copied() {
            self.stats.copied += count;
        }
        count
    }

    /// Reads every notification currently queued, without blocking.
    ///
    /// An empty queue is the normal steady state and returns [`DrainOutcome::Nothing`]
    /// straight away.
    pub fn drain(&mut self, socket: &TcpStream) -> io::Result<DrainOutcome> {
        let mut reclaimed = 0;
        while socket.read_error_queue(|entry| reclaimed += self.accept(entry))? {}
        Ok(if reclaimed == 0 {
            DrainOutcome::Nothing
        } else {
            trace!("reclaimed {reclaimed} sends");
            DrainOutcome::Reclaimed(reclaimed)
        })
    }

    /// Drains until nothing is outstanding or `timeout` expires.
    ///
    /// Returns the number of sends still outstanding.
    pub fn finish(&mut self, socket: &TcpStream, timeout: Duration) -> io::Result<u64> {
        let deadline = Instant::now() + timeout;
        let _ = self.drain(socket)?;
        while self.outstanding() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = socket.wait_error_queue(remaining.min(FINISH_POLL_INTERVAL))?;
            let _ = self.drain(socket)?;
        }
        Ok(self.outstanding())
    }
}
