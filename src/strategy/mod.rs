//! Transfer strategies
// (c) 2024 Ross Younger
//!
//! A strategy is the copy discipline one connection uses to push its [`SyntheticMessage`]
//! into the socket, over and over, until the requested duration has elapsed.
//!
//! | Strategy | User-space assembly | Kernel copy | Syscall |
//! |---|---|---|---|
//! | [`TwoCopy`](Strategy::TwoCopy) | yes | yes | `send` |
//! | [`OneCopy`](Strategy::OneCopy) | no | yes | `sendmsg` |
//! | [`ZeroCopy`](Strategy::ZeroCopy) | no | no (deferred) | `sendmsg` + `MSG_ZEROCOPY` |
//!
//! Every strategy sends whole messages: a short send is continued from where it stopped,
//! so the receiver always sees a concatenation of complete payloads up to the point of
//! failure.

use std::fmt::Debug;
use std::io::{self, Write as _};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, de};
use strum::VariantNames as _;
use tracing::trace;

use crate::error::{AllocationError, TransferError};
use crate::payload::SyntheticMessage;
use crate::util::stats::DataRate;

mod completion;
pub use completion::{CompletionStats, CompletionTracker, DrainOutcome};

mod copying;
pub use copying::Copying;

mod scatter;
pub use scatter::ScatterGather;

mod zerocopy;
pub use zerocopy::DeferredCopy;

/// Selects the copy discipline used by the server
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Assemble the segments into a staging buffer, then `send` it
    #[default]
    TwoCopy,
    /// Send the segments directly with one gather `sendmsg`
    OneCopy,
    /// Gather `sendmsg` with `MSG_ZEROCOPY`, draining completions from the error queue
    ZeroCopy,
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let lower = s.to_ascii_lowercase();
        // requires strum::EnumString && strum::VariantNames && #[strum(serialize_all = "kebab-case")]
        std::str::FromStr::from_str(&lower)
            .map_err(|_| de::Error::unknown_variant(&s, Strategy::VARIANTS))
    }
}

/// Tuning knobs that only the deferred-copy strategy cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySettings {
    /// Consecutive unproductive drain-and-retry cycles tolerated for one send
    pub max_backpressure_retries: u32,
    /// How long to wait for outstanding completions after the timed loop
    pub completion_timeout: Duration,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            max_backpressure_retries: 1000,
            completion_timeout: Duration::from_millis(2000),
        }
    }
}

impl Strategy {
    /// Creates the per-connection state for this strategy.
    ///
    /// Anything that needs allocating (the two-copy staging buffer) is allocated here,
    /// once, before the timed loop starts.
    pub fn prepare(
        self,
        payload_len: usize,
        settings: &StrategySettings,
    ) -> Result<Box<dyn Transfer>, AllocationError> {
        Ok(match self {
            Strategy::TwoCopy => Box::new(Copying::new(payload_len)?),
            Strategy::OneCopy => Box::new(ScatterGather),
            Strategy::ZeroCopy => Box::new(DeferredCopy::new(settings)),
        })
    }
}

/// One connection's send discipline
pub trait Transfer: Debug + Send {
    /// Called once on the connected socket before the timed loop
    fn begin(&mut self, _socket: &TcpStream) {}

    /// Sends one complete copy of `message`.
    ///
    /// Every byte the kernel accepts is added to `sent`, including on the way to an error.
    fn send_message(
        &mut self,
        socket: &TcpStream,
        message: &SyntheticMessage,
        sent: &mut u64,
    ) -> Result<(), TransferError>;

    /// Called once after the timed loop, whether or not it failed.
    ///
    /// Strategies that track kernel completions report them here.
    fn finish(&mut self, _socket: &TcpStream) -> Option<CompletionStats> {
        None
    }

    /// Number of sends whose buffers the kernel may still be reading.
    ///
    /// The message must not be released while this is non-zero.
    fn buffers_in_flight(&self) -> u64 {
        0
    }
}

/// Outcome of one timed transfer loop
#[derive(Debug)]
pub struct TransferSummary {
    /// Total bytes the kernel accepted
    pub bytes_sent: u64,
    /// Number of whole messages sent
    pub messages: u64,
    /// Wall-clock time spent in the loop
    pub elapsed: Duration,
    /// The error that ended the loop early, if any
    pub error: Option<anyhow::Error>,
    /// Completion accounting, for strategies that have it
    pub completions: Option<CompletionStats>,
}

impl TransferSummary {
    /// Average send rate over the loop
    #[must_use]
    pub fn rate(&self) -> DataRate {
        DataRate::new(self.bytes_sent, Some(self.elapsed))
    }
}

/// Runs the timed send loop for one connection.
///
/// Sends copies of `message` until `duration` has elapsed (checked before each message)
/// or a send fails. A failure stops the loop immediately and is reported in the summary
/// alongside the bytes sent up to that point.
pub fn run(
    transfer: &mut dyn Transfer,
    socket: &TcpStream,
    message: &SyntheticMessage,
    duration: Duration,
) -> TransferSummary {
    transfer.begin(socket);
    let start = Instant::now();
    let mut bytes_sent = 0u64;
    let mut messages = 0u64;
    let mut error = None;
    if message.total_len() == 0 {
        trace!("empty payload, nothing to send");
    } else {
        while start.elapsed() < duration {
            match transfer.send_message(socket, message, &mut bytes_sent) {
                Ok(()) => messages += 1,
                Err(e) => {
                    error = Some(e.into());
                    break;
                }
            }
        }
    }
    let elapsed = start.elapsed();
    let completions = transfer.finish(socket);
    TransferSummary {
        bytes_sent,
        messages,
        elapsed,
        error,
        completions,
    }
}

/// Writes the whole of `buf` with plain `send`, continuing after short writes.
pub(crate) fn write_fully(
    mut socket: &TcpStream,
    mut buf: &[u8],
    sent: &mut u64,
) -> Result<(), TransferError> {
    while !buf.is_empty() {
        match socket.write(buf) {
            Ok(0) => return Err(TransferError::Closed),
            Ok(n) => {
                *sent += n as u64;
                buf = &buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(TransferError::Send(e)),
        }
    }
    Ok(())
}
