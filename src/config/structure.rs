//! Configuration structure
// (c) 2024 Ross Younger

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, ensure};
use clap::Args;
use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

use crate::strategy::{Strategy, StrategySettings};
use crate::util::TimeFormat;

/// The set of configurable options supported by copybench.
///
/// Every field may be set in a configuration file, in the environment, or on the command
/// line (see [`ConfigOverrides`]). [More details about the configuration mechanism](crate::config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, FieldNamesAsSlice)]
#[allow(missing_copy_implementations)]
pub struct Configuration {
    /// Address the server listens on, and the client connects to
    pub address: SocketAddr,
    /// Listen backlog
    pub backlog: u32,
    /// Server transfer strategy
    pub strategy: Strategy,
    /// Seconds to wait for a client's handshake (0 waits forever)
    pub handshake_timeout: u64,
    /// Seconds a single send may block (0 blocks indefinitely)
    pub send_timeout: u64,
    /// `SO_SNDBUF` for server sockets, in bytes (0 keeps the system default)
    pub send_buffer: usize,
    /// Largest payload a client may ask for, in bytes
    pub max_payload: u64,
    /// Consecutive unproductive zero-copy retries tolerated before a send is abandoned
    pub max_backpressure_retries: u32,
    /// Milliseconds to wait for outstanding zero-copy completions after a transfer
    pub completion_timeout: u64,
    /// Client receive buffer size, in bytes
    pub sink_buffer: usize,
    /// Format of timestamps in log messages
    pub time_format: TimeFormat,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backlog: 10,
            strategy: Strategy::default(),
            handshake_timeout: 30,
            send_timeout: 0,
            send_buffer: 0,
            max_payload: 1 << 30,
            max_backpressure_retries: 1000,
            completion_timeout: 2000,
            sink_buffer: 256 * 1024,
            time_format: TimeFormat::default(),
        }
    }
}

/// Converts a seconds count where zero means "no timeout"
fn optional_seconds(secs: u64) -> Option<Duration> {
    (secs != 0).then(|| Duration::from_secs(secs))
}

impl Configuration {
    /// Performs additional validation checks on the configuration
    pub fn validate(self) -> Result<Self> {
        ensure!(self.backlog > 0, "backlog must be at least 1");
        ensure!(self.sink_buffer > 0, "sink_buffer must be at least 1 byte");
        Ok(self)
    }

    /// Handshake read timeout, if any
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        optional_seconds(self.handshake_timeout)
    }

    /// Send timeout, if any
    #[must_use]
    pub fn send_timeout(&self) -> Option<Duration> {
        optional_seconds(self.send_timeout)
    }

    /// The strategy tuning parameters
    #[must_use]
    pub fn strategy_settings(&self) -> StrategySettings {
        StrategySettings {
            max_backpressure_retries: self.max_backpressure_retries,
            completion_timeout: Duration::from_millis(self.completion_timeout),
        }
    }
}

/// Command-line overrides for [`Configuration`].
///
/// Options the user did not give are `None` and not serialized, so values from lower
/// priority sources obtain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
#[allow(missing_copy_implementations)]
pub struct ConfigOverrides {
    /// Address to listen on (server) or connect to (client) [default: 127.0.0.1:8080]
    #[arg(short = 'a', long, value_name = "ADDR:PORT", help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,

    /// Listen backlog [default: 10]
    #[arg(long, value_name = "n", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backlog: Option<u32>,

    /// Transfer strategy used by the server [default: two-copy]
    #[arg(short = 'S', long, value_enum, help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    /// Seconds to wait for a client's handshake; 0 waits forever [default: 30]
    #[arg(long, value_name = "sec", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout: Option<u64>,

    /// Seconds a single send may block; 0 blocks indefinitely [default: 0]
    #[arg(long, value_name = "sec", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_timeout: Option<u64>,

    /// Socket send buffer size in bytes; 0 keeps the system default [default: 0]
    #[arg(long, value_name = "bytes", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_buffer: Option<usize>,

    /// Largest payload a client may request [default: 1073741824]
    #[arg(long, value_name = "bytes", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,

    /// Consecutive unproductive zero-copy retries before a send is abandoned [default: 1000]
    #[arg(long, value_name = "n", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backpressure_retries: Option<u32>,

    /// Milliseconds to wait for outstanding zero-copy completions [default: 2000]
    #[arg(long, value_name = "ms", help_heading("Server"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timeout: Option<u64>,

    /// Client receive buffer size [default: 262144]
    #[arg(long, value_name = "bytes", help_heading("Client"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_buffer: Option<usize>,

    /// Format of timestamps in log messages [default: local]
    #[arg(long, value_enum, help_heading("Output"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}
