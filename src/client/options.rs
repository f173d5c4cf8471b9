//! Options specific to client (load generator) mode
// (c) 2024 Ross Younger

use clap::Parser;

#[derive(Debug, Parser, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
/// Client-side options which may be provided on the command line, but are not persistent configuration options.
pub struct Parameters {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=copybench=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Debug"), display_order(0))]
    pub debug: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        action,
        value_name("FILE"),
        help_heading("Output"),
        next_line_help(true),
        display_order(0)
    )]
    pub log_file: Option<String>,

    /// Quiet mode
    ///
    /// Switches off the progress display; reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub quiet: bool,

    /// Check every received byte against the expected payload pattern
    ///
    /// This costs client CPU and may lower the measured throughput.
    #[arg(long, action, help_heading("Client"), display_order(0))]
    pub verify: bool,

    // POSITIONAL ARGUMENTS ================================================================
    /// Payload size in bytes; the server sends back-to-back messages of this size
    #[arg(value_name = "SIZE")]
    pub payload_size: Option<u64>,

    /// Number of concurrent connections
    #[arg(value_name = "CONNECTIONS")]
    pub connections: Option<usize>,

    /// How long the server should send for, in seconds
    #[arg(value_name = "DURATION", allow_negative_numbers(true))]
    pub duration: Option<i32>,
}

/// The three positional arguments, once we know they are all present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Workload {
    pub(crate) payload_size: u64,
    pub(crate) connections: usize,
    pub(crate) duration_seconds: i32,
}

impl TryFrom<&Parameters> for Workload {
    type Error = anyhow::Error;

    fn try_from(args: &Parameters) -> Result<Self, Self::Error> {
        match (args.payload_size, args.connections, args.duration) {
            (Some(payload_size), Some(connections), Some(duration_seconds)) => Ok(Self {
                payload_size,
                connections,
                duration_seconds,
            }),
            _ => anyhow::bail!("SIZE, CONNECTIONS and DURATION are required in client mode"),
        }
    }
}
