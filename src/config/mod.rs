// (c) 2024 Ross Younger
//! # Configuration management
//!
//! copybench obtains run-time configuration from the following sources, in order of
//! increasing priority:
//! 1. Hard-wired defaults ([`Configuration::default()`])
//! 2. The system-wide configuration file, `/etc/copybench.toml`
//! 3. The user's configuration file, `copybench/copybench.toml` under the platform
//!    configuration directory (on Linux, `~/.config/copybench/copybench.toml`)
//! 4. Environment variables prefixed `COPYBENCH_`, for example `COPYBENCH_STRATEGY=zero-copy`
//! 5. Command-line options
//!
//! Run `copybench --config-files` for the list of files we read.
//!
//! ## File format
//!
//! Configuration files are TOML, with one key per [`Configuration`] field:
//!
//! ```toml
//! address = "0.0.0.0:8080"
//! strategy = "zero-copy"
//! send_buffer = 4194304
//! ```
//!
//! * `copybench --show-config` outputs every field, its current value, and where that value came from.
//! * For an explanation of each field, refer to `copybench --help` .

mod manager;
mod structure;

pub use manager::Manager;
pub use structure::{ConfigOverrides, Configuration};
