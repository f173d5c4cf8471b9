//! General utility code that didn't fit anywhere else
//!
//! Note that most of this module is not exported.
// (c) 2024 Ross Younger

pub mod stats;

mod tracing;
pub use tracing::TimeFormat;
pub(crate) use tracing::{
    ConsoleTraceType, LogSettings, is_initialized as tracing_is_initialised,
    setup as setup_tracing,
};
