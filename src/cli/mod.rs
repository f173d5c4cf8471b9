//! Command Line Interface for copybench
// (c) 2024 Ross Younger
mod args;
mod cli_main;
pub mod styles;
pub use cli_main::cli;
