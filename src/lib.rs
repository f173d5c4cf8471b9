// (c) 2024 Ross Younger

//! `copybench` measures how much the number of payload copies costs a TCP sender.
//!
//! A server streams a synthetic 8-segment payload to every connecting client, using one of
//! three send disciplines:
//!
//! * **two-copy** ([`Strategy::TwoCopy`]): the segments are assembled into one contiguous
//!   staging buffer in user space, which is then copied into the kernel by `send`.
//! * **one-copy** ([`Strategy::OneCopy`]): the segments are handed to the kernel directly
//!   as a gather list with `sendmsg`, so the user-space assembly copy disappears.
//! * **zero-copy** ([`Strategy::ZeroCopy`]): as one-copy, but with `MSG_ZEROCOPY`.
//!   The kernel pins the caller's pages instead of copying them and reports completion
//!   later via the socket error queue, which must be drained.
//!
//! The client side ([`LoadGenerator`]) opens any number of concurrent connections, asks
//! for a payload size and duration via a fixed [handshake](protocol), sinks everything the
//! server sends and reports the aggregate throughput.
//!
//! ## Wire protocol
//!
//! 1. Client → server: payload size (`u64`), then duration in seconds (`i32`), both in host byte order.
//! 1. Server → client: back-to-back copies of the payload until the duration expires, then close.
//!
//! ## Configuration
//!
//! See [config] for the sources of run-time configuration and [`Configuration`] for the fields.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod cli;
pub use cli::cli as main;
pub use cli::styles;

pub mod client;
pub use client::{LoadGenerator, LoadReport};

pub mod config;
pub use config::{Configuration, Manager};

pub mod error;
pub mod os;
pub mod payload;
pub use payload::SyntheticMessage;

pub mod protocol;
pub mod server;
pub use server::Server;

pub mod strategy;
pub use strategy::Strategy;

pub mod util;
