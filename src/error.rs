//! Error taxonomy for a single benchmark connection
// (c) 2024 Ross Younger
//!
//! Every error here is contained within the connection that raised it.
//! None of them propagate to the accept loop or to sibling connections.

use std::collections::TryReserveError;
use std::io;
use std::net::SocketAddr;

/// The control exchange at the start of a connection was truncated or malformed.
///
/// Always fatal to the connection; never retried.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// A fixed-width field could not be read in full
    #[error("failed to read handshake field `{field}`")]
    Truncated {
        /// Name of the field being read
        field: &'static str,
        /// Underlying I/O failure (`UnexpectedEof` if the peer closed)
        #[source]
        source: io::Error,
    },
    /// A fixed-width field could not be written in full
    #[error("failed to write handshake field `{field}`")]
    WriteFailed {
        /// Name of the field being written
        field: &'static str,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },
    /// The peer asked for more payload than we are prepared to build
    #[error("requested payload of {requested} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size requested by the peer
        requested: u64,
        /// Configured maximum
        limit: u64,
    },
}

/// Payload buffer construction failed.
///
/// Construction is all-or-nothing: by the time this is reported, every buffer
/// allocated before the failure has been released.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The requested size cannot be addressed on this platform
    #[error("payload of {0} bytes is not addressable on this platform")]
    Unaddressable(u64),
    /// One of the payload segments could not be allocated
    #[error("failed to allocate {len} bytes for payload segment {segment}")]
    Segment {
        /// Index of the failing segment
        segment: usize,
        /// Length requested
        len: usize,
        /// Allocator failure
        #[source]
        source: TryReserveError,
    },
    /// The two-copy staging buffer could not be allocated
    #[error("failed to allocate {len} byte staging buffer")]
    Staging {
        /// Length requested
        len: usize,
        /// Allocator failure
        #[source]
        source: TryReserveError,
    },
}

/// A send or receive failed mid-transfer.
///
/// Fatal to the connection; the loop stops immediately but the byte count up to that
/// point is still reported.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The send primitive returned an error
    #[error("send failed")]
    Send(#[source] io::Error),
    /// The send primitive accepted zero bytes
    #[error("connection accepted no further data")]
    Closed,
    /// Repeated deferred-copy backpressure that draining did not relieve
    #[error("deferred-copy send still refused after {attempts} drain-and-retry attempts")]
    BackpressureExhausted {
        /// Consecutive unproductive retries
        attempts: u32,
        /// The error the kernel kept returning
        #[source]
        source: io::Error,
    },
    /// The deferred-copy completion channel could not be read
    #[error("failed to read deferred-copy completions")]
    Drain(#[source] io::Error),
    /// The receive primitive returned an error
    #[error("receive failed")]
    Receive(#[source] io::Error),
    /// Payload verification found an unexpected byte
    #[error("received byte at stream offset {offset} was {actual:#04x}, expected {expected:#04x}")]
    Corrupt {
        /// Offset in the received stream
        offset: u64,
        /// Byte we expected
        expected: u8,
        /// Byte we received
        actual: u8,
    },
}

/// The deferred-copy notification queue is temporarily full (or the send was otherwise
/// transiently refused).
///
/// Handled inside the zero-copy strategy by draining completions and retrying the same
/// send. Never surfaced to the caller.
#[derive(Debug, thiserror::Error)]
#[error("deferred-copy send transiently refused")]
pub struct NotificationBackpressure {
    /// The refusal reported by the kernel
    #[source]
    pub source: io::Error,
}

/// Deferred-copy mode could not be enabled on a socket.
///
/// Reported, never fatal; the zero-copy strategy continues with ordinary copying sends.
#[derive(Debug, thiserror::Error)]
#[error("unable to enable zero-copy sends on this socket (continuing with copying sends)")]
pub struct CapabilityUnavailable {
    /// Why `SO_ZEROCOPY` was refused
    #[source]
    pub source: io::Error,
}

/// Anything that ends a connection early, on either side.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Could not reach the server
    #[error("failed to connect to {address}")]
    Connect {
        /// Server address
        address: SocketAddr,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
    /// Could not configure the socket
    #[error("socket setup failed")]
    Socket(#[source] io::Error),
    /// See [`HandshakeError`]
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// See [`AllocationError`]
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// See [`TransferError`]
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{ConnectionError, HandshakeError, TransferError};
    use pretty_assertions::assert_eq;
    use std::error::Error as _;

    #[test]
    fn handshake_error_keeps_source() {
        let e = HandshakeError::Truncated {
            field: "payload_size",
            source: std::io::ErrorKind::UnexpectedEof.into(),
        };
        assert_eq!(e.to_string(), "failed to read handshake field `payload_size`");
        assert!(e.source().is_some());
    }

    #[test]
    fn alternate_format_includes_sources() {
        let e = anyhow::Error::from(ConnectionError::from(HandshakeError::Truncated {
            field: "duration_seconds",
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof"),
        }));
        assert_eq!(
            format!("{e:#}"),
            "failed to read handshake field `duration_seconds`: early eof"
        );
    }

    #[test]
    fn transparent_wrapping() {
        let e = ConnectionError::from(TransferError::Closed);
        assert_eq!(e.to_string(), "connection accepted no further data");
    }

    #[test]
    fn corrupt_formatting() {
        let e = TransferError::Corrupt {
            offset: 12,
            expected: b'A',
            actual: b'B',
        };
        assert_eq!(
            e.to_string(),
            "received byte at stream offset 12 was 0x42, expected 0x41"
        );
    }
}
