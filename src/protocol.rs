//! The control exchange that precedes every transfer
// (c) 2024 Ross Younger
//!
//! The client sends two fixed-width fields, each as a separate write:
//!
//! | field | type | bytes |
//! |---|---|---|
//! | `payload_size` | `u64` | 8 |
//! | `duration_seconds` | `i32` | 4 |
//!
//! There is no framing and no byte-order conversion; both fields are sent in host byte
//! order, so client and server are expected to share an architecture.
//!
//! Everything after the handshake flows from server to client as an unframed byte stream.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::HandshakeError;

/// Total size of the handshake on the wire
pub const HANDSHAKE_LEN: usize = size_of::<u64>() + size_of::<i32>();

/// The parameters a client asks the server for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFields {
    /// Size of each logical message, in bytes
    pub payload_size: u64,
    /// How long the server should keep sending
    pub duration_seconds: i32,
}

impl HandshakeFields {
    /// Requested transfer duration. Non-positive values mean "stop immediately".
    #[must_use]
    pub fn duration(&self) -> Duration {
        u64::try_from(self.duration_seconds).map_or(Duration::ZERO, Duration::from_secs)
    }

    /// Rejects a payload size larger than `limit`
    pub fn check_limit(self, limit: u64) -> Result<Self, HandshakeError> {
        if self.payload_size > limit {
            return Err(HandshakeError::PayloadTooLarge {
                requested: self.payload_size,
                limit,
            });
        }
        Ok(self)
    }
}

/// Server side: reads both handshake fields in full.
///
/// A field that cannot be read completely (peer closed or errored mid-read) is a fatal
/// [`HandshakeError`].
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<HandshakeFields, HandshakeError> {
    let mut size = [0u8; size_of::<u64>()];
    reader
        .read_exact(&mut size)
        .map_err(|source| HandshakeError::Truncated {
            field: "payload_size",
            source,
        })?;
    let mut duration = [0u8; size_of::<i32>()];
    reader
        .read_exact(&mut duration)
        .map_err(|source| HandshakeError::Truncated {
            field: "duration_seconds",
            source,
        })?;
    Ok(HandshakeFields {
        payload_size: u64::from_ne_bytes(size),
        duration_seconds: i32::from_ne_bytes(duration),
    })
}

/// Client side: writes both handshake fields, each looped to completion.
pub fn write_handshake<W: Write>(
    writer: &mut W,
    fields: &HandshakeFields,
) -> Result<(), HandshakeError> {
    writer
        .write_all(&fields.payload_size.to_ne_bytes())
        .map_err(|source| HandshakeError::WriteFailed {
            field: "payload_size",
            source,
        })?;
    writer
        .write_all(&fields.duration_seconds.to_ne_bytes())
        .and_then(|()| writer.flush())
        .map_err(|source| HandshakeError::WriteFailed {
            field: "duration_seconds",
            source,
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{HANDSHAKE_LEN, HandshakeFields, read_handshake, write_handshake};
    use crate::error::HandshakeError;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Write};
    use std::time::Duration;

    /// A writer that accepts at most one byte per call
    struct Trickle(Vec<u8>);
    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(b) => {
                    self.0.push(*b);
                    Ok(1)
                }
                None => Ok(0),
            }
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_writes_are_completed() {
        let fields = HandshakeFields {
            payload_size: 800_000,
            duration_seconds: 3,
        };
        let mut out = Trickle(Vec::new());
        write_handshake(&mut out, &fields).unwrap();
        assert_eq!(out.0.len(), HANDSHAKE_LEN);
        assert_eq!(&out.0[..8], &800_000u64.to_ne_bytes());

        let read = read_handshake(&mut Cursor::new(out.0)).unwrap();
        assert_eq!(read, fields);
    }

    #[test]
    fn empty_stream_fails_on_first_field() {
        let e = read_handshake(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(
            e,
            HandshakeError::Truncated {
                field: "payload_size",
                ..
            }
        ));
    }

    #[test]
    fn truncated_duration() {
        let mut wire = 42u64.to_ne_bytes().to_vec();
        wire.extend_from_slice(&[1, 2]);
        let e = read_handshake(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(
            e,
            HandshakeError::Truncated {
                field: "duration_seconds",
                ..
            }
        ));
    }

    #[test]
    fn durations() {
        let mut f = HandshakeFields {
            payload_size: 1,
            duration_seconds: 2,
        };
        assert_eq!(f.duration(), Duration::from_secs(2));
        f.duration_seconds = -5;
        assert_eq!(f.duration(), Duration::ZERO);
    }

    #[test]
    fn payload_limit() {
        let f = HandshakeFields {
            payload_size: 1001,
            duration_seconds: 1,
        };
        assert!(f.check_limit(1001).is_ok());
        let e = f.check_limit(1000).unwrap_err();
        assert_eq!(
            e.to_string(),
            "requested payload of 1001 bytes exceeds the limit of 1000 bytes"
        );
    }
}
