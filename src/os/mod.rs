//! OS abstraction layer
// (c) 2024 Ross Younger
//!
//! Everything the transfer strategies need from the kernel beyond plain `send`:
//! vectored sends, socket buffer sizing, and the deferred-copy (`MSG_ZEROCOPY`)
//! machinery with its error-queue completion channel.
//!
//! Deferred-copy sends are a Linux feature. On other Unix platforms the zero-copy calls
//! degrade: enabling reports [`Unsupported`](std::io::ErrorKind::Unsupported), sends are
//! ordinary vectored sends, and the error queue is always empty.

use std::io::{self, IoSlice};
use std::net::TcpStream;
use std::time::Duration;

use rustix::net::{SendAncillaryBuffer, SendFlags, sockopt as RustixSO};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(not(target_os = "linux"))]
mod other;
#[cfg(not(target_os = "linux"))]
use other as platform;

/// Error-queue origin for deferred-copy completions (`SO_EE_ORIGIN_ZEROCOPY`, `linux/errqueue.h`)
pub const SO_EE_ORIGIN_ZEROCOPY: u8 = 5;
/// Completion code meaning the kernel fell back to copying (`SO_EE_CODE_ZEROCOPY_COPIED`)
pub const SO_EE_CODE_ZEROCOPY_COPIED: u8 = 1;

#[cfg(target_os = "linux")]
const GATHER_FLAGS: SendFlags = SendFlags::NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const GATHER_FLAGS: SendFlags = SendFlags::empty();

/// One entry read from a socket's error queue (`struct sock_extended_err`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedError {
    /// `ee_errno`; zero for completion notifications
    pub errno: u32,
    /// `ee_origin`
    pub origin: u8,
    /// `ee_code`
    pub code: u8,
    /// `ee_info`; first send sequence number covered by a completion
    pub info: u32,
    /// `ee_data`; last send sequence number covered by a completion
    pub data: u32,
}

impl ExtendedError {
    /// Is this a deferred-copy completion, as opposed to an unrelated socket error?
    #[must_use]
    pub fn is_zerocopy_completion(&self) -> bool {
        self.errno == 0 && self.origin == SO_EE_ORIGIN_ZEROCOPY
    }

    /// Did the kernel copy the data after all?
    #[must_use]
    pub fn was_copied(&self) -> bool {
        self.code & SO_EE_CODE_ZEROCOPY_COPIED != 0
    }

    /// Number of sends retired by this completion.
    ///
    /// The kernel reports an inclusive range of 32-bit send sequence numbers, which may wrap.
    #[must_use]
    pub fn completed_sends(&self) -> u64 {
        u64::from(self.data.wrapping_sub(self.info)) + 1
    }
}

/// Does this send failure indicate a temporary condition worth draining and retrying?
///
/// `ENOBUFS` is how the kernel reports that the deferred-copy notification budget
/// (`optmem`) is exhausted.
pub(crate) fn is_transient_send_error(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOBUFS)
        || matches!(
            e.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        )
}

mod private {
    pub trait SealedSocket: std::os::fd::AsFd {}
    impl SealedSocket for std::net::TcpStream {}
}

/// OS abstraction trait providing the socket operations the transfer strategies use
///
/// **This is a sealed trait** : it only works for `TcpStream`.
pub trait SocketOptions: private::SealedSocket {
    /// Wrapper for `getsockopt SO_SNDBUF`.
    ///
    /// Note that Linux reports double the size that was set, to account for bookkeeping overhead.
    fn get_sendbuf(&self) -> io::Result<usize> {
        Ok(RustixSO::socket_send_buffer_size(self)?)
    }

    /// Wrapper for `setsockopt SO_SNDBUF`
    fn set_sendbuf(&self, size: usize) -> io::Result<()> {
        Ok(RustixSO::set_socket_send_buffer_size(self, size)?)
    }

    /// Transmits a gather list in a single `sendmsg` call.
    ///
    /// Returns the number of bytes the kernel accepted, which may be fewer than requested.
    fn send_gather(&self, iov: &[IoSlice<'_>]) -> io::Result<usize> {
        Ok(rustix::net::sendmsg(
            self,
            iov,
            &mut SendAncillaryBuffer::default(),
            GATHER_FLAGS,
        )?)
    }

    /// Enables deferred-copy sends (`SO_ZEROCOPY`)
    fn enable_zerocopy(&self) -> io::Result<()> {
        platform::enable_zerocopy(self.as_fd())
    }

    /// Transmits a gather list with `MSG_ZEROCOPY`.
    ///
    /// The caller must keep every buffer in `iov` alive and unmodified until the
    /// corresponding completion has been read from the error queue.
    fn send_zerocopy(&self, iov: &[IoSlice<'_>]) -> io::Result<usize> {
        platform::send_zerocopy(self.as_fd(), iov)
    }

    /// Reads one message from the error queue without blocking, passing each
    /// extended error it carries to `on_entry`.
    ///
    /// Returns `false` if the queue was empty.
    fn read_error_queue<F>(&self, mut on_entry: F) -> io::Result<bool>
    where
        F: FnMut(ExtendedError),
    {
        platform::read_error_queue(self.as_fd(), &mut on_entry)
    }

    /// Waits up to `timeout` for the error queue to become readable.
    ///
    /// Returns `true` if it is.
    fn wait_error_queue(&self, timeout: Duration) -> io::Result<bool> {
        platform::wait_error_queue(self.as_fd(), timeout)
    }
}

impl SocketOptions for TcpStream {}

static_assertions::assert_cfg!(unix, "This OS is not yet supported");

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod test {
    use super::{ExtendedError, SO_EE_ORIGIN_ZEROCOPY, SocketOptions as _, is_transient_send_error};
    use pretty_assertions::assert_eq;
    use std::io::{IoSlice, Read as _};
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    /// A connected loopback pair: (client, server)
    pub(crate) fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn gather_send_concatenates() {
        let (mut client, server) = loopback_pair();
        let iov = [IoSlice::new(b"ab"), IoSlice::new(b""), IoSlice::new(b"cd")];
        assert_eq!(server.send_gather(&iov).unwrap(), 4);
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn error_queue_starts_empty() {
        let (_client, server) = loopback_pair();
        let mut seen = 0;
        assert!(!server.read_error_queue(|_| seen += 1).unwrap());
        assert_eq!(seen, 0);
        assert!(!server.wait_error_queue(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn sendbuf_roundtrip() {
        let (_client, server) = loopback_pair();
        server.set_sendbuf(65536).unwrap();
        assert!(server.get_sendbuf().unwrap() >= 65536);
    }

    #[test]
    fn zerocopy_send_completes() {
        let (mut client, server) = loopback_pair();
        if let Err(e) = server.enable_zerocopy() {
            eprintln!("zero-copy unavailable here, skipping: {e}");
            return;
        }
        let data = vec![b'Z'; 4096];
        let sent = server.send_zerocopy(&[IoSlice::new(&data)]).unwrap();
        assert!(sent > 0);
        let mut received = vec![0u8; sent];
        client.read_exact(&mut received).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut entries = Vec::new();
        while entries.is_empty() && Instant::now() < deadline {
            let _ = server
                .wait_error_queue(Duration::from_millis(50))
                .unwrap();
            let _ = server.read_error_queue(|e| entries.push(e)).unwrap();
        }
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_zerocopy_completion());
        assert_eq!(entries[0].completed_sends(), 1);
    }

    #[test]
    fn completion_ranges() {
        let e = ExtendedError {
            origin: SO_EE_ORIGIN_ZEROCOPY,
            info: 5,
            data: 7,
            ..Default::default()
        };
        assert!(e.is_zerocopy_completion());
        assert!(!e.was_copied());
        assert_eq!(e.completed_sends(), 3);
        let wrapped = ExtendedError {
            info: u32::MAX,
            data: 1,
            ..e
        };
        assert_eq!(wrapped.completed_sends(), 3);
        let failed = ExtendedError { errno: 5, ..e };
        assert!(!failed.is_zerocopy_completion());
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient_send_error(&std::io::Error::from_raw_os_error(
            libc::ENOBUFS
        )));
        assert!(is_transient_send_error(&std::io::ErrorKind::WouldBlock.into()));
        assert!(!is_transient_send_error(&std::io::Error::from_raw_os_error(
            libc::EPIPE
        )));
    }
}
