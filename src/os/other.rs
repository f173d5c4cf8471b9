//! Platforms without deferred-copy sends
// (c) 2024 Ross Younger

use std::io::{self, IoSlice};
use std::os::fd::BorrowedFd;
use std::time::Duration;

use rustix::net::{SendAncillaryBuffer, SendFlags};

use super::ExtendedError;

pub(super) fn enable_zerocopy(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "MSG_ZEROCOPY is not available on this platform",
    ))
}

pub(super) fn send_zerocopy(fd: BorrowedFd<'_>, iov: &[IoSlice<'_>]) -> io::Result<usize> {
    Ok(rustix::net::sendmsg(
        fd,
        iov,
        &mut SendAncillaryBuffer::default(),
        SendFlags::empty(),
    )?)
}

pub(super) fn read_error_queue(
    _fd: BorrowedFd<'_>,
    _on_entry: &mut dyn FnMut(ExtendedError),
) -> io::Result<bool> {
    Ok(false)
}

pub(super) fn wait_error_queue(_fd: BorrowedFd<'_>, _timeout: Duration) -> io::Result<bool> {
    Ok(false)
}
