//! Linux deferred-copy syscalls
// (c) 2024 Ross Younger
#![allow(unsafe_code)]

use std::io::{self, IoSlice};
use std::os::fd::{AsRawFd as _, BorrowedFd};
use std::time::Duration;

use super::ExtendedError;

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn invalid_length<E>(_: E) -> io::Error {
    io::Error::from(io::ErrorKind::InvalidInput)
}

pub(super) fn enable_zerocopy(fd: BorrowedFd<'_>) -> io::Result<()> {
    let one: libc::c_int = 1;
    let len = libc::socklen_t::try_from(size_of_val(&one)).map_err(invalid_length)?;
    // SAFETY: `fd` is open for the duration of the borrow; the option value points at
    // a live c_int of exactly `len` bytes.
    check(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ZEROCOPY,
            std::ptr::from_ref(&one).cast(),
            len,
        )
    })
}

pub(super) fn send_zerocopy(fd: BorrowedFd<'_>, iov: &[IoSlice<'_>]) -> io::Result<usize> {
    // SAFETY: all-zero is a valid msghdr (no address, no control data).
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    // IoSlice is ABI compatible with struct iovec on Unix. The kernel only reads through it.
    msg.msg_iov = iov.as_ptr().cast_mut().cast::<libc::iovec>();
    msg.msg_iovlen = iov.len().try_into().map_err(invalid_length)?;
    // SAFETY: msg_iov points at iov.len() descriptors which outlive the call.
    let rc = unsafe {
        libc::sendmsg(
            fd.as_raw_fd(),
            &msg,
            libc::MSG_ZEROCOPY | libc::MSG_NOSIGNAL,
        )
    };
    usize::try_from(rc).map_err(|_| io::Error::last_os_error())
}

pub(super) fn read_error_queue(
    fd: BorrowedFd<'_>,
    on_entry: &mut dyn FnMut(ExtendedError),
) -> io::Result<bool> {
    // u64 storage keeps the buffer aligned for cmsghdr
    let mut control = [0u64; 16];
    // SAFETY: all-zero is a valid msghdr.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = size_of_val(&control).try_into().map_err(invalid_length)?;

    // SAFETY: msg describes a control buffer we own and no data buffers.
    let rc = unsafe {
        libc::recvmsg(
            fd.as_raw_fd(),
            &mut msg,
            libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock => Ok(false),
            _ => Err(err),
        };
    }

    // SAFETY: recvmsg has set msg_controllen; CMSG_FIRSTHDR/CMSG_NXTHDR stay within it
    // and return null at the end.
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    while !cmsg.is_null() {
        // SAFETY: non-null headers lie within the control buffer.
        let (level, kind) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type) };
        if (level == libc::SOL_IP && kind == libc::IP_RECVERR)
            || (level == libc::SOL_IPV6 && kind == libc::IPV6_RECVERR)
        {
            // SAFETY: the payload of an IP(V6)_RECVERR message starts with a
            // sock_extended_err. It is not necessarily aligned.
            let serr = unsafe {
                libc::CMSG_DATA(cmsg)
                    .cast::<libc::sock_extended_err>()
                    .read_unaligned()
            };
            on_entry(ExtendedError {
                errno: serr.ee_errno,
                origin: serr.ee_origin,
                code: serr.ee_code,
                info: serr.ee_info,
                data: serr.ee_data,
            });
        }
        // SAFETY: as for CMSG_FIRSTHDR
        cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
    }
    Ok(true)
}

pub(super) fn wait_error_queue(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    // POLLERR is always reported; no other events are of interest
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: 0,
        revents: 0,
    };
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    // SAFETY: exactly one valid pollfd
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::Interrupted => Ok(false),
            _ => Err(err),
        };
    }
    Ok(pfd.revents & libc::POLLERR != 0)
}
