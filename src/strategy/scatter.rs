//! One-copy (scatter-gather) strategy
// (c) 2024 Ross Younger

use std::io::{self, IoSlice};
use std::net::TcpStream;

use super::Transfer;
use crate::error::TransferError;
use crate::os::SocketOptions as _;
use crate::payload::SyntheticMessage;

/// Hands the eight segments to the kernel in one gather `sendmsg`; no staging buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScatterGather;

impl Transfer for ScatterGather {
    fn send_message(
        &mut self,
        socket: &TcpStream,
        message: &SyntheticMessage,
        sent: &mut u64,
    ) -> Result<(), TransferError> {
        let mut slices = message.gather().slices();
        let mut iov = &mut slices[..];
        // skip leading empty segments
        IoSlice::advance_slices(&mut iov, 0);
        while !iov.is_empty() {
            match socket.send_gather(iov) {
                Ok(0) => return Err(TransferError::Closed),
                Ok(n) => {
                    *sent += n as u64;
                    IoSlice::advance_slices(&mut iov, n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(TransferError::Send(e)),
            }
        }
        Ok(())
    }
}
