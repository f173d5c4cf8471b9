//! Two-copy strategy
// (c) 2024 Ross Younger

use std::net::TcpStream;

use super::{Transfer, write_fully};
use crate::error::{AllocationError, TransferError};
use crate::payload::SyntheticMessage;

/// Assembles the message into a staging buffer every iteration, then sends the buffer.
#[derive(Debug)]
pub struct Copying {
    staging: Vec<u8>,
}

impl Copying {
    /// Allocates the staging buffer. It is reused for every message.
    pub fn new(len: usize) -> Result<Self, AllocationError> {
        let mut staging = Vec::new();
        staging
            .try_reserve_exact(len)
            .map_err(|source| AllocationError::Staging { len, source })?;
        staging.resize(len, 0);
        Ok(Self { staging })
    }
}

impl Transfer for Copying {
    fn send_message(
        &mut self,
        socket: &TcpStream,
        message: &SyntheticMessage,
        sent: &mut u64,
    ) -> Result<(), TransferError> {
        let len = message.flatten_into(&mut self.staging);
        write_fully(socket, &self.staging[..len], sent)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::Copying;
    use crate::error::AllocationError;

    #[test]
    fn impossible_staging_buffer() {
        let e = Copying::new(usize::MAX).unwrap_err();
        assert!(matches!(e, AllocationError::Staging { .. }));
    }
}
