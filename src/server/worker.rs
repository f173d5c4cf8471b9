//! Per-connection orchestration on the server
// (c) 2024 Ross Younger

use std::net::TcpStream;
use std::time::Duration;

use human_repr::{HumanCount as _, HumanDuration as _};
use tracing::{debug, info, trace, warn};

use crate::config::Configuration;
use crate::error::ConnectionError;
use crate::os::SocketOptions as _;
use crate::payload::SyntheticMessage;
use crate::protocol::read_handshake;
use crate::strategy::{self, Strategy, StrategySettings, Transfer, TransferSummary};

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WorkerState {
    /// Waiting for the client's two handshake fields
    AwaitingHandshake,
    /// Allocating the payload and strategy state
    BuildingPayload,
    /// Running the timed send loop
    Transferring,
    /// Releasing the payload and socket
    Closing,
}

/// The parts of [`Configuration`] a connection worker needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Copy discipline
    pub strategy: Strategy,
    /// Read timeout while waiting for the handshake
    pub handshake_timeout: Option<Duration>,
    /// Write timeout for sends
    pub send_timeout: Option<Duration>,
    /// `SO_SNDBUF`, if non-zero
    pub send_buffer: usize,
    /// Largest payload a handshake may request
    pub max_payload: u64,
    /// Zero-copy tuning
    pub strategy_settings: StrategySettings,
}

impl From<&Configuration> for WorkerSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            strategy: config.strategy,
            handshake_timeout: config.handshake_timeout(),
            send_timeout: config.send_timeout(),
            send_buffer: config.send_buffer,
            max_payload: config.max_payload,
            strategy_settings: config.strategy_settings(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&Configuration::default())
    }
}

/// Serves one accepted connection: handshake, payload construction, timed transfer, cleanup.
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct ConnectionWorker {
    settings: WorkerSettings,
    state: WorkerState,
}

impl ConnectionWorker {
    /// Constructor
    #[must_use]
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            state: WorkerState::AwaitingHandshake,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn enter(&mut self, next: WorkerState) {
        trace!("{} -> {next}", self.state);
        self.state = next;
    }

    /// Serves the connection to completion, consuming the socket.
    ///
    /// Every exit path passes through [`WorkerState::Closing`], which releases the payload
    /// (if one was built) and closes the socket. A send failure during the transfer is
    /// reported in the summary, not as an error.
    pub fn run(&mut self, socket: TcpStream) -> anyhow::Result<TransferSummary> {
        let result = self.serve(&socket);
        self.enter(WorkerState::Closing);
        drop(socket);
        match result {
            Ok(summary) => {
                info!(
                    "sent {} in {} ({} messages, {})",
                    summary.bytes_sent.human_count_bytes(),
                    summary.elapsed.human_duration(),
                    summary.messages,
                    summary.rate(),
                );
                if let Some(e) = &summary.error {
                    warn!("transfer ended early: {e:#}");
                }
                Ok(summary)
            }
            Err(e) => {
                let e = anyhow::Error::from(e);
                warn!("{e:#}");
                Err(e)
            }
        }
    }

    fn serve(&mut self, socket: &TcpStream) -> Result<TransferSummary, ConnectionError> {
        socket
            .set_read_timeout(self.settings.handshake_timeout)
            .map_err(ConnectionError::Socket)?;
        let mut reader = socket;
        let fields = read_handshake(&mut reader)?.check_limit(self.settings.max_payload)?;
        debug!(
            "client requested {} byte messages for {}s",
            fields.payload_size, fields.duration_seconds
        );

        self.enter(WorkerState::BuildingPayload);
        let mut message = SyntheticMessage::build(fields.payload_size)?;
        let mut transfer = self
            .settings
            .strategy
            .prepare(message.total_len(), &self.settings.strategy_settings)?;
        self.configure_sending(socket)?;

        self.enter(WorkerState::Transferring);
        let summary = strategy::run(transfer.as_mut(), socket, &message, fields.duration());

        if !retire(&mut message, &*transfer) {
            std::mem::forget(message);
        }
        Ok(summary)
    }

    fn configure_sending(&self, socket: &TcpStream) -> Result<(), ConnectionError> {
        socket
            .set_write_timeout(self.settings.send_timeout)
            .map_err(ConnectionError::Socket)?;
        if self.settings.send_buffer > 0 {
            socket
                .set_sendbuf(self.settings.send_buffer)
                .map_err(ConnectionError::Socket)?;
            trace!("send buffer is now {}", socket.get_sendbuf().unwrap_or(0));
        }
        Ok(())
    }
}

/// Releases the payload unless the kernel may still be reading it.
///
/// Returns `false` if the message was left intact; the caller must then leak it rather
/// than drop it.
fn retire(message: &mut SyntheticMessage, transfer: &dyn Transfer) -> bool {
    let in_flight = transfer.buffers_in_flight();
    if in_flight > 0 {
        warn!(
            "leaking {} payload: {in_flight} zero-copy sends never completed",
            message.total_len().human_count_bytes()
        );
        return false;
    }
    message.release();
    true
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{ConnectionWorker, WorkerSettings, WorkerState, retire};
    use crate::error::{ConnectionError, HandshakeError, TransferError};
    use crate::os::test::loopback_pair;
    use crate::payload::{SEGMENT_COUNT, SyntheticMessage};
    use crate::protocol::{HandshakeFields, write_handshake};
    use crate::strategy::test::collect;
    use crate::strategy::{Strategy, Transfer};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::net::TcpStream;
    use std::time::Duration;

    /// A transfer whose sends the kernel never finishes with
    #[derive(Debug)]
    struct Pinned(u64);

    impl Transfer for Pinned {
        fn send_message(
            &mut self,
            _socket: &TcpStream,
            _message: &SyntheticMessage,
            _sent: &mut u64,
        ) -> Result<(), TransferError> {
            Ok(())
        }

        fn buffers_in_flight(&self) -> u64 {
            self.0
        }
    }

    fn handshake_error(e: &anyhow::Error) -> &HandshakeError {
        match e.downcast_ref::<ConnectionError>() {
            Some(ConnectionError::Handshake(h)) => h,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn payload_with_sends_in_flight_is_kept() {
        let mut message = SyntheticMessage::build(1000).unwrap();
        assert!(!retire(&mut message, &Pinned(3)));
        assert_eq!(message.segments().len(), SEGMENT_COUNT);
        assert_eq!(message.total_len(), 1000);
    }

    #[test]
    fn payload_with_nothing_in_flight_is_released() {
        let mut message = SyntheticMessage::build(1000).unwrap();
        assert!(retire(&mut message, &Pinned(0)));
        assert_eq!(message.segments().len(), 0);
    }

    #[test]
    fn client_closes_without_handshake() {
        let (client, server) = loopback_pair();
        drop(client);
        let mut worker = ConnectionWorker::new(WorkerSettings::default());
        let e = worker.run(server).unwrap_err();
        assert!(matches!(
            handshake_error(&e),
            HandshakeError::Truncated {
                field: "payload_size",
                ..
            }
        ));
        assert_eq!(worker.state(), WorkerState::Closing);
    }

    #[test]
    fn silent_client_times_out() {
        let (_client, server) = loopback_pair();
        let mut worker = ConnectionWorker::new(WorkerSettings {
            handshake_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let e = worker.run(server).unwrap_err();
        let _ = handshake_error(&e);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let (mut client, server) = loopback_pair();
        write_handshake(
            &mut client,
            &HandshakeFields {
                payload_size: 1 << 40,
                duration_seconds: 1,
            },
        )
        .unwrap();
        let mut worker = ConnectionWorker::new(WorkerSettings {
            max_payload: 1 << 20,
            ..Default::default()
        });
        let e = worker.run(server).unwrap_err();
        assert!(matches!(
            handshake_error(&e),
            HandshakeError::PayloadTooLarge { .. }
        ));
        assert_eq!(worker.state(), WorkerState::Closing);
    }

    #[rstest]
    #[case(Strategy::TwoCopy)]
    #[case(Strategy::OneCopy)]
    #[case(Strategy::ZeroCopy)]
    fn short_transfer(#[case] strategy: Strategy) {
        let (mut client, server) = loopback_pair();
        write_handshake(
            &mut client,
            &HandshakeFields {
                payload_size: 10_000,
                duration_seconds: 1,
            },
        )
        .unwrap();
        let reader = collect(client);
        let mut worker = ConnectionWorker::new(WorkerSettings {
            strategy,
            send_buffer: 1 << 20,
            ..Default::default()
        });
        let summary = worker.run(server).unwrap();
        assert!(summary.error.is_none());
        assert!(summary.messages > 0);
        assert_eq!(summary.bytes_sent, summary.messages * 10_000);
        let received = reader.join().unwrap();
        assert_eq!(received.len() as u64, summary.bytes_sent);
        assert_eq!(worker.state(), WorkerState::Closing);
    }

    #[test]
    fn negative_duration_sends_nothing() {
        let (mut client, server) = loopback_pair();
        write_handshake(
            &mut client,
            &HandshakeFields {
                payload_size: 100,
                duration_seconds: -1,
            },
        )
        .unwrap();
        let reader = collect(client);
        let summary = ConnectionWorker::new(WorkerSettings::default())
            .run(server)
            .unwrap();
        assert_eq!(summary.bytes_sent, 0);
        assert!(reader.join().unwrap().is_empty());
    }
}
