//! Client side: the load generator
// (c) 2024 Ross Younger
//!
//! Each connection worker runs on its own OS thread: connect, send the handshake, then
//! read everything the server sends until it closes the connection.
//! Per-worker byte counts are folded into one shared total when each worker finishes.

mod options;
pub use options::Parameters;
pub(crate) use options::Workload;

mod progress;
pub(crate) use progress::{MAX_UPDATE_FPS, progress_bar};

use std::fmt::Display;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use human_repr::{HumanCount as _, HumanDuration as _};
use indicatif::ProgressBar;
use tracing::{debug, debug_span, warn};

use crate::error::{ConnectionError, TransferError};
use crate::payload::expected_byte;
use crate::protocol::{HandshakeFields, write_handshake};
use crate::util::stats::DataRate;

/// Default size of each worker's receive buffer
pub const DEFAULT_SINK_BUFFER: usize = 256 * 1024;

/// How often the driver refreshes the progress display while workers run
const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// What a worker thread hands back to the driver
#[derive(Debug, Clone, Copy)]
struct Finished {
    /// Bytes received, or `None` if the connection failed
    bytes: Option<u64>,
    /// When the worker finished
    at: Instant,
}

/// Drives many concurrent connections against one server
#[derive(Debug, Clone)]
#[allow(missing_copy_implementations)]
pub struct LoadGenerator {
    /// Server address
    pub address: SocketAddr,
    /// Payload size each connection asks for
    pub payload_size: u64,
    /// Duration each connection asks for
    pub duration_seconds: i32,
    /// Number of concurrent connections
    pub connections: usize,
    /// Receive buffer size per connection
    pub sink_buffer: usize,
    /// Check every received byte against the payload pattern
    pub verify: bool,
}

impl LoadGenerator {
    /// Constructor, with the default sink buffer and no verification
    #[must_use]
    pub fn new(
        address: SocketAddr,
        payload_size: u64,
        connections: usize,
        duration_seconds: i32,
    ) -> Self {
        Self {
            address,
            payload_size,
            duration_seconds,
            connections,
            sink_buffer: DEFAULT_SINK_BUFFER,
            verify: false,
        }
    }

    /// Runs one connection to completion, returning the number of bytes received.
    ///
    /// A receive error ends the connection early; it is logged and the bytes received up
    /// to that point still count.
    pub fn run_worker(&self) -> Result<u64, ConnectionError> {
        let mut stream =
            TcpStream::connect(self.address).map_err(|source| ConnectionError::Connect {
                address: self.address,
                source,
            })?;
        write_handshake(
            &mut stream,
            &HandshakeFields {
                payload_size: self.payload_size,
                duration_seconds: self.duration_seconds,
            },
        )?;
        Ok(self.sink(&mut stream)?)
    }

    /// Reads until end of stream
    fn sink<R: Read>(&self, reader: &mut R) -> Result<u64, TransferError> {
        let mut buf = vec![0u8; self.sink_buffer.max(1)];
        let mut received = 0u64;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if self.verify {
                        verify_chunk(self.payload_size, received, &buf[..n])?;
                    }
                    received += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    warn!(
                        "{:#} after {received} bytes",
                        anyhow::Error::from(TransferError::Receive(e))
                    );
                    break;
                }
            }
        }
        Ok(received)
    }

    /// Runs every connection and waits for them all
    #[must_use]
    pub fn run(&self) -> LoadReport {
        self.run_with_progress(&ProgressBar::hidden())
    }

    /// Runs every connection and waits for them all, ticking `progress` with the
    /// elapsed time in milliseconds.
    ///
    /// Workers that cannot be spawned, or that fail to connect or handshake, are logged
    /// and counted in [`LoadReport::failed`]; the others carry on.
    #[must_use]
    pub fn run_with_progress(&self, progress: &ProgressBar) -> LoadReport {
        let total = Arc::new(Mutex::new(0u64));
        let start = Instant::now();
        let mut handles: Vec<JoinHandle<Finished>> = Vec::with_capacity(self.connections);
        let mut failed = 0;

        for id in 0..self.connections {
            let worker = self.clone();
            let total = Arc::clone(&total);
            let spawned = thread::Builder::new()
                .name(format!("sink-{id}"))
                .spawn(move || {
                    let _span = debug_span!("worker", id).entered();
                    let bytes = match worker.run_worker() {
                        Ok(bytes) => {
                            *total.lock().unwrap_or_else(PoisonError::into_inner) += bytes;
                            debug!("received {}", bytes.human_count_bytes());
                            Some(bytes)
                        }
                        Err(e) => {
                            warn!("{:#}", anyhow::Error::from(e));
                            None
                        }
                    };
                    Finished {
                        bytes,
                        at: Instant::now(),
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!("failed to spawn worker {id}: {e}");
                    failed += 1;
                }
            }
        }

        while !handles.iter().all(JoinHandle::is_finished) {
            progress.set_position(
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            );
            thread::sleep(PROGRESS_INTERVAL);
        }
        // Timed by the workers themselves; the display loop above may overshoot.
        let mut last_finish = None;
        let mut per_worker = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(finished) => {
                    last_finish = last_finish.max(Some(finished.at));
                    match finished.bytes {
                        Some(bytes) => per_worker.push(bytes),
                        None => failed += 1,
                    }
                }
                Err(_) => {
                    warn!("a worker thread panicked");
                    failed += 1;
                }
            }
        }
        let elapsed = last_finish.map_or_else(
            || start.elapsed(),
            |at: Instant| at.saturating_duration_since(start),
        );
        let total_bytes = *total.lock().unwrap_or_else(PoisonError::into_inner);

        LoadReport {
            total_bytes,
            per_worker,
            failed,
            elapsed,
            connections: self.connections,
            payload_size: self.payload_size,
        }
    }
}

/// Checks a received chunk that starts at `stream_offset` against the payload pattern
fn verify_chunk(payload_size: u64, stream_offset: u64, chunk: &[u8]) -> Result<(), TransferError> {
    for (i, &actual) in chunk.iter().enumerate() {
        let offset = stream_offset + i as u64;
        let expected = offset
            .checked_rem(payload_size)
            .map_or(0, |o| expected_byte(payload_size, o));
        if actual != expected {
            return Err(TransferError::Corrupt {
                offset,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Results of a load generator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Aggregate bytes received by every worker
    pub total_bytes: u64,
    /// Bytes received by each worker that completed
    pub per_worker: Vec<u64>,
    /// Workers that could not be spawned, or failed to connect, handshake or verify
    pub failed: usize,
    /// Wall-clock time from first spawn until the last worker finished
    pub elapsed: Duration,
    /// Connections requested
    pub connections: usize,
    /// Payload size requested
    pub payload_size: u64,
}

impl LoadReport {
    /// Aggregate receive rate
    #[must_use]
    pub fn rate(&self) -> DataRate {
        DataRate::new(self.total_bytes, Some(self.elapsed))
    }

    /// Aggregate throughput in Gbit/s (0 if it cannot be computed)
    #[must_use]
    pub fn throughput_gbps(&self) -> f64 {
        self.rate().gbps().unwrap_or_default()
    }

    /// Number of whole messages received across all connections
    #[must_use]
    pub fn messages(&self) -> u64 {
        self.total_bytes.checked_div(self.payload_size).unwrap_or(0)
    }

    /// Mean time for one connection to receive one message
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_message_time(&self) -> Option<Duration> {
        let messages = self.messages();
        if messages == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            self.elapsed.as_secs_f64() * self.connections as f64 / messages as f64,
        ))
    }
}

impl Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Received {} ({} bytes) in {} over {} connections",
            self.total_bytes.human_count_bytes(),
            self.total_bytes,
            self.elapsed.human_duration(),
            self.connections,
        )?;
        write!(
            f,
            "Throughput: {:.3} Gbps ({})",
            self.throughput_gbps(),
            self.rate()
        )?;
        if let Some(t) = self.mean_message_time() {
            write!(f, "\nMean time per message: {}", t.human_duration())?;
        }
        if self.failed > 0 {
            write!(f, "\n{} connections failed", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{LoadGenerator, LoadReport, PROGRESS_INTERVAL, verify_chunk};
    use crate::error::{ConnectionError, TransferError};
    use assertables::assert_contains;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::time::Duration;

    fn report(total_bytes: u64, elapsed: Duration) -> LoadReport {
        LoadReport {
            total_bytes,
            per_worker: vec![total_bytes],
            failed: 0,
            elapsed,
            connections: 2,
            payload_size: 1000,
        }
    }

    #[test]
    fn verify_accepts_pattern() {
        // 16-byte payload: two bytes per segment
        let stream = b"AABBCCDDEEFFGGHHAABB";
        verify_chunk(16, 0, stream).unwrap();
        verify_chunk(16, 2, b"BBCC").unwrap();
    }

    #[test]
    fn verify_reports_offset() {
        let e = verify_chunk(16, 16, b"AAX").unwrap_err();
        assert!(matches!(
            e,
            TransferError::Corrupt {
                offset: 18,
                expected: b'B',
                actual: b'X'
            }
        ));
    }

    #[test]
    fn sink_counts_until_eof() {
        let mut load = LoadGenerator::new("127.0.0.1:1".parse().unwrap(), 16, 1, 1);
        load.sink_buffer = 3;
        load.verify = true;
        let mut src = Cursor::new(b"AABBCCDDEEFFGGHHAABBCCDDEEFFGGHH".to_vec());
        assert_eq!(load.sink(&mut src).unwrap(), 32);
    }

    #[test]
    fn connect_failure() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let load = LoadGenerator::new(addr, 16, 1, 1);
        let e = load.run_worker().unwrap_err();
        assert!(matches!(e, ConnectionError::Connect { .. }));
        let report = load.run();
        assert_eq!(report.failed, 1);
        assert_eq!(report.total_bytes, 0);
        assert!(report.per_worker.is_empty());
    }

    #[test]
    fn elapsed_is_not_rounded_up_to_display_ticks() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        // refused at once
        let report = LoadGenerator::new(addr, 16, 1, 1).run();
        assert_eq!(report.failed, 1);
        assert!(report.elapsed < PROGRESS_INTERVAL, "{:?}", report.elapsed);
    }

    #[test]
    fn report_arithmetic() {
        let r = report(1_000_000, Duration::from_secs(2));
        assert_eq!(r.messages(), 1000);
        assert!((r.throughput_gbps() - 0.004).abs() < 1e-12);
        // 2s * 2 connections / 1000 messages
        let mean = r.mean_message_time().unwrap();
        assert!(mean.abs_diff(Duration::from_millis(4)) < Duration::from_micros(1));
    }

    #[test]
    fn report_display() {
        let mut r = report(1_000_000, Duration::from_secs(1));
        r.failed = 3;
        let s = r.to_string();
        assert_contains!(s, "1000000 bytes");
        assert_contains!(s, "Gbps");
        assert_contains!(s, "Mean time per message");
        assert_contains!(s, "3 connections failed");
        let empty = report(0, Duration::ZERO);
        assert!(empty.mean_message_time().is_none());
        assert!(empty.throughput_gbps().abs() < f64::EPSILON);
    }
}
