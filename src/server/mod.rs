//! Server side: accept loop and per-connection workers
// (c) 2024 Ross Younger
//!
//! The listener runs on a tokio runtime so that the accept wait can race a termination
//! signal. Every accepted connection is converted back to a blocking std socket and handed
//! to a detached OS thread running a [`ConnectionWorker`].

mod worker;
pub use worker::{ConnectionWorker, WorkerSettings, WorkerState};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, info_span, warn};

use crate::config::Configuration;

/// Pause after a failed accept, so a persistent failure (e.g. out of descriptors) doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A listening benchmark server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    settings: WorkerSettings,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl Server {
    /// Binds the listening socket as configured.
    ///
    /// This must be called from within a tokio runtime.
    pub fn bind(config: &Configuration) -> io::Result<Self> {
        let socket = match config.address {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.address)?;
        let listener = socket.listen(config.backlog)?;
        info!(
            "listening on {} (strategy {}, backlog {})",
            listener.local_addr()?,
            config.strategy,
            config.backlog
        );
        Ok(Self {
            listener,
            settings: WorkerSettings::from(config),
            running: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The address we are actually listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connection workers that have not yet finished
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Returns the number of connection workers still running at that point; they are
    /// detached and will finish on their own.
    pub async fn run<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let running = Arc::clone(&self.running);
        let stop = async move {
            shutdown.await;
            running.store(false, Ordering::Release);
        };
        tokio::pin!(stop);

        let mut next_id = 0u64;
        while self.running.load(Ordering::Acquire) {
            tokio::select! {
                () = &mut stop => (),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.dispatch(stream, peer, next_id);
                        next_id += 1;
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        let remaining = self.in_flight();
        info!("shutting down after {next_id} connections ({remaining} still in progress)");
        remaining
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, id: u64) {
        let socket = match stream.into_std().and_then(|s| {
            s.set_nonblocking(false)?;
            Ok(s)
        }) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not take over connection from {peer}: {e}");
                return;
            }
        };
        let guard = InFlightGuard::new(&self.in_flight);
        let settings = self.settings;
        let spawned = thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                let _span = info_span!("conn", id, %peer).entered();
                debug!("accepted");
                let _ = ConnectionWorker::new(settings).run(socket);
            });
        if let Err(e) = spawned {
            warn!("failed to spawn worker for {peer}: {e}");
        }
    }
}

/// Counts a connection worker as in flight for as long as it lives
#[derive(Debug)]
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        let _ = counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Completes on SIGINT or (on Unix) SIGTERM.
///
/// If the signal handlers cannot be installed, this logs a warning and never completes.
pub async fn termination_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                let _ = s.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = interrupt => info!("interrupted"),
        () = terminate => info!("terminated"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{InFlightGuard, Server};
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ephemeral() -> Configuration {
        Configuration {
            address: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = InFlightGuard::new(&counter);
        let b = InFlightGuard::new(&counter);
        assert_eq!(counter.load(Ordering::Acquire), 2);
        drop(a);
        assert_eq!(counter.load(Ordering::Acquire), 1);
        drop(b);
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let server = Server::bind(&ephemeral()).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn address_in_use() {
        let first = Server::bind(&ephemeral()).unwrap();
        let config = Configuration {
            address: first.local_addr().unwrap(),
            ..Default::default()
        };
        // SO_REUSEADDR does not permit two listeners on one port
        assert!(Server::bind(&config).is_err());
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let server = Server::bind(&ephemeral()).unwrap();
        let remaining = server.run(std::future::ready(())).await;
        assert_eq!(remaining, 0);
    }
}
