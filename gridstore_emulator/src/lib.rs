//! An in-process emulator of the Gridstore table service.
//!
//! The emulator binds a loopback port and serves the same HTTP API as the
//! live service, backed by an in-memory table store. Tables become active
//! immediately, scans paginate over a configurable page size, and batch
//! writes can be made to refuse entries on demand to exercise callers'
//! retry handling.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hyper::Server;
use hyper::service::{make_service_fn, service_fn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod http;
mod store;

use store::TableStore;

/// The port emulators bind by default, mirroring the convention test
/// environments configure their local endpoint with.
pub const DEFAULT_PORT: u16 = 4567;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
}

/// How an [`Emulator`] binds and behaves.
#[derive(Debug, Clone, Copy)]
pub struct EmulatorConfig {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Artificial delay applied before serving each request.
    pub latency: Duration,
    /// Page size applied to scans that do not request one themselves.
    pub scan_page_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            latency: Duration::ZERO,
            scan_page_size: 100,
        }
    }
}

impl EmulatorConfig {
    /// Bind an ephemeral port instead of [`DEFAULT_PORT`]. Used by tests
    /// that must not interfere with the shared emulator.
    pub fn with_ephemeral_port(mut self) -> Self {
        self.bind_addr.set_port(0);
        self
    }

    /// Apply an artificial delay before serving each request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Cap scan pages at `scan_page_size` items unless the request asks
    /// for a smaller page.
    pub fn with_scan_page_size(mut self, scan_page_size: usize) -> Self {
        self.scan_page_size = scan_page_size;
        self
    }
}

/// A running emulator. Dropping it triggers shutdown; [`Emulator::shutdown`]
/// additionally waits for the port to be released.
#[derive(Debug)]
pub struct Emulator {
    addr: SocketAddr,
    store: Arc<TableStore>,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl Emulator {
    /// Bind the configured address and start serving.
    ///
    /// Binding fails if the address is in use, so two emulators cannot
    /// serve the same fixed port.
    pub async fn spawn(config: EmulatorConfig) -> Result<Self, Error> {
        let store = Arc::new(TableStore::default());
        let shutdown = CancellationToken::new();

        let latency = config.latency;
        let scan_page_size = config.scan_page_size;
        let make_svc = make_service_fn({
            let store = Arc::clone(&store);
            move |_conn| {
                let store = Arc::clone(&store);
                async move {
                    Ok::<_, Infallible>(service_fn(move |req| {
                        http::route_request(Arc::clone(&store), latency, scan_page_size, req)
                    }))
                }
            }
        });

        let server = Server::try_bind(&config.bind_addr)
            .map_err(|source| Error::Bind {
                addr: config.bind_addr,
                source,
            })?
            .serve(make_svc);
        let addr = server.local_addr();

        let graceful = server.with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });
        let join = tokio::spawn(async move {
            if let Err(error) = graceful.await {
                warn!(%error, "emulator server error");
            }
        });

        info!(%addr, "gridstore emulator listening");
        Ok(Self {
            addr,
            store,
            shutdown,
            join: Some(join),
        })
    }

    /// The address the emulator is serving on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The port the emulator is serving on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Arm the partial-failure injector: across subsequent batch writes,
    /// `count` entries in total will be refused and reported back as
    /// unprocessed, tail first.
    pub fn inject_unprocessed(&self, count: usize) {
        self.store.inject_unprocessed(count);
    }

    /// Number of batch write requests served so far.
    pub fn batch_requests(&self) -> u64 {
        self.store.batch_requests()
    }

    /// Stop serving and wait until in-flight requests finish and the port
    /// is released.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(error) = join.await {
                warn!(%error, "emulator serve task failed");
            }
        }
        info!(addr = %self.addr, "gridstore emulator stopped");
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
