//! The process-shared emulator behind mocked-mode fixtures.
//!
//! Every mocked fixture in a test process talks to one emulator on the
//! fixed local port. The emulator starts when the first handle is
//! acquired and stops when the last handle is closed or dropped, so a
//! later acquisition gets a fresh one.

use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use gridstore_emulator::{Emulator, EmulatorConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;

/// The shared emulator, held weakly so its port is released once every
/// handle is gone.
static SHARED_EMULATOR: LazyLock<Mutex<Weak<Emulator>>> =
    LazyLock::new(|| Mutex::new(Weak::new()));

/// A reference-counted handle on the process-shared emulator.
///
/// Clones refer to the same emulator. [`close`](Self::close) releases the
/// handle and shuts the emulator down when no other handle is live;
/// dropping a handle releases it without waiting for the port.
#[derive(Debug, Clone)]
pub struct EmulatorHandle {
    shared: Arc<Emulator>,
}

impl EmulatorHandle {
    /// Acquire the shared emulator, starting one if none is live.
    pub async fn acquire() -> Result<Self> {
        let mut shared = SHARED_EMULATOR.lock().await;
        if let Some(emulator) = shared.upgrade() {
            debug!("reusing the shared emulator");
            return Ok(Self { shared: emulator });
        }

        info!(
            port = gridstore_emulator::DEFAULT_PORT,
            "starting the shared emulator"
        );
        let emulator = Arc::new(spawn_when_port_free().await?);
        *shared = Arc::downgrade(&emulator);
        Ok(Self { shared: emulator })
    }

    /// The port the emulator is listening on.
    pub fn port(&self) -> u16 {
        self.shared.port()
    }

    /// Make the emulator refuse the next `count` write entries across
    /// subsequent batch calls.
    pub fn inject_unprocessed(&self, count: usize) {
        self.shared.inject_unprocessed(count);
    }

    /// Number of batch write calls the emulator has served.
    pub fn batch_requests(&self) -> u64 {
        self.shared.batch_requests()
    }

    /// Release this handle. When it is the last one, stop the emulator
    /// and wait for its port to be released.
    pub async fn close(self) {
        let _shared = SHARED_EMULATOR.lock().await;
        if let Some(emulator) = Arc::into_inner(self.shared) {
            info!("last handle closed, stopping the shared emulator");
            emulator.shutdown().await;
        }
    }
}

/// Start an emulator on the fixed port, giving a just-stopped predecessor
/// a moment to finish releasing it.
async fn spawn_when_port_free() -> Result<Emulator> {
    let mut attempts_left = 40u32;
    loop {
        match Emulator::spawn(EmulatorConfig::default()).await {
            Ok(emulator) => return Ok(emulator),
            Err(error) if attempts_left > 0 => {
                attempts_left -= 1;
                debug!(%error, "emulator port not free yet, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(error) => return Err(error.into()),
        }
    }
}
