//! Test fixtures: a one-shot gate for holding tasks open, and log setup.

use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Holds a task or handler open until the paired [`GateOpener`] fires.
#[derive(Debug)]
pub struct Gate {
    rx: oneshot::Receiver<()>,
}

/// Releases the paired [`Gate`].
#[derive(Debug)]
pub struct GateOpener {
    tx: oneshot::Sender<()>,
}

impl Gate {
    /// Creates a closed gate and its opener.
    #[must_use]
    pub fn new() -> (GateOpener, Self) {
        let (tx, rx) = oneshot::channel();
        (GateOpener { tx }, Self { rx })
    }

    /// Waits until the gate is opened or its opener is dropped.
    pub async fn pass(self) {
        let _ = self.rx.await;
    }
}

impl GateOpener {
    /// Opens the gate.
    pub fn open(self) {
        let _ = self.tx.send(());
    }
}

/// Installs a test-friendly `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
