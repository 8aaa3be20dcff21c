//! Readiness handshake between the host and the presentation side
//!
//! The host wires capabilities, registers and activates extensions, then
//! signals readiness with the presentation bundles to load. The presentation
//! loader waits for that signal with a bounded timeout; on timeout it logs a
//! warning and proceeds with a fallback list instead of hanging.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// A presentation bundle to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationEntry {
    pub id: String,
    pub version: String,
    pub bundle: PathBuf,
}

/// Payload carried by the ready signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub entries: Vec<PresentationEntry>,
    pub signalled_at: DateTime<Utc>,
}

/// Result of waiting for readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(Arc<ReadyPayload>),
    TimedOut,
    /// The host side went away without signalling
    Closed,
}

/// Host side of the handshake
#[derive(Debug)]
pub struct ReadinessSignal {
    tx: watch::Sender<Option<Arc<ReadyPayload>>>,
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish readiness; later waiters see it immediately
    pub fn signal_ready(&self, entries: Vec<PresentationEntry>) {
        let payload = Arc::new(ReadyPayload {
            entries,
            signalled_at: Utc::now(),
        });
        info!(bundles = payload.entries.len(), "Host signalled readiness");
        self.tx.send_replace(Some(payload));
    }

    /// Withdraw readiness (e.g. while reloading)
    pub fn reset(&self) {
        self.tx.send_replace(None);
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn waiter(&self) -> ReadinessWaiter {
        ReadinessWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

/// Presentation side of the handshake
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    rx: watch::Receiver<Option<Arc<ReadyPayload>>>,
}

impl ReadinessWaiter {
    pub async fn wait(&mut self, timeout: Duration) -> Readiness {
        match tokio::time::timeout(timeout, self.rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => match &*value {
                Some(payload) => Readiness::Ready(Arc::clone(payload)),
                None => Readiness::Closed,
            },
            Ok(Err(_)) => Readiness::Closed,
            Err(_) => Readiness::TimedOut,
        }
    }
}

/// Loads one presentation bundle in the presentation process
#[async_trait]
pub trait PresentationBundleLoader: Send + Sync {
    async fn load_bundle(&self, entry: &PresentationEntry) -> anyhow::Result<()>;
}

/// What the presentation loader did
#[derive(Debug, Default)]
pub struct PresentationReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// The ready signal was missed and the fallback list was used
    pub degraded: bool,
}

/// Waits for the host, then loads presentation bundles
pub struct PresentationLoader {
    waiter: ReadinessWaiter,
    timeout: Duration,
    loader: Arc<dyn PresentationBundleLoader>,
}

impl PresentationLoader {
    pub fn new(
        waiter: ReadinessWaiter,
        timeout: Duration,
        loader: Arc<dyn PresentationBundleLoader>,
    ) -> Self {
        Self {
            waiter,
            timeout,
            loader,
        }
    }

    /// Wait for readiness and load every bundle
    ///
    /// `fallback` is used when the signal does not arrive in time. A bundle
    /// that fails to load is recorded and the rest continue.
    pub async fn run(&mut self, fallback: Vec<PresentationEntry>) -> PresentationReport {
        let mut report = PresentationReport::default();
        let entries = match self.waiter.wait(self.timeout).await {
            Readiness::Ready(payload) => payload.entries.clone(),
            Readiness::TimedOut => {
                warn!(
                    timeout = ?self.timeout,
                    "Host readiness not signalled in time; loading presentation bundles anyway"
                );
                report.degraded = true;
                fallback
            }
            Readiness::Closed => {
                warn!("Host closed before signalling readiness; loading presentation bundles anyway");
                report.degraded = true;
                fallback
            }
        };

        for entry in entries {
            match self.loader.load_bundle(&entry).await {
                Ok(()) => report.loaded.push(entry.id),
                Err(e) => {
                    warn!(extension = %entry.id, "Failed to load presentation bundle: {:#}", e);
                    report.failed.push((entry.id, format!("{e:#}")));
                }
            }
        }
        report
    }
}
