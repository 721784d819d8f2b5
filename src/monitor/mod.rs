//! Connection monitor: probes the backend, retries with exponential
//! backoff and publishes a snapshot after each transition.
//!
//! The state lives in a single spawned task (see [`driver`]). Callers
//! read it through [`ConnectionMonitor::snapshot`] or a `watch` receiver
//! and can only submit a manual retry or dispose the monitor.

mod driver;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::probe::HealthProbe;

use driver::{Command, Driver};
pub use state::{ConnectionState, MonitorSnapshot, RetryContext};

/// Timing and budget parameters for a monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Passive polling interval while connected.
    pub poll_interval: Duration,
    /// Upper bound on a single probe, enforced by the monitor.
    pub probe_timeout: Duration,
    pub probe_on_start: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            backoff: config.retry.backoff(),
            poll_interval: config.health.poll_interval(),
            probe_timeout: config.health.timeout(),
            probe_on_start: config.health.probe_on_start,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            poll_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            probe_on_start: true,
        }
    }
}

/// Answer to a manual retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualRetry {
    /// A new epoch started and a probe is running.
    Started,
    /// A manual probe is already running; nothing was done.
    AlreadyInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The monitor was disposed; it accepts no more requests.
    Disposed,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disposed => write!(f, "connection monitor has been disposed"),
        }
    }
}

impl std::error::Error for MonitorError {}

/// Handle to a running monitor. Dropping it stops the monitor.
pub struct ConnectionMonitor {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<MonitorSnapshot>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Spawns the monitor task. Must be called from within a tokio runtime.
    pub fn start(probe: Arc<dyn HealthProbe>, settings: MonitorSettings) -> Self {
        let initial = MonitorSnapshot::capture(
            &RetryContext::new(settings.max_attempts, settings.backoff),
            None,
            0,
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let (driver, report_rx) = Driver::new(probe, settings, snapshot_tx);
        let task = tokio::spawn(driver.run(cmd_rx, report_rx, cancel.clone()));

        Self {
            cmd_tx,
            snapshot_rx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Returns a receiver notified after every transition.
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Resets the attempt counter and probes immediately.
    ///
    /// Returns [`ManualRetry::AlreadyInFlight`] without doing anything if
    /// an earlier manual retry is still waiting for its probe.
    pub async fn retry_now(&self) -> Result<ManualRetry, MonitorError> {
        if self.is_disposed() {
            return Err(MonitorError::Disposed);
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ManualRetry { reply })
            .await
            .map_err(|_| MonitorError::Disposed)?;
        rx.await.map_err(|_| MonitorError::Disposed)
    }

    /// Cancels the pending timer and in-flight probe, then waits for the
    /// monitor task to finish. Calling it again is a no-op.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
