//! The monitor task.
//!
//! Owns the `RetryContext`, the single retry/poll timer and the single
//! in-flight probe. Every input (disposal, manual retry, probe report,
//! timer) is handled in one `select!` loop, so transitions apply one at a
//! time in arrival order.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{MonitorSnapshot, RetryContext, Transition};
use super::{ManualRetry, MonitorSettings};
use crate::probe::{HealthProbe, ProbeOutcome};

pub(crate) enum Command {
    ManualRetry { reply: oneshot::Sender<ManualRetry> },
}

/// Probe result tagged with the epoch it was launched in.
#[derive(Debug)]
pub(crate) struct ProbeReport {
    pub(crate) epoch: u64,
    pub(crate) outcome: ProbeOutcome,
}

struct InFlight {
    epoch: u64,
    /// Launched by a manual retry rather than the schedule.
    manual: bool,
    handle: JoinHandle<()>,
}

pub(crate) struct Driver {
    probe: Arc<dyn HealthProbe>,
    settings: MonitorSettings,
    ctx: RetryContext,
    /// Bumped on manual retry and disposal. Reports from older epochs are dropped.
    epoch: u64,
    /// Next scheduled probe: the poll tick while connected, the backoff
    /// deadline while retrying.
    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    report_tx: mpsc::Sender<ProbeReport>,
    snapshot_tx: watch::Sender<MonitorSnapshot>,
}

impl Driver {
    pub(crate) fn new(
        probe: Arc<dyn HealthProbe>,
        settings: MonitorSettings,
        snapshot_tx: watch::Sender<MonitorSnapshot>,
    ) -> (Self, mpsc::Receiver<ProbeReport>) {
        let (report_tx, report_rx) = mpsc::channel(4);
        let ctx = RetryContext::new(settings.max_attempts, settings.backoff);
        let driver = Self {
            probe,
            settings,
            ctx,
            epoch: 0,
            deadline: None,
            in_flight: None,
            report_tx,
            snapshot_tx,
        };
        (driver, report_rx)
    }

    /// Runs until `cancel` fires or every command sender is dropped.
    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut report_rx: mpsc::Receiver<ProbeReport>,
        cancel: CancellationToken,
    ) {
        info!(
            "Monitoring {} (poll every {}s, up to {} retries)",
            self.probe.target(),
            self.settings.poll_interval.as_secs(),
            self.settings.max_attempts
        );

        if self.settings.probe_on_start {
            self.launch_probe(false);
        } else {
            self.deadline = Some(Instant::now() + self.settings.poll_interval);
        }
        self.publish();

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::ManualRetry { reply }) => {
                        let result = self.manual_retry();
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                Some(report) = report_rx.recv() => self.apply(report),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.launch_probe(false);
                    self.publish();
                }
            }
        }

        self.shutdown();
    }

    /// Spawns one probe in the current epoch, aborting any previous one.
    fn launch_probe(&mut self, manual: bool) {
        if let Some(previous) = self.in_flight.take() {
            previous.handle.abort();
        }

        let epoch = self.epoch;
        let probe = Arc::clone(&self.probe);
        let report_tx = self.report_tx.clone();
        let timeout = self.settings.probe_timeout;

        let handle = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, probe.probe()).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::Unhealthy(format!(
                    "health check timed out after {}ms",
                    timeout.as_millis()
                )),
            };
            debug!(
                "Probe finished (epoch {epoch}, healthy: {})",
                outcome.is_healthy()
            );
            let _ = report_tx.send(ProbeReport { epoch, outcome }).await;
        });

        debug!("Probe launched (epoch {epoch}, manual: {manual})");
        self.in_flight = Some(InFlight {
            epoch,
            manual,
            handle,
        });
    }

    fn apply(&mut self, report: ProbeReport) {
        if report.epoch != self.epoch {
            debug!(
                "Discarding stale probe result from epoch {} (current {})",
                report.epoch, self.epoch
            );
            return;
        }
        self.in_flight = None;

        let transition = match report.outcome {
            ProbeOutcome::Healthy => self.ctx.record_success(),
            ProbeOutcome::Unhealthy(cause) => self.ctx.record_failure(cause),
        };

        let now = Instant::now();
        let cause = self.ctx.last_error().unwrap_or("unknown error");
        match transition {
            Transition::StillConnected => {
                debug!("Health check passed");
                self.deadline = Some(now + self.settings.poll_interval);
            }
            Transition::Recovered { after_attempts } => {
                info!("Connection restored after {after_attempts} retry attempt(s)");
                self.deadline = Some(now + self.settings.poll_interval);
            }
            Transition::Retry { attempt, delay } => {
                warn!(
                    "Health check failed: {cause}. Retrying in {}ms (attempt {attempt}/{})",
                    delay.as_millis(),
                    self.ctx.max_attempts()
                );
                self.deadline = Some(now + delay);
            }
            Transition::Exhausted { attempts } => {
                error!(
                    "Backend unreachable after {attempts} retries ({cause}), waiting for manual retry"
                );
                self.deadline = None;
            }
            Transition::Ignored => {
                debug!("Probe result ignored in state {}", self.ctx.state());
                self.deadline = None;
            }
        }

        self.publish();
    }

    fn manual_retry(&mut self) -> ManualRetry {
        let duplicate = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.manual && f.epoch == self.epoch);
        if duplicate {
            debug!("Manual retry already in flight, ignoring");
            return ManualRetry::AlreadyInFlight;
        }

        self.epoch += 1;
        self.deadline = None;
        if let Some(previous) = self.in_flight.take() {
            debug!("Superseding probe from epoch {}", previous.epoch);
            previous.handle.abort();
        }

        self.ctx.reset_for_manual_retry();
        info!("Manual retry requested, checking {} now", self.probe.target());
        self.launch_probe(true);
        self.publish();
        ManualRetry::Started
    }

    fn shutdown(&mut self) {
        self.epoch += 1;
        self.deadline = None;
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }

        let mut snapshot = MonitorSnapshot::capture(&self.ctx, None, self.epoch);
        snapshot.disposed = true;
        self.snapshot_tx.send_replace(snapshot);
        info!("Connection monitor stopped");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(MonitorSnapshot::capture(
            &self.ctx,
            self.deadline,
            self.epoch,
        ));
    }
}
