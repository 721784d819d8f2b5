//! Console status output.
//!
//! Subscribes to monitor snapshots and prints what a user needs to see:
//! nothing while connected, a countdown while retrying, and a persistent
//! call to action once disconnected.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::StatusFormat;
use crate::monitor::{ConnectionState, MonitorSnapshot};

/// How often the countdown line is refreshed while retrying.
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Formats the user-facing status line for a snapshot.
///
/// Returns `None` while connected: a healthy connection shows nothing.
pub fn describe(snapshot: &MonitorSnapshot, now: Instant) -> Option<String> {
    match snapshot.state {
        ConnectionState::Connected => None,
        ConnectionState::Retrying => {
            let remaining = snapshot.next_retry_in(now).unwrap_or_default();
            let progress = if snapshot.attempt == 0 {
                "manual retry".to_string()
            } else {
                format!("attempt {}/{}", snapshot.attempt, snapshot.max_attempts)
            };
            if remaining.is_zero() {
                Some(format!("Connection lost. Checking now... ({progress})"))
            } else {
                Some(format!(
                    "Connection lost. Retrying in {}s ({progress})",
                    remaining.as_secs_f64().ceil() as u64
                ))
            }
        }
        ConnectionState::Disconnected => Some(format!(
            "Unable to reach the backend after {} attempts: {}. Type 'r' to retry.",
            snapshot.attempt,
            snapshot.last_error.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// Renders one snapshot in the configured format.
///
/// Text output returns `None` when there is nothing to show; JSON output
/// always returns the serialized view.
pub fn render(snapshot: &MonitorSnapshot, format: StatusFormat, now: Instant) -> Option<String> {
    match format {
        StatusFormat::Text => describe(snapshot, now),
        StatusFormat::Json => match serde_json::to_string(&snapshot.view(now)) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to serialize status: {e}");
                None
            }
        },
    }
}

/// Prints status updates until `cancel` fires or the monitor goes away.
pub async fn run(
    mut snapshots: watch::Receiver<MonitorSnapshot>,
    format: StatusFormat,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(COUNTDOWN_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous = snapshots.borrow_and_update().state;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.disposed {
                    break;
                }
                let restored = format == StatusFormat::Text
                    && snapshot.is_connected()
                    && previous != ConnectionState::Connected;
                let line = if restored {
                    Some("Connection restored.".to_string())
                } else {
                    render(&snapshot, format, Instant::now())
                };
                if let Some(line) = line {
                    emit(format, &line);
                }
                previous = snapshot.state;
            }
            _ = tick.tick() => {
                let snapshot = snapshots.borrow().clone();
                if snapshot.is_retrying() {
                    if let Some(line) = render(&snapshot, format, Instant::now()) {
                        emit(format, &line);
                    }
                }
            }
        }
    }
}

fn emit(format: StatusFormat, line: &str) {
    match format {
        StatusFormat::Text => println!("[{}] {line}", chrono::Local::now().format("%H:%M:%S")),
        StatusFormat::Json => println!("{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backoff::Backoff;
    use crate::monitor::RetryContext;

    fn snapshot_after_failures(failures: u32, next_retry_at: Option<Instant>) -> MonitorSnapshot {
        let mut ctx = RetryContext::new(3, Backoff::default());
        for _ in 0..failures {
            ctx.record_failure("connection refused");
        }
        MonitorSnapshot::capture(&ctx, next_retry_at, 0)
    }

    #[test]
    fn test_connected_shows_nothing() {
        let now = Instant::now();
        let snap = snapshot_after_failures(0, None);
        assert!(describe(&snap, now).is_none());
    }

    #[test]
    fn test_retrying_shows_countdown() {
        let now = Instant::now();
        let snap = snapshot_after_failures(2, Some(now + Duration::from_millis(2000)));
        assert_eq!(
            describe(&snap, now).unwrap(),
            "Connection lost. Retrying in 2s (attempt 2/3)"
        );
        // Partial seconds round up
        assert_eq!(
            describe(&snap, now + Duration::from_millis(700)).unwrap(),
            "Connection lost. Retrying in 2s (attempt 2/3)"
        );
        assert_eq!(
            describe(&snap, now + Duration::from_millis(1500)).unwrap(),
            "Connection lost. Retrying in 1s (attempt 2/3)"
        );
    }

    #[test]
    fn test_retrying_with_probe_running() {
        let now = Instant::now();
        let snap = snapshot_after_failures(1, None);
        assert_eq!(
            describe(&snap, now).unwrap(),
            "Connection lost. Checking now... (attempt 1/3)"
        );
    }

    #[test]
    fn test_manual_retry_line() {
        let now = Instant::now();
        let mut ctx = RetryContext::new(3, Backoff::default());
        ctx.record_failure("x");
        ctx.reset_for_manual_retry();
        let snap = MonitorSnapshot::capture(&ctx, None, 1);
        assert_eq!(
            describe(&snap, now).unwrap(),
            "Connection lost. Checking now... (manual retry)"
        );
    }

    #[test]
    fn test_disconnected_is_actionable() {
        let now = Instant::now();
        let snap = snapshot_after_failures(3, None);
        assert_eq!(snap.state, ConnectionState::Disconnected);
        let line = describe(&snap, now).unwrap();
        // Count matches the failed checks that were actually made
        assert!(line.contains("after 3 attempts"), "{line}");
        assert!(line.contains("connection refused"));
        assert!(line.contains("'r'"));
    }

    #[test]
    fn test_render_json() {
        let now = Instant::now();
        let snap = snapshot_after_failures(0, None);
        let json = render(&snap, StatusFormat::Json, now).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["isConnected"], true);
        assert_eq!(value["retryCount"], 0);
    }

    #[test]
    fn test_render_text_connected_is_none() {
        let snap = snapshot_after_failures(0, None);
        assert!(render(&snap, StatusFormat::Text, Instant::now()).is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let snap = snapshot_after_failures(0, None);
        let (_tx, rx) = watch::channel(snap);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(rx, StatusFormat::Text, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test]
    async fn test_run_stops_when_monitor_disposed() {
        let snap = snapshot_after_failures(0, None);
        let (tx, rx) = watch::channel(snap.clone());
        let handle = tokio::spawn(run(rx, StatusFormat::Json, CancellationToken::new()));

        let mut disposed = snap;
        disposed.disposed = true;
        tx.send_replace(disposed);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
