//! Connection state machine.
//!
//! `RetryContext` holds the attempt counter and applies probe results as
//! transitions. It has no notion of time or tasks; the driver turns each
//! [`Transition`] into timers and probes.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Last probe succeeded, no retry in progress.
    Connected,
    /// A failure was observed and a retry cycle is active.
    Retrying,
    /// Retry budget exhausted. Waiting for a manual retry.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Retrying => write!(f, "retrying"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// What the driver has to do after a probe result was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Healthy while already connected; keep polling.
    StillConnected,
    /// Healthy after one or more failures.
    Recovered { after_attempts: u32 },
    /// Failure with budget left; probe again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Failure with the budget spent. Nothing is scheduled.
    Exhausted { attempts: u32 },
    /// Result arrived in a state that does not accept it.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct RetryContext {
    state: ConnectionState,
    attempt: u32,
    max_attempts: u32,
    next_delay: Option<Duration>,
    last_error: Option<String>,
    backoff: Backoff,
}

impl RetryContext {
    /// Starts connected with no failures recorded.
    ///
    /// `max_attempts` must be positive; config validation enforces it.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        debug_assert!(max_attempts > 0, "max_attempts must be positive");
        Self {
            state: ConnectionState::Connected,
            attempt: 0,
            max_attempts,
            next_delay: None,
            last_error: None,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn record_success(&mut self) -> Transition {
        match self.state {
            ConnectionState::Connected => Transition::StillConnected,
            ConnectionState::Retrying => {
                let after_attempts = self.attempt;
                self.state = ConnectionState::Connected;
                self.attempt = 0;
                self.next_delay = None;
                self.last_error = None;
                Transition::Recovered { after_attempts }
            }
            ConnectionState::Disconnected => Transition::Ignored,
        }
    }

    pub fn record_failure(&mut self, cause: impl Into<String>) -> Transition {
        match self.state {
            ConnectionState::Disconnected => Transition::Ignored,
            ConnectionState::Connected | ConnectionState::Retrying => {
                let failed = self.attempt.saturating_add(1);
                self.last_error = Some(cause.into());

                // The failure that uses up the budget disconnects right away
                if failed >= self.max_attempts {
                    self.attempt = failed;
                    self.state = ConnectionState::Disconnected;
                    self.next_delay = None;
                    return Transition::Exhausted { attempts: failed };
                }

                // Attempt n waits delay(n - 1): 1s, 2s, 4s, ...
                let delay = self.backoff.delay(self.attempt);
                self.attempt = failed;
                self.state = ConnectionState::Retrying;
                self.next_delay = Some(delay);
                Transition::Retry {
                    attempt: self.attempt,
                    delay,
                }
            }
        }
    }

    /// Clears the failure count ahead of an immediate, unscheduled probe.
    pub fn reset_for_manual_retry(&mut self) {
        self.state = ConnectionState::Retrying;
        self.attempt = 0;
        self.next_delay = Some(Duration::ZERO);
    }
}

/// Point-in-time copy of the monitor state, published after every
/// transition.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub state: ConnectionState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_delay: Option<Duration>,
    /// When the scheduled retry fires. `None` unless retrying.
    pub next_retry_at: Option<Instant>,
    pub last_error: Option<String>,
    pub epoch: u64,
    /// Set once the monitor has been disposed.
    pub disposed: bool,
}

impl MonitorSnapshot {
    pub fn capture(ctx: &RetryContext, next_retry_at: Option<Instant>, epoch: u64) -> Self {
        Self {
            state: ctx.state(),
            attempt: ctx.attempt(),
            max_attempts: ctx.max_attempts(),
            next_delay: ctx.next_delay(),
            next_retry_at: next_retry_at.filter(|_| ctx.state() == ConnectionState::Retrying),
            last_error: ctx.last_error().map(str::to_string),
            epoch,
            disposed: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_retrying(&self) -> bool {
        self.state == ConnectionState::Retrying
    }

    /// Time left before the next retry, measured from `now`.
    pub fn next_retry_in(&self, now: Instant) -> Option<Duration> {
        if !self.is_retrying() {
            return None;
        }
        match self.next_retry_at {
            Some(at) => Some(at.saturating_duration_since(now)),
            // Probe already running
            None => Some(Duration::ZERO),
        }
    }

    /// Serializable view for status consumers.
    pub fn view(&self, now: Instant) -> StatusView {
        StatusView {
            state: self.state,
            is_connected: self.is_connected(),
            is_retrying: self.is_retrying(),
            retry_count: self.attempt,
            max_retries: self.max_attempts,
            next_retry_in_ms: self.next_retry_in(now).map(as_millis),
            retry_delay_ms: self.next_delay.map(as_millis),
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_retrying: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_in_ms: Option<u64>,
    /// Full backoff delay of the current attempt, for progress display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RetryContext {
        RetryContext::new(3, Backoff::default())
    }

    #[test]
    fn test_initial_state() {
        let c = ctx();
        assert_eq!(c.state(), ConnectionState::Connected);
        assert_eq!(c.attempt(), 0);
        assert_eq!(c.max_attempts(), 3);
        assert!(c.next_delay().is_none());
        assert!(c.last_error().is_none());
    }

    #[test]
    fn test_success_while_connected_is_noop() {
        let mut c = ctx();
        assert_eq!(c.record_success(), Transition::StillConnected);
        assert_eq!(c.state(), ConnectionState::Connected);
        assert_eq!(c.attempt(), 0);
    }

    #[test]
    fn test_failure_sequence_until_exhausted() {
        let mut c = ctx();

        assert_eq!(
            c.record_failure("refused"),
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(c.state(), ConnectionState::Retrying);
        assert_eq!(c.next_delay(), Some(Duration::from_millis(1000)));

        assert_eq!(
            c.record_failure("refused"),
            Transition::Retry {
                attempt: 2,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(c.state(), ConnectionState::Retrying);
        assert_eq!(c.attempt(), 2);

        // Third consecutive failure uses up the budget of 3
        assert_eq!(
            c.record_failure("503"),
            Transition::Exhausted { attempts: 3 }
        );
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.attempt(), 3);
        assert!(c.next_delay().is_none());
        assert_eq!(c.last_error(), Some("503"));
    }

    #[test]
    fn test_never_retrying_at_full_budget() {
        for max_attempts in 1..=5 {
            let mut c = RetryContext::new(max_attempts, Backoff::default());
            let mut failures = 0;
            while c.state() != ConnectionState::Disconnected {
                c.record_failure("down");
                failures += 1;
                if c.state() == ConnectionState::Retrying {
                    assert!(c.attempt() < max_attempts, "max {max_attempts}");
                }
            }
            assert_eq!(failures, max_attempts, "max {max_attempts}");
            assert_eq!(c.attempt(), max_attempts);
        }
    }

    #[test]
    fn test_failure_after_exhaustion_has_no_effect() {
        let mut c = ctx();
        for _ in 0..3 {
            c.record_failure("down");
        }
        assert_eq!(c.state(), ConnectionState::Disconnected);

        assert_eq!(c.record_failure("still down"), Transition::Ignored);
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.attempt(), 3);
        assert_eq!(c.last_error(), Some("down"));
    }

    #[test]
    fn test_success_while_retrying_resets() {
        for failures in 1..=2 {
            let mut c = ctx();
            for _ in 0..failures {
                c.record_failure("down");
            }
            assert_eq!(
                c.record_success(),
                Transition::Recovered {
                    after_attempts: failures
                }
            );
            assert_eq!(c.state(), ConnectionState::Connected);
            assert_eq!(c.attempt(), 0);
            assert!(c.next_delay().is_none());
            assert!(c.last_error().is_none());
        }
    }

    #[test]
    fn test_success_while_disconnected_is_ignored() {
        let mut c = ctx();
        for _ in 0..3 {
            c.record_failure("down");
        }
        assert_eq!(c.record_success(), Transition::Ignored);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_manual_retry_resets_attempts() {
        let mut c = ctx();
        for _ in 0..3 {
            c.record_failure("down");
        }

        c.reset_for_manual_retry();
        assert_eq!(c.state(), ConnectionState::Retrying);
        assert_eq!(c.attempt(), 0);
        assert_eq!(c.next_delay(), Some(Duration::ZERO));
        // Cause stays visible until a probe succeeds
        assert_eq!(c.last_error(), Some("down"));

        // A failed manual probe re-enters the cycle as attempt 1
        assert_eq!(
            c.record_failure("down"),
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_max_attempts_one() {
        let mut c = RetryContext::new(1, Backoff::default());
        assert_eq!(c.record_failure("x"), Transition::Exhausted { attempts: 1 });
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.record_failure("x"), Transition::Ignored);
    }

    // ── snapshot tests ──────────────────────────────────

    #[test]
    fn test_snapshot_next_delay_only_while_retrying() {
        let mut c = ctx();
        let now = Instant::now();

        let snap = MonitorSnapshot::capture(&c, Some(now), 0);
        assert!(snap.is_connected());
        assert!(snap.next_delay.is_none());
        assert!(snap.next_retry_at.is_none());
        assert!(snap.next_retry_in(now).is_none());

        c.record_failure("down");
        let at = now + Duration::from_millis(1000);
        let snap = MonitorSnapshot::capture(&c, Some(at), 0);
        assert!(snap.is_retrying());
        assert_eq!(snap.next_retry_in(now), Some(Duration::from_millis(1000)));
        assert_eq!(
            snap.next_retry_in(now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
        assert_eq!(
            snap.next_retry_in(now + Duration::from_secs(5)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let mut c = ctx();
        c.record_failure("connection refused");
        let now = Instant::now();
        let snap = MonitorSnapshot::capture(&c, Some(now + Duration::from_millis(1000)), 2);

        let json = serde_json::to_value(snap.view(now)).unwrap();
        assert_eq!(json["state"], "retrying");
        assert_eq!(json["isConnected"], false);
        assert_eq!(json["isRetrying"], true);
        assert_eq!(json["retryCount"], 1);
        assert_eq!(json["maxRetries"], 3);
        assert_eq!(json["nextRetryInMs"], 1000);
        assert_eq!(json["retryDelayMs"], 1000);
        assert_eq!(json["lastError"], "connection refused");
    }

    #[test]
    fn test_view_omits_absent_fields() {
        let c = ctx();
        let now = Instant::now();
        let json = serde_json::to_value(MonitorSnapshot::capture(&c, None, 0).view(now)).unwrap();
        assert!(json.get("nextRetryInMs").is_none());
        assert!(json.get("lastError").is_none());
        assert!(json.get("retryDelayMs").is_none());
        assert_eq!(json["isConnected"], true);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Retrying.to_string(), "retrying");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
