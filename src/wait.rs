//! Polling policy for every lock acquisition loop.
//!
//! No lock in this crate has a wake-up channel: a waiter sits in a
//! sleep/retry loop until the holder goes away or is proven dead. The
//! [`WaitStrategy`] decides how long to sleep between attempts, the
//! [`CancellationToken`] lets an embedder abandon a wait from another thread,
//! and a [`WaitEpisode`] tracks one continuous wait: its attempt count, its
//! one-shot stale-owner check and its long-wait log reporting.

use crate::error::{LockError, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Default delay between acquisition attempts.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_millis(500);

/// Default interval between "still waiting" log lines.
pub const DEFAULT_REPORT_EVERY: Duration = Duration::from_secs(60);

/// Plain polling settings, as read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub retry_period: Duration,
    pub report_every: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            retry_period: DEFAULT_RETRY_PERIOD,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

/// Decides how long a waiter sleeps before its next attempt.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Delay before attempt number `attempt + 1` (the first sleep is attempt 0).
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Sleep the same period between every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl WaitStrategy for FixedInterval {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Shared flag used to abandon a blocking wait from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Strategy, reporting interval and cancellation for a lock's waits.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    strategy: Arc<dyn WaitStrategy>,
    report_every: Duration,
    cancel: CancellationToken,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(WaitSettings::default())
    }
}

impl WaitPolicy {
    /// Fixed-interval polling built from plain settings.
    pub fn new(settings: WaitSettings) -> Self {
        Self {
            strategy: Arc::new(FixedInterval(settings.retry_period)),
            report_every: settings.report_every,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the sleep strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn WaitStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Attach a cancellation token; cancelling ends any wait with `Busy`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start a new wait episode.
    pub fn episode(&self, label: impl Into<String>) -> WaitEpisode<'_> {
        WaitEpisode {
            policy: self,
            attempt: 0,
            stale_checked: false,
            reporter: LongWaitReporter::new(label, self.report_every),
        }
    }
}

/// Logs a warning when a wait has gone on for longer than the interval.
#[derive(Debug)]
pub struct LongWaitReporter {
    label: String,
    every: Duration,
    last: Instant,
}

impl LongWaitReporter {
    pub fn new(label: impl Into<String>, every: Duration) -> Self {
        Self {
            label: label.into(),
            every,
            last: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Report the wait if the interval has elapsed since the last report.
    ///
    /// Returns true if a line was logged.
    pub fn been_waiting(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last) > self.every {
            self.last = now;
            warn!("{} has been waiting for {}", std::process::id(), self.label);
            return true;
        }
        false
    }
}

/// One continuous wait for a lock.
#[derive(Debug)]
pub struct WaitEpisode<'a> {
    policy: &'a WaitPolicy,
    attempt: u32,
    stale_checked: bool,
    reporter: LongWaitReporter,
}

impl WaitEpisode<'_> {
    /// Returns true exactly once per episode: the caller may run its
    /// stale-owner check now.
    pub fn take_stale_check(&mut self) -> bool {
        if self.stale_checked {
            return false;
        }
        self.stale_checked = true;
        true
    }

    /// Number of sleeps taken so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// True once the episode has slept at least once.
    pub fn waited(&self) -> bool {
        self.attempt > 0
    }

    /// Sleep before the next attempt, reporting long waits.
    ///
    /// Fails with `Busy` if the policy's token was cancelled.
    pub fn pause(&mut self) -> Result<()> {
        if self.policy.cancel.is_cancelled() {
            return Err(LockError::Busy(format!(
                "{} (cancelled)",
                self.reporter.label()
            )));
        }
        self.reporter.been_waiting();
        std::thread::sleep(self.policy.strategy.next_delay(self.attempt));
        self.attempt = self.attempt.saturating_add(1);
        Ok(())
    }
}
