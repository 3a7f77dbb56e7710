//! Bounded polling shared by every waiting loop in the engine.
//!
//! A loop is bounded by `max_attempts × interval`, never by a wall-clock
//! deadline, and every sleep races the cancellation token.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{Error, Result};

/// Polling budget: at most `max_attempts` ticks, `interval_ms` apart.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Poll {
    pub const fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on the time spent waiting, for logs.
    pub fn budget_ms(&self) -> u64 {
        self.max_attempts as u64 * self.interval_ms
    }

    /// Ticks that wait one interval before every attempt, the first included.
    /// Used after an action whose effect needs time to show.
    pub fn ticks<'a>(&self, cancel: &'a CancellationToken) -> Ticker<'a> {
        Ticker::new(*self, cancel, true)
    }

    /// Ticks whose first attempt runs immediately.
    pub fn ticks_now<'a>(&self, cancel: &'a CancellationToken) -> Ticker<'a> {
        Ticker::new(*self, cancel, false)
    }
}

impl fmt::Display for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}ms", self.max_attempts, self.interval_ms)
    }
}

/// Why a [`Ticker`] stopped yielding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Exhausted,
    Cancelled,
}

/// Iterator-like driver over a [`Poll`] budget.
///
/// ```ignore
/// let mut ticks = poll.ticks(&cancel);
/// while let Some(attempt) = ticks.next().await {
///     if check().await { break; }
/// }
/// ```
pub struct Ticker<'a> {
    poll: Poll,
    cancel: &'a CancellationToken,
    attempt: u32,
    delay_first: bool,
    stop: Option<Stop>,
}

impl<'a> Ticker<'a> {
    fn new(poll: Poll, cancel: &'a CancellationToken, delay_first: bool) -> Self {
        Self {
            poll,
            cancel,
            attempt: 0,
            delay_first,
            stop: None,
        }
    }

    /// Wait for the next attempt. Returns its 1-based number, or `None` once
    /// the budget is spent or the token fires.
    pub async fn next(&mut self) -> Option<u32> {
        if self.stop.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.stop = Some(Stop::Cancelled);
            return None;
        }
        if self.attempt >= self.poll.max_attempts {
            self.stop = Some(Stop::Exhausted);
            return None;
        }
        if self.attempt > 0 || self.delay_first {
            let cancel = self.cancel;
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop = Some(Stop::Cancelled);
                    return None;
                }
                _ = tokio::time::sleep(self.poll.interval()) => {}
            }
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn stop_reason(&self) -> Option<Stop> {
        self.stop
    }
}

/// Sleep for `ms`, returning `Error::Cancelled` if the token fires first.
pub async fn settle(ms: u64, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

/// Turn one failed step into a warning so the caller can move on to the next
/// pattern, shape or signal.
pub(crate) fn isolate<T>(context: &str, label: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} '{}' failed: {}", context, label, e);
            None
        }
    }
}
