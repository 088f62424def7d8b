//! Cancellation-aware work sequencing.
//!
//! Jobs consume their record-level work through [`WorkUnits`], which checks a
//! [`CancellationToken`] before yielding each unit. Once the token fires the
//! sequence yields a single `Err(Cancelled)` and then ends. Units already
//! handed out are never revoked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// WorkUnits
// ---------------------------------------------------------------------------

/// Iterator adapter that stops handing out units once cancelled.
pub struct WorkUnits<I> {
    inner: I,
    token: CancellationToken,
    yielded: usize,
    done: bool,
}

impl<I: Iterator> WorkUnits<I> {
    pub fn new(inner: I, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            yielded: 0,
            done: false,
        }
    }

    /// Number of units handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }
}

impl<I: Iterator> Iterator for WorkUnits<I> {
    type Item = Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.token.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled(format!(
                "stopped after {} unit(s)",
                self.yielded
            ))));
        }
        match self.inner.next() {
            Some(item) => {
                self.yielded += 1;
                Some(Ok(item))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Extension for wrapping any iterable in [`WorkUnits`].
pub trait WorkUnitsExt: IntoIterator + Sized {
    fn units(self, token: &CancellationToken) -> WorkUnits<Self::IntoIter> {
        WorkUnits::new(self.into_iter(), token.clone())
    }
}

impl<T: IntoIterator> WorkUnitsExt for T {}

/// Sleep for `duration` unless `token` fires first.
pub async fn throttle(token: &CancellationToken, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled("cancelled during throttle pause".into())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// JobDeadline
// ---------------------------------------------------------------------------

/// A cancellation token that fires when its parent fires or the ceiling
/// elapses, whichever comes first.
pub struct JobDeadline {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
    expires_at: Instant,
}

impl JobDeadline {
    /// Derive a deadline from `parent`. The timer task exits as soon as the
    /// child token is cancelled for any reason.
    pub fn start(parent: &CancellationToken, ceiling: Duration) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let expires_at = Instant::now() + ceiling;

        let timer_token = token.clone();
        let timer_expired = expired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep_until(expires_at) => {
                    timer_expired.store(true, Ordering::SeqCst);
                    timer_token.cancel();
                }
            }
        });

        Self {
            token,
            expired,
            expires_at,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Human-readable reason for a cancellation observed on this token.
    pub fn cancel_reason(&self) -> &'static str {
        if self.is_expired() {
            "job deadline exceeded"
        } else {
            "job cancelled"
        }
    }

    /// Stop the timer without reporting expiry.
    pub fn release(&self) {
        self.token.cancel();
    }
}

impl Drop for JobDeadline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
