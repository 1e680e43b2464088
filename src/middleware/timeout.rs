//! Per-method timeouts and the handler/timer race.
//!
//! Every call gets a timer whose duration comes from the [`TimeoutPolicy`].
//! Timers are tokio tasks registered in a pending registry; the registry is a
//! `tokio::sync::Mutex`, so registration, cancellation, firing and clearing
//! are totally ordered and waiters are served in FIFO order. The guard is
//! scoped, so the lock is released on every path.
//!
//! # Race semantics
//!
//! ```text
//! with_timeout(op, method)
//!   ├── op settles first    → cancel timer (removed from registry) → op's result
//!   └── timer fires first   → timer removes itself, counts, signals  → Timeout error
//!                             (op is dropped, its outcome is never reported)
//! ```
//!
//! A timer only counts and signals if it is still in the registry and its
//! token is not cancelled when it takes the lock. A timer cancelled while its
//! sleep was completing exits silently.
//!
//! If the caller drops the `with_timeout` future before either side settles,
//! a drop guard cancels the timer's token and the timer task unregisters
//! itself without counting a timeout.
//!
//! Timers run on tokio's clock, so tests drive them with a paused runtime
//! (`start_paused = true`) and `tokio::time::advance` instead of real delays.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{MiddlewareError, MiddlewareResult};
use crate::metrics;

/// Timeout applied to methods without an override (30 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Hard ceiling for any method's timeout (2 minutes).
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// Built-in per-method timeouts, in milliseconds.
pub const DEFAULT_METHOD_TIMEOUTS_MS: [(&str, u64); 8] = [
    ("tools/call", 60_000),
    ("sampling/create", 90_000),
    ("resources/read", 10_000),
    ("resources/list", 5_000),
    ("tools/list", 5_000),
    ("prompts/list", 5_000),
    ("prompts/get", 10_000),
    ("roots/list", 5_000),
];

/// Timeout durations: a default, a ceiling and per-method overrides.
///
/// The effective timeout for a method is `min(override or default, maximum)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub maximum: Duration,
    pub overrides: HashMap<String, Duration>,
}

impl TimeoutPolicy {
    /// A policy with no per-method overrides.
    pub fn new(default: Duration, maximum: Duration) -> Self {
        Self {
            default,
            maximum,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.overrides.insert(method.into(), timeout);
        self
    }

    pub fn effective(&self, method: &str) -> Duration {
        self.overrides
            .get(method)
            .copied()
            .unwrap_or(self.default)
            .min(self.maximum)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        DEFAULT_METHOD_TIMEOUTS_MS.iter().fold(
            Self::new(
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
                Duration::from_millis(MAX_TIMEOUT_MS),
            ),
            |policy, (method, ms)| policy.with_override(*method, Duration::from_millis(*ms)),
        )
    }
}

/// Snapshot of timeout counters and the active policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeoutStats {
    pub total_timeouts: u64,
    pub pending_timeouts: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub method_overrides: usize,
}

/// A registered timer. Cancelling its token stops the sleeping task.
struct PendingTimeout {
    method: String,
    cancel: CancellationToken,
}

/// State shared between the manager and its timer tasks.
struct TimerRegistry {
    pending: Mutex<HashMap<u64, PendingTimeout>>,
    fired: AtomicU64,
}

impl TimerRegistry {
    async fn fire(
        &self,
        id: u64,
        method: String,
        duration: Duration,
        cancel: &CancellationToken,
        expired: oneshot::Sender<MiddlewareError>,
    ) {
        let still_pending = {
            let mut pending = self.pending.lock().await;
            let removed = pending.remove(&id).is_some() && !cancel.is_cancelled();
            if removed {
                self.fired.fetch_add(1, Ordering::SeqCst);
            }
            metrics::set_pending_timeouts(pending.len());
            removed
        };

        if !still_pending {
            debug!(timer_id = id, method = %method, "Timer cancelled while firing");
            return;
        }

        let timeout_ms = duration_ms(duration);
        warn!(timer_id = id, method = %method, timeout_ms, "Request timed out");
        metrics::record_timeout(&method);

        // The waiting side may already be gone; nothing else to notify.
        let _ = expired.send(MiddlewareError::Timeout { method, timeout_ms });
    }

    /// Unregister a timer whose token was cancelled. No-op if it is gone.
    async fn discard(&self, id: u64) {
        let mut pending = self.pending.lock().await;
        if pending.remove(&id).is_some() {
            debug!(timer_id = id, "Timer abandoned by its caller");
        }
        metrics::set_pending_timeouts(pending.len());
    }
}

/// Handle to a timer created by [`TimeoutManager::create_timeout`].
#[derive(Debug)]
pub struct TimeoutHandle {
    id: u64,
    duration: Duration,
    cancel: CancellationToken,
    expired: oneshot::Receiver<MiddlewareError>,
}

impl TimeoutHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Resolves with the timeout error when the timer fires.
    ///
    /// Never resolves for a timer that was cancelled.
    pub async fn expired(&mut self) -> MiddlewareError {
        match (&mut self.expired).await {
            Ok(err) => err,
            Err(_) => std::future::pending().await,
        }
    }
}

/// Computes per-method timeouts and races operations against them.
pub struct TimeoutManager {
    policy: RwLock<Arc<TimeoutPolicy>>,
    registry: Arc<TimerRegistry>,
    next_id: AtomicU64,
    tracker: TaskTracker,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutPolicy::default())
    }
}

impl TimeoutManager {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            registry: Arc::new(TimerRegistry {
                pending: Mutex::new(HashMap::new()),
                fired: AtomicU64::new(0),
            }),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> Arc<TimeoutPolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the whole policy. Timers already running keep their duration.
    pub fn update_policy(&self, policy: TimeoutPolicy) {
        info!(
            default_ms = duration_ms(policy.default),
            max_ms = duration_ms(policy.maximum),
            overrides = policy.overrides.len(),
            "Timeout policy updated"
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    pub fn effective_timeout(&self, method: &str) -> Duration {
        self.policy().effective(method)
    }

    pub fn effective_timeout_ms(&self, method: &str) -> u64 {
        duration_ms(self.effective_timeout(method))
    }

    /// Register a timer for `method` and start it.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn create_timeout(&self, method: &str) -> TimeoutHandle {
        let duration = self.effective_timeout(method);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let handle_cancel = cancel.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.registry.pending.lock().await;
            pending.insert(
                id,
                PendingTimeout {
                    method: method.to_string(),
                    cancel: cancel.clone(),
                },
            );
            metrics::set_pending_timeouts(pending.len());
        }
        debug!(timer_id = id, method, timeout_ms = duration_ms(duration), "Timer registered");

        let registry = Arc::clone(&self.registry);
        let method = method.to_string();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => registry.discard(id).await,
                _ = tokio::time::sleep(duration) => {
                    registry.fire(id, method, duration, &cancel, tx).await;
                }
            }
        });

        TimeoutHandle {
            id,
            duration,
            cancel: handle_cancel,
            expired: rx,
        }
    }

    /// Remove a timer and stop it. Returns `false` if it already fired or was
    /// cancelled.
    pub async fn cancel_timeout(&self, id: u64) -> bool {
        let mut pending = self.registry.pending.lock().await;
        let removed = pending.remove(&id);
        metrics::set_pending_timeouts(pending.len());
        drop(pending);

        match removed {
            Some(timer) => {
                timer.cancel.cancel();
                debug!(timer_id = id, method = %timer.method, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Race `operation` against the timer for `method`.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or `MiddlewareError::Timeout` if the
    /// timer fires first. In the latter case the operation is dropped.
    ///
    /// Dropping the returned future stops and unregisters the timer.
    pub async fn with_timeout<F, T>(&self, method: &str, operation: F) -> MiddlewareResult<T>
    where
        F: Future<Output = MiddlewareResult<T>>,
    {
        let mut timer = self.create_timeout(method).await;
        let id = timer.id();
        let _stop_timer = timer.cancel.clone().drop_guard();

        tokio::select! {
            result = operation => {
                self.cancel_timeout(id).await;
                result
            }
            err = timer.expired() => Err(err),
        }
    }

    /// Cancel every pending timer. Returns how many were cleared.
    pub async fn clear_all_timeouts(&self) -> usize {
        let mut pending = self.registry.pending.lock().await;
        let count = pending.len();
        for (_, timer) in pending.drain() {
            timer.cancel.cancel();
        }
        metrics::set_pending_timeouts(0);
        drop(pending);

        info!(cleared = count, "Cleared all pending timeouts");
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.registry.pending.lock().await.len()
    }

    pub async fn stats(&self) -> TimeoutStats {
        let policy = self.policy();
        TimeoutStats {
            total_timeouts: self.registry.fired.load(Ordering::SeqCst),
            pending_timeouts: self.pending_count().await,
            default_timeout_ms: duration_ms(policy.default),
            max_timeout_ms: duration_ms(policy.maximum),
            method_overrides: policy.overrides.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.registry.fired.store(0, Ordering::SeqCst);
    }

    /// Clear every timer and wait for the timer tasks to finish.
    pub async fn shutdown(&self) {
        self.clear_all_timeouts().await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
