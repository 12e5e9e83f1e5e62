use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal — cooperative shutdown coordination
// ---------------------------------------------------------------------------

/// Broadcast-based shutdown coordinator.
///
/// The content/callback worker pools register
/// interest in shutdown by calling `subscribe()`, then `select!` on the
/// returned receiver alongside their queue-pop loop, so `Stop` can close the
/// queues and wait for in-flight work to drain instead of dropping it.
///
/// The orchestrator triggers shutdown by calling `trigger()`, which:
/// 1. Sets the `is_shutting_down` flag (atomically)
/// 2. Broadcasts a signal to all subscribers
/// 3. Optionally waits for all components to confirm drain
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
/// let mut rx = shutdown.subscribe();
///
/// tokio::select! {
///     _ = rx.recv() => { /* graceful cleanup */ }
///     _ = do_work() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    /// Broadcast sender — triggers shutdown for all subscribers.
    trigger: broadcast::Sender<()>,
    /// Atomic flag for cheap polling.
    shutting_down: Arc<AtomicBool>,
    /// Watch channel for drain confirmation.
    drain_tx: Arc<watch::Sender<usize>>,
    drain_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        let (drain_tx, drain_rx) = watch::channel(0);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
            drain_tx: Arc::new(drain_tx),
            drain_rx,
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Trigger shutdown for all subscribers.
    pub fn trigger(&self) {
        self.trigger_for("no reason given");
    }

    /// Same as [`trigger`](Self::trigger), but logs `reason` — used when the
    /// caller knows why it's shutting down (SIGTERM, a failed health check,
    /// an admin command) and that's worth keeping in the log line.
    pub fn trigger_for(&self, reason: &str) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!(reason, "shutdown signal triggered");
            let _ = self.trigger.send(());
        } else {
            warn!(reason, "shutdown already triggered");
        }
    }

    /// Notify that a component has finished draining.
    pub fn confirm_drained(&self) {
        self.drain_tx.send_modify(|count| *count += 1);
    }

    /// Wait for `expected` components to confirm drain, with a timeout.
    pub async fn wait_for_drain(&mut self, expected: usize, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let current = *self.drain_rx.borrow();
            if current >= expected {
                info!(count = current, "all components drained");
                return DrainResult::Complete(current);
            }

            match tokio::time::timeout_at(deadline, self.drain_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    // Sender dropped
                    let current = *self.drain_rx.borrow();
                    return DrainResult::Complete(current);
                }
                Err(_) => {
                    let current = *self.drain_rx.borrow();
                    warn!(
                        current,
                        expected, "drain timeout — some components did not confirm"
                    );
                    return DrainResult::Timeout {
                        confirmed: current,
                        expected,
                    };
                }
            }
        }
    }

    /// Number of subscribers currently listening.
    pub fn subscriber_count(&self) -> usize {
        self.trigger.receiver_count()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DrainResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// All expected components confirmed drain.
    Complete(usize),
    /// Timeout expired before all components confirmed.
    Timeout { confirmed: usize, expected: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete(_))
    }
}

// ---------------------------------------------------------------------------
// ShutdownGuard — RAII guard that confirms drain on drop
// ---------------------------------------------------------------------------

/// Which worker pool a [`ShutdownGuard`] belongs to — carried only for the
/// drain log line, so a timed-out shutdown names the pool still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Content,
    Callback,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::Content => write!(f, "content"),
            PoolKind::Callback => write!(f, "callback"),
        }
    }
}

/// RAII guard that calls `confirm_drained()` when dropped.
///
/// Give one to each component that needs to participate in graceful shutdown.
/// When the component finishes its drain, dropping the guard signals completion.
pub struct ShutdownGuard {
    signal: ShutdownSignal,
    pool: Option<PoolKind>,
}

impl ShutdownGuard {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal, pool: None }
    }

    /// Same as [`new`](Self::new), tagged with the pool it belongs to so the
    /// drop log line says which one drained.
    pub fn new_for(signal: ShutdownSignal, pool: PoolKind) -> Self {
        Self { signal, pool: Some(pool) }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool {
            info!(%pool, "worker pool drained");
        }
        self.signal.confirm_drained();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
