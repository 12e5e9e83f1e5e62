//! Ingress: admission control, bounded queues, and the content/callback
//! worker pools.
//!
//! `submit_content`/`submit_callback` perform admission (waiting on both
//! rate-limit buckets) then a non-blocking `try_send` into the matching
//! bounded queue — a full queue fails fast, it never blocks the submitter.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use bridge_harness::dedup::CallbackDedup;
use bridge_harness::rate_limiter::IngressLimiter;
use bridge_harness::shutdown::{PoolKind, ShutdownGuard, ShutdownSignal};

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("ingress already started")]
    AlreadyStarted,
    #[error("ingress not started")]
    NotStarted,
    #[error("queue is full")]
    QueueFull,
    #[error("ingress has been stopped")]
    Stopped,
}

/// One unit of inbound work: a user key for rate limiting, a dedup key for
/// callbacks (empty for content messages, which are never deduplicated),
/// and the raw payload.
pub struct WorkItem {
    pub user_key: String,
    pub dedup_key: Option<String>,
    pub payload: String,
}

pub type Handler = Arc<dyn Fn(WorkItem) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct IngressConfig {
    pub content_workers: usize,
    pub callback_workers: usize,
    pub content_queue_cap: usize,
    pub callback_queue_cap: usize,
    pub max_concurrent_ops: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self { content_workers: 8, callback_workers: 4, content_queue_cap: 1024, callback_queue_cap: 512, max_concurrent_ops: 64 }
    }
}

pub struct IngressPool {
    limiter: Arc<IngressLimiter>,
    dedup: Arc<CallbackDedup>,
    shutdown: ShutdownSignal,
    concurrency: Arc<Semaphore>,
    config: IngressConfig,
    content_tx: Option<mpsc::Sender<WorkItem>>,
    callback_tx: Option<mpsc::Sender<WorkItem>>,
    started: AtomicBool,
}

impl IngressPool {
    pub fn new(limiter: Arc<IngressLimiter>, dedup: Arc<CallbackDedup>, config: IngressConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_ops));
        Self {
            limiter,
            dedup,
            shutdown: ShutdownSignal::new(),
            concurrency,
            config,
            content_tx: None,
            callback_tx: None,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn `content_workers` + `callback_workers` tasks and return once
    /// queues are wired. Calling twice is an error.
    pub fn start(&mut self, content_handler: Handler, callback_handler: Handler) -> Result<(), IngressError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(IngressError::AlreadyStarted);
        }

        let (content_tx, content_rx) = mpsc::channel(self.config.content_queue_cap);
        let (callback_tx, callback_rx) = mpsc::channel(self.config.callback_queue_cap);
        self.content_tx = Some(content_tx);
        self.callback_tx = Some(callback_tx);

        spawn_workers(PoolKind::Content, self.config.content_workers, content_rx, content_handler, self.concurrency.clone(), self.shutdown.clone());
        spawn_workers(PoolKind::Callback, self.config.callback_workers, callback_rx, callback_handler, self.concurrency.clone(), self.shutdown.clone());

        info!(
            content_workers = self.config.content_workers,
            callback_workers = self.config.callback_workers,
            "ingress pool started"
        );
        Ok(())
    }

    /// Wait on both rate-limit buckets, then enqueue. Returns immediately
    /// with `QueueFull` rather than blocking if the queue has no capacity.
    pub async fn submit_content(&self, item: WorkItem) -> Result<(), IngressError> {
        if self.shutdown.is_shutting_down() {
            return Err(IngressError::Stopped);
        }
        let tx = self.content_tx.as_ref().ok_or(IngressError::NotStarted)?;
        self.limiter.admit(&item.user_key).await;
        tx.try_send(item).map_err(|_| IngressError::QueueFull)
    }

    pub async fn submit_callback(&self, item: WorkItem) -> Result<(), IngressError> {
        if self.shutdown.is_shutting_down() {
            return Err(IngressError::Stopped);
        }
        if let Some(id) = &item.dedup_key {
            if !self.dedup.first_sighting(id) {
                return Ok(()); // duplicate: short-circuit silently, caller still answers the callback
            }
        }
        let tx = self.callback_tx.as_ref().ok_or(IngressError::NotStarted)?;
        self.limiter.admit(&item.user_key).await;
        tx.try_send(item).map_err(|_| IngressError::QueueFull)
    }

    /// Close queues and wait up to `timeout` for in-flight work to drain.
    pub async fn stop(&mut self, timeout: Duration) {
        self.stop_with_reason(timeout, "no reason given").await;
    }

    /// Same as [`stop`](Self::stop), tagging the triggering log line with
    /// `reason` (e.g. "sigterm", "admin shutdown command").
    pub async fn stop_with_reason(&mut self, timeout: Duration, reason: &str) {
        self.shutdown.trigger_for(reason);
        self.content_tx.take();
        self.callback_tx.take();
        let expected = self.config.content_workers + self.config.callback_workers;
        let result = self.shutdown.wait_for_drain(expected, timeout).await;
        if !result.is_complete() {
            warn!("ingress pool stop timed out waiting for workers to drain");
        }
    }
}

fn spawn_workers(
    pool: PoolKind,
    count: usize,
    rx: mpsc::Receiver<WorkItem>,
    handler: Handler,
    concurrency: Arc<Semaphore>,
    shutdown: ShutdownSignal,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..count {
        let rx = rx.clone();
        let handler = handler.clone();
        let concurrency = concurrency.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let guard = ShutdownGuard::new_for(shutdown.clone(), pool);
            let mut shutdown_rx = shutdown.subscribe();
            loop {
                let item = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => None,
                        item = rx.recv() => item,
                    }
                };
                let Some(item) = item else { break };
                let permit = concurrency.clone().acquire_owned().await.ok();
                handler(item).await;
                drop(permit);
            }
            drop(guard);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_harness::rate_limiter::RateLimitConfig;
    use std::sync::atomic::AtomicUsize;

    fn limiter() -> Arc<IngressLimiter> {
        Arc::new(IngressLimiter::new(RateLimitConfig::new(1000.0, 1000.0), RateLimitConfig::new(1000.0, 1000.0)))
    }

    #[tokio::test]
    async fn submit_before_start_errors() {
        let pool = IngressPool::new(limiter(), Arc::new(CallbackDedup::new(64)), IngressConfig::default());
        let item = WorkItem { user_key: "u1".into(), dedup_key: None, payload: "hi".into() };
        assert!(matches!(pool.submit_content(item).await, Err(IngressError::NotStarted)));
    }

    #[tokio::test]
    async fn starting_twice_errors() {
        let mut pool = IngressPool::new(limiter(), Arc::new(CallbackDedup::new(64)), IngressConfig::default());
        let noop: Handler = Arc::new(|_| Box::pin(async {}));
        pool.start(noop.clone(), noop.clone()).unwrap();
        assert!(matches!(pool.start(noop.clone(), noop), Err(IngressError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn handler_runs_for_submitted_content() {
        let mut pool = IngressPool::new(limiter(), Arc::new(CallbackDedup::new(64)), IngressConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let content: Handler = Arc::new(move |_| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });
        let noop: Handler = Arc::new(|_| Box::pin(async {}));
        pool.start(content, noop).unwrap();
        pool.submit_content(WorkItem { user_key: "u1".into(), dedup_key: None, payload: "hi".into() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_callback_is_short_circuited() {
        let mut pool = IngressPool::new(limiter(), Arc::new(CallbackDedup::new(64)), IngressConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let callback: Handler = Arc::new(move |_| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });
        let noop: Handler = Arc::new(|_| Box::pin(async {}));
        pool.start(noop, callback).unwrap();
        let make = || WorkItem { user_key: "u1".into(), dedup_key: Some("cb-1".into()), payload: "x".into() };
        pool.submit_callback(make()).await.unwrap();
        pool.submit_callback(make()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
