//! Non-blocking progress reporter: a buffered channel plus a single worker so
//! the calling handler never blocks on a UI edit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 10;
const BAR_CELLS: usize = 10;
const EDIT_TIMEOUT: Duration = Duration::from_secs(5);
const TICK_DELAY: Duration = Duration::from_millis(100);
const FINISH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ProgressUpdate {
    pub pct: f64,
    pub bar: String,
    pub message: String,
}

pub type EditFn = Arc<dyn Fn(ProgressUpdate) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Render a 10-cell textual bar, e.g. `[####------] 40%`.
pub fn render_bar(pct: f64) -> String {
    let pct = pct.clamp(0.0, 100.0);
    let filled = ((pct / 100.0) * BAR_CELLS as f64).round() as usize;
    let filled = filled.min(BAR_CELLS);
    format!("[{}{}] {:.0}%", "#".repeat(filled), "-".repeat(BAR_CELLS - filled), pct)
}

pub struct ProgressReporter {
    tx: mpsc::Sender<(f64, String)>,
    cancel_tx: Option<oneshot::Sender<()>>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(edit: EditFn) -> Self {
        let (tx, mut rx) = mpsc::channel::<(f64, String)>(CHANNEL_CAPACITY);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    maybe = rx.recv() => {
                        let Some((pct, message)) = maybe else { break };
                        let bar = render_bar(pct);
                        let edit_fut = edit(ProgressUpdate { pct, bar, message });
                        let _ = tokio::time::timeout(EDIT_TIMEOUT, edit_fut).await;

                        tokio::select! {
                            biased;
                            _ = &mut cancel_rx => break,
                            _ = tokio::time::sleep(TICK_DELAY) => {}
                        }
                    }
                }
            }
        });

        Self { tx, cancel_tx: Some(cancel_tx), worker: Some(worker) }
    }

    /// Non-blocking. Drops the update (and logs it) if the buffer is full.
    pub fn update_progress(&self, pct: f64, message: impl Into<String>) {
        if self.tx.try_send((pct, message.into())).is_err() {
            warn!(pct, "progress update dropped: channel full");
        }
    }

    /// Cancel, close the channel, and wait up to 2s for the worker to exit.
    pub async fn finish(mut self) {
        if let Some(cancel) = self.cancel_tx.take() {
            let _ = cancel.send(());
        }
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(FINISH_TIMEOUT, worker).await.is_err() {
                warn!("progress reporter worker did not exit within the finish timeout");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn bar_renders_expected_fill() {
        assert_eq!(render_bar(0.0), "[----------] 0%");
        assert_eq!(render_bar(100.0), "[##########] 100%");
        assert_eq!(render_bar(40.0), "[####------] 40%");
    }

    #[tokio::test]
    async fn updates_reach_the_edit_function() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let edit: EditFn = Arc::new(move |_update| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        let reporter = ProgressReporter::start(edit);
        reporter.update_progress(10.0, "starting");
        reporter.update_progress(50.0, "halfway");
        tokio::time::sleep(Duration::from_millis(400)).await;
        reporter.finish().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finish_stops_the_worker_promptly() {
        let edit: EditFn = Arc::new(|_| Box::pin(async {}));
        let reporter = ProgressReporter::start(edit);
        reporter.update_progress(1.0, "go");
        let start = tokio::time::Instant::now();
        reporter.finish().await;
        assert!(start.elapsed() < FINISH_TIMEOUT);
    }

    #[tokio::test]
    async fn update_past_capacity_is_dropped_not_blocking() {
        // An edit function that never returns keeps the worker busy so the
        // channel fills; subsequent updates must not block the caller.
        let edit: EditFn = Arc::new(|_| Box::pin(std::future::pending()));
        let reporter = ProgressReporter::start(edit);
        for i in 0..(CHANNEL_CAPACITY + 5) {
            reporter.update_progress(i as f64, "spam");
        }
        // Reaching this line at all proves update_progress never blocked.
        reporter.finish().await;
    }
}
