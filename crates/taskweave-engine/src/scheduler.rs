//! Scheduler — the periodic loop that scans for due tasks, claims each,
//! and hands it to the runner.
//!
//! The scheduler is an explicit struct owning its cancellation token and
//! started flag; `start`/`stop` are idempotent state transitions and
//! tests construct independent instances. One task's failure never halts
//! a scan.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use taskweave_core::types::TriggerSource;
use taskweave_store::TaskStore;

use crate::runner::Runner;

/// Periodic due-task scanner.
pub struct Scheduler {
    store: Arc<TaskStore>,
    runner: Arc<Runner>,
    interval: Duration,
    batch_cap: usize,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<TaskStore>,
        runner: Arc<Runner>,
        interval_secs: u64,
        batch_cap: usize,
    ) -> Self {
        Self {
            store,
            runner,
            interval: Duration::from_secs(interval_secs),
            batch_cap,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Start the loop: one scan immediately, then one per interval until
    /// the cancellation token fires. Starting an already-started
    /// scheduler is a no-op; returns whether this call started it.
    pub fn start(self: Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already started");
            return false;
        }

        let this = self;
        tokio::spawn(async move {
            tracing::info!(
                "⏰ Scheduler started (scan every {}s, batch cap {})",
                this.interval.as_secs(),
                this.batch_cap
            );
            let mut ticker = tokio::time::interval(this.interval);
            // The interval's first tick completes immediately and serves
            // as the startup scan.
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        tracing::info!("Scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => this.scan_once().await,
                }
            }
        });
        true
    }

    /// Signal the loop to terminate. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// One scan: claim and run each due task in due-time order, up to the
    /// batch cap. Lost claims and runner errors are logged and skipped.
    pub async fn scan_once(&self) {
        let now = Utc::now();
        let due = match self.store.due_tasks(now, self.batch_cap) {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("Due-task scan failed: {}", e);
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        tracing::debug!("🔔 {} due task(s)", due.len());

        for task in due {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.runner.claim_work(&task.id, &task.owner_id) {
                Ok((claimed, true)) => {
                    if let Err(e) = self
                        .runner
                        .execute_claimed(&self.cancel, claimed, TriggerSource::Scheduler)
                        .await
                    {
                        tracing::warn!("Task {} run failed: {}", task.id, e);
                    }
                }
                Ok((_, false)) => {
                    tracing::debug!("Task {} claim lost, skipping", task.id);
                }
                Err(e) => {
                    tracing::warn!("Claim failed for task {}: {}", task.id, e);
                }
            }
        }
    }
}
