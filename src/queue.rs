//! Queue Processor
//!
//! FIFO of pending requests drained one at a time through the
//! [`Downloader`]. Only one drain may run at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::download_manager::Downloader;
use crate::error::{AppError, Result};
use crate::events::AppEvent;
use crate::models::DownloadRequest;

/// Result of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Clears the drain flag when dropped.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct DownloadQueue {
    items: Mutex<VecDeque<DownloadRequest>>,
    draining: AtomicBool,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DownloadRequest>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a request; returns the new queue length.
    pub fn enqueue(&self, request: DownloadRequest) -> usize {
        let mut items = self.lock();
        items.push_back(request);
        items.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending requests in the order they will run.
    pub fn snapshot(&self) -> Vec<DownloadRequest> {
        self.lock().iter().cloned().collect()
    }

    /// Drop every pending request; returns how many were removed. A drain
    /// already in progress finishes its current item and then stops.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn pop(&self) -> Option<DownloadRequest> {
        self.lock().pop_front()
    }

    /// Run every queued request through `downloader`, in order, until the
    /// queue is empty. Items enqueued during the drain are picked up too.
    /// An item that meets another running download waits for it rather
    /// than being dropped.
    pub async fn process_all(&self, downloader: &Downloader) -> Result<QueueSummary> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Queue drain requested while one is already running");
            return Err(AppError::QueueBusy);
        }
        let _guard = DrainGuard {
            flag: &self.draining,
        };

        if self.is_empty() {
            let e = AppError::validation("queue is empty");
            downloader.notifier().warn("Queue is empty");
            return Err(e);
        }

        let notifier = downloader.notifier();
        notifier.info(format!("Processing queue ({} items)", self.len()));

        let mut summary = QueueSummary::default();
        while let Some(request) = self.pop() {
            match downloader.run_when_idle(&request).await {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    log::warn!("Queue item {} failed: {}", request.url, e);
                    summary.failed += 1;
                }
            }
        }

        notifier.info(format!(
            "Queue finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        ));
        notifier.emit(AppEvent::QueueDrained {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });

        Ok(summary)
    }

    /// [`process_all`](Self::process_all) on a background task.
    pub fn spawn_drain(
        self: Arc<Self>,
        downloader: Arc<Downloader>,
    ) -> JoinHandle<Result<QueueSummary>> {
        tokio::spawn(async move { self.process_all(&downloader).await })
    }
}
