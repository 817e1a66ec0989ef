//! Download Manager
//!
//! Runs one download request through the extractor: validation, a single
//! guarded extractor call, progress reporting and the history write.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::db::HistoryStore;
use crate::error::{AppError, Result};
use crate::events::{AppEvent, Notifier};
use crate::models::{DownloadRecord, DownloadRequest, ExtractedInfo, MediaInfo, ProgressUpdate};
use crate::options::build_options;
use crate::progress::ProgressReporter;
use crate::ytdlp::Extractor;

/// How often a waiting caller checks whether the running download finished.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Orchestrator state. Every run goes `Idle -> Running -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            _ => RunState::Idle,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadOutcome {
    pub id: Uuid,
    pub info: ExtractedInfo,
    /// `None` if the history write failed; that failure is logged only.
    pub record: Option<DownloadRecord>,
}

/// Resets the orchestrator to idle when dropped, including on panic or when
/// the run future is dropped mid-await.
struct RunGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.store(RunState::Idle as u8, Ordering::Release);
    }
}

/// Drives one request at a time through an [`Extractor`].
pub struct Downloader {
    extractor: Arc<dyn Extractor>,
    history: HistoryStore,
    notifier: Notifier,
    state: AtomicU8,
}

impl Downloader {
    pub fn new(extractor: Arc<dyn Extractor>, history: HistoryStore, notifier: Notifier) -> Self {
        Self {
            extractor,
            history,
            notifier,
            state: AtomicU8::new(RunState::Idle as u8),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run one request to completion.
    ///
    /// Returns `Validation`/`MissingDirectory` before anything is started,
    /// `Busy` if another run holds the guard, or the extractor's error.
    pub async fn run(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        if let Err(e) = check_preconditions(request) {
            self.notifier.warn(e.to_string());
            return Err(e);
        }

        let _guard = self.try_acquire()?;
        let id = Uuid::new_v4();
        let url = request.url.trim();

        self.notifier.info(format!("Starting download: {}", url));
        self.notifier.emit(AppEvent::DownloadStarted {
            id,
            url: url.to_string(),
        });

        let options = build_options(request);
        let reporter = ProgressReporter::new();
        let notifier = &self.notifier;
        let on_progress = |update: ProgressUpdate| {
            if let Some(line) = reporter.report(&update) {
                notifier.info(line);
            }
            match update {
                ProgressUpdate::Downloading(progress) => {
                    notifier.emit(AppEvent::DownloadProgress { id, progress })
                }
                ProgressUpdate::PostProcessing { step } => {
                    notifier.emit(AppEvent::DownloadPostProcessing { id, step })
                }
                ProgressUpdate::Finished => {}
            }
        };

        let info = match self.extractor.extract(url, &options, &on_progress).await {
            Ok(info) => info,
            Err(e) => {
                self.notifier.download_failed(id, &e);
                return Err(e);
            }
        };

        let record = self.record_history(url, request, &info);

        self.notifier.info(format!(
            "Download completed: {}",
            info.title.as_deref().unwrap_or(url)
        ));
        self.notifier.emit(AppEvent::DownloadCompleted {
            id,
            record: record.clone(),
        });

        Ok(DownloadOutcome { id, info, record })
    }

    /// [`run`](Self::run) for queued and scheduled work: a `Busy` rejection
    /// waits for the running download to finish and tries the same request
    /// again instead of failing it.
    pub async fn run_when_idle(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        let mut warned = false;
        loop {
            match self.run(request).await {
                Err(AppError::Busy) => {
                    if !warned {
                        self.notifier.warn(format!(
                            "A download is in progress; {} will start when it finishes",
                            request.url.trim()
                        ));
                        warned = true;
                    }
                    while self.is_running() {
                        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    }
                }
                other => return other,
            }
        }
    }

    /// Metadata-only probe. Not guarded and not recorded.
    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        let url = url.trim();
        if url.is_empty() {
            let e = AppError::validation("Please enter a URL");
            self.notifier.warn(e.to_string());
            return Err(e);
        }

        self.notifier.info(format!("Fetching video info: {}", url));
        match self.extractor.probe(url).await {
            Ok(info) => Ok(info),
            Err(e) => {
                self.notifier.error(format!("Error fetching info: {}", e));
                Err(e)
            }
        }
    }

    fn try_acquire(&self) -> Result<RunGuard<'_>> {
        self.state
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| RunGuard { state: &self.state })
            .map_err(|_| {
                log::warn!("Rejected download: another download is in progress");
                AppError::Busy
            })
    }

    fn record_history(
        &self,
        url: &str,
        request: &DownloadRequest,
        info: &ExtractedInfo,
    ) -> Option<DownloadRecord> {
        let title = info.title.as_deref().unwrap_or("Unknown");
        let filename = info.filename.as_deref().unwrap_or("");
        let size = info
            .filesize
            .and_then(|s| i64::try_from(s).ok())
            .unwrap_or(0);

        match self
            .history
            .record(url, title, &request.quality.to_string(), filename, size)
        {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("Failed to record download history: {:#}", e);
                None
            }
        }
    }
}

fn check_preconditions(request: &DownloadRequest) -> Result<()> {
    if request.url.trim().is_empty() {
        return Err(AppError::validation("Please enter a URL"));
    }
    if !request.destination.is_dir() {
        return Err(AppError::MissingDirectory(request.destination.clone()));
    }
    Ok(())
}
