use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod converter;
pub mod db;
pub mod download_manager;
pub mod error;
pub mod events;
pub mod models;
pub mod options;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod tool_manager;
pub mod url_utils;
pub mod ytdlp;

#[cfg(test)]
mod testing;

pub use db::{AppDirs, HistoryStore};
pub use download_manager::{DownloadOutcome, Downloader};
pub use error::{AppError, ErrorKind, FailureCode, Result};
pub use events::{AppEvent, EventReceiver, Notifier};
pub use models::{DownloadForm, DownloadRecord, DownloadRequest, MediaInfo, Preset, QualitySelector};
pub use queue::{DownloadQueue, QueueSummary};
pub use scheduler::{Repeat, ScheduledEntry, Scheduler};
pub use settings::ConfigStore;

use converter::{ConvertPreset, Converter};
use tool_manager::{Tool, ToolManager, UpgradeReport};
use ytdlp::{Extractor, YtDlpConfig, YtDlpExtractor};

/// Explicit application state.
///
/// Owns every component; a front end holds one `App`, builds requests from
/// [`App::form`], and listens on the event receiver returned by [`App::open`].
pub struct App {
    dirs: AppDirs,
    config: ConfigStore,
    downloader: Arc<Downloader>,
    queue: Arc<DownloadQueue>,
    scheduler: Arc<Scheduler>,
    tools: ToolManager,
    notifier: Notifier,
}

impl App {
    /// Open the stores under `dirs` and wire them to `extractor`.
    pub fn open(dirs: AppDirs, extractor: Arc<dyn Extractor>) -> Result<(Self, EventReceiver)> {
        Self::open_with_tools(dirs, extractor, ToolManager::default())
    }

    /// Open with the yt-dlp executable found by the tool manager.
    pub fn open_with_ytdlp(dirs: AppDirs, tools: ToolManager) -> Result<(Self, EventReceiver)> {
        let cfg = YtDlpConfig::new(tools.tool_path(Tool::YtDlp))
            .with_ffmpeg(tools.find_tool(Tool::Ffmpeg));
        log::info!("Using yt-dlp at {}", cfg.yt_dlp_path.display());
        Self::open_with_tools(dirs, Arc::new(YtDlpExtractor::new(cfg)), tools)
    }

    fn open_with_tools(
        dirs: AppDirs,
        extractor: Arc<dyn Extractor>,
        tools: ToolManager,
    ) -> Result<(Self, EventReceiver)> {
        let config = ConfigStore::load(dirs.config_file());
        let history = HistoryStore::open(dirs.history_db()).map_err(AppError::Persistence)?;
        let (notifier, rx) = events::channel();

        let downloader = Arc::new(Downloader::new(extractor, history, notifier.clone()));
        let scheduler = Arc::new(Scheduler::load(dirs.schedule_file(), notifier.clone()));

        let app = Self {
            dirs,
            config,
            downloader,
            queue: Arc::new(DownloadQueue::new()),
            scheduler,
            tools,
            notifier,
        };
        Ok((app, rx))
    }

    pub fn dirs(&self) -> &AppDirs {
        &self.dirs
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// A fresh download form initialised from the config document.
    pub fn form(&self) -> DownloadForm {
        DownloadForm::from_config(&self.config)
    }

    /// Remember the output directory the user picked.
    pub fn save_last_path(&mut self, path: &Path) {
        self.config.set(settings::keys::LAST_DOWNLOAD_PATH, path);
    }

    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        self.downloader.run(request).await
    }

    /// Run a download on a background task.
    pub fn spawn_download(&self, request: DownloadRequest) -> JoinHandle<Result<DownloadOutcome>> {
        let downloader = Arc::clone(&self.downloader);
        tokio::spawn(async move { downloader.run(&request).await })
    }

    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        self.downloader.fetch_info(url).await
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn enqueue(&self, request: DownloadRequest) -> Result<usize> {
        if request.url.trim().is_empty() {
            return Err(AppError::validation("Please enter a URL"));
        }
        let url = request.url.clone();
        let len = self.queue.enqueue(request);
        self.notifier.info(format!("Added to queue: {}", url));
        Ok(len)
    }

    /// Enqueue every URL found in pasted text, each with `template`'s options.
    pub fn enqueue_text(&self, text: &str, template: &DownloadRequest) -> Vec<String> {
        let urls = url_utils::extract_urls(text);
        self.enqueue_urls(&urls, template);
        urls
    }

    /// Enqueue every line of a URL list file, each with `template`'s options.
    pub fn import_file(&self, path: &Path, template: &DownloadRequest) -> Result<usize> {
        let urls = url_utils::read_url_file(path)?;
        self.enqueue_urls(&urls, template);
        self.notifier
            .info(format!("Imported {} URLs from {}", urls.len(), path.display()));
        Ok(urls.len())
    }

    fn enqueue_urls(&self, urls: &[String], template: &DownloadRequest) {
        for url in urls {
            let mut request = template.clone();
            request.url = url.clone();
            self.queue.enqueue(request);
        }
    }

    pub async fn drain_queue(&self) -> Result<QueueSummary> {
        self.queue.process_all(&self.downloader).await
    }

    pub fn spawn_drain(&self) -> JoinHandle<Result<QueueSummary>> {
        Arc::clone(&self.queue).spawn_drain(Arc::clone(&self.downloader))
    }

    pub fn clear_queue(&self) -> usize {
        let n = self.queue.clear();
        self.notifier.info("Queue cleared");
        n
    }

    pub fn history(&self, limit: u32) -> Result<Vec<DownloadRecord>> {
        self.downloader
            .history()
            .list(limit)
            .map_err(AppError::Persistence)
    }

    pub fn clear_history(&self) -> Result<usize> {
        let n = self
            .downloader
            .history()
            .clear()
            .map_err(AppError::Persistence)?;
        self.notifier.info("History cleared");
        Ok(n)
    }

    /// Write the whole history to `path` as tab-separated text.
    pub fn export_history(&self, path: &Path) -> Result<usize> {
        let file = File::create(path)?;
        let n = self
            .downloader
            .history()
            .export_tsv(BufWriter::new(file))
            .map_err(AppError::Persistence)?;
        self.notifier
            .info(format!("Exported {} history rows to {}", n, path.display()));
        Ok(n)
    }

    pub fn schedule_add(
        &self,
        request: DownloadRequest,
        at: NaiveTime,
        repeat: Repeat,
    ) -> Result<ScheduledEntry> {
        self.scheduler.add(request, at, repeat)
    }

    pub fn schedule_remove(&self, id: Uuid) -> Result<bool> {
        self.scheduler.remove(id)
    }

    pub fn schedule_list(&self) -> Vec<ScheduledEntry> {
        self.scheduler.list()
    }

    /// Start the scheduler's polling loop on a background task.
    pub fn run_scheduler(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.scheduler).run(
            Arc::clone(&self.downloader),
            scheduler::DEFAULT_POLL_INTERVAL,
            shutdown,
        ))
    }

    pub async fn convert(&self, input: &Path, output: &Path, preset: ConvertPreset) -> Result<PathBuf> {
        let converter = Converter::new(self.tools.tool_path(Tool::Ffmpeg));
        self.notifier
            .info(format!("Converting {} ({})", input.display(), preset));
        match converter.convert(input, output, preset).await {
            Ok(path) => {
                self.notifier
                    .info(format!("Conversion finished: {}", path.display()));
                Ok(path)
            }
            Err(e) => {
                self.notifier.error(format!("Conversion failed: {}", e));
                Err(e)
            }
        }
    }

    pub async fn extractor_version(&self) -> Result<String> {
        self.tools.version(Tool::YtDlp).await
    }

    pub async fn upgrade_extractor(&self) -> Result<UpgradeReport> {
        self.notifier.info("Checking for yt-dlp updates...");
        match self.tools.upgrade_extractor().await {
            Ok(report) => {
                let version = report.current.as_deref().unwrap_or("unknown");
                self.notifier
                    .info(format!("yt-dlp updated, version {}", version));
                Ok(report)
            }
            Err(e) => {
                self.notifier.error(format!("yt-dlp update failed: {}", e));
                Err(e)
            }
        }
    }

    /// Whether the config asks for a yt-dlp upgrade at startup.
    pub fn auto_update_enabled(&self) -> bool {
        self.config
            .get_as::<bool>(settings::keys::AUTO_UPDATE)
            .unwrap_or(true)
    }
}
