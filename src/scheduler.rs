//! Scheduler
//!
//! Stored (time of day, repeat rule, request) entries, checked by a polling
//! loop and fired straight through the [`Downloader`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::download_manager::{DownloadOutcome, Downloader};
use crate::error::{AppError, Result};
use crate::events::{AppEvent, Notifier};
use crate::models::DownloadRequest;

/// Polling interval. Under a minute so no trigger minute is skipped.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// Fires once, then the entry is removed.
    Once,
    Daily,
    /// Fires on the weekday the entry was created.
    Weekly,
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Repeat::Once => "once",
            Repeat::Daily => "daily",
            Repeat::Weekly => "weekly",
        })
    }
}

impl FromStr for Repeat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Repeat::Once),
            "daily" => Ok(Repeat::Daily),
            "weekly" => Ok(Repeat::Weekly),
            other => Err(format!("unknown repeat rule: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub id: Uuid,
    pub request: DownloadRequest,
    /// Minute precision.
    pub at: NaiveTime,
    pub repeat: Repeat,
    #[serde(default)]
    pub weekday: Option<Weekday>,
    #[serde(default)]
    pub last_fired: Option<NaiveDateTime>,
}

impl ScheduledEntry {
    fn is_due(&self, now: NaiveDateTime) -> bool {
        if self.at.hour() != now.hour() || self.at.minute() != now.minute() {
            return false;
        }
        if self.repeat == Repeat::Weekly && self.weekday != Some(now.weekday()) {
            return false;
        }
        self.last_fired != Some(truncate_to_minute(now))
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Parse `"HH:MM"` (seconds are accepted and dropped).
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| AppError::validation(format!("invalid time of day: {s:?} (expected HH:MM)")))?;
    Ok(minute_precision(t))
}

fn minute_precision(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

pub struct Scheduler {
    path: PathBuf,
    entries: Mutex<Vec<ScheduledEntry>>,
    notifier: Notifier,
}

impl Scheduler {
    /// Load entries from `path`. A missing file is an empty schedule; a
    /// broken one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>, notifier: Notifier) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Ignoring unreadable schedule {}: {:#}", path.display(), e);
                Vec::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
            notifier,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScheduledEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn list(&self) -> Vec<ScheduledEntry> {
        self.lock().clone()
    }

    /// Add an entry, anchoring weekly entries to today's weekday.
    pub fn add(&self, request: DownloadRequest, at: NaiveTime, repeat: Repeat) -> Result<ScheduledEntry> {
        self.add_at(request, at, repeat, Local::now().naive_local())
    }

    /// [`add`](Self::add) with an explicit creation time.
    pub fn add_at(
        &self,
        request: DownloadRequest,
        at: NaiveTime,
        repeat: Repeat,
        created: NaiveDateTime,
    ) -> Result<ScheduledEntry> {
        if request.url.trim().is_empty() {
            return Err(AppError::validation("Please enter a URL"));
        }

        let entry = ScheduledEntry {
            id: Uuid::new_v4(),
            request,
            at: minute_precision(at),
            repeat,
            weekday: (repeat == Repeat::Weekly).then(|| created.weekday()),
            last_fired: None,
        };

        let mut entries = self.lock();
        entries.push(entry.clone());
        write_entries(&self.path, &entries).map_err(AppError::Persistence)?;
        drop(entries);

        self.notifier.info(format!(
            "Scheduled {} at {} ({})",
            entry.request.url,
            entry.at.format("%H:%M"),
            entry.repeat
        ));
        Ok(entry)
    }

    /// Remove an entry; `false` if no entry has that id.
    pub fn remove(&self, id: Uuid) -> Result<bool> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        write_entries(&self.path, &entries).map_err(AppError::Persistence)?;
        Ok(true)
    }

    /// Entries that trigger at `now`. Marks them fired and removes one-shot
    /// entries. Calling twice within the same minute returns nothing new.
    pub fn take_due(&self, now: NaiveDateTime) -> Vec<ScheduledEntry> {
        let mut entries = self.lock();
        let mut due = Vec::new();

        for entry in entries.iter_mut().filter(|e| e.is_due(now)) {
            entry.last_fired = Some(truncate_to_minute(now));
            due.push(entry.clone());
        }
        if due.is_empty() {
            return due;
        }

        entries.retain(|e| !(e.repeat == Repeat::Once && e.last_fired.is_some()));
        if let Err(e) = write_entries(&self.path, &entries) {
            log::error!("Failed to save schedule: {:#}", e);
        }
        due
    }

    /// Fire whatever is due at `now` on a background task, one entry after
    /// another. An entry that meets a running download waits for it, so a
    /// one-shot entry is never removed without having run. `None` if nothing
    /// was due.
    pub fn tick(
        &self,
        now: NaiveDateTime,
        downloader: &Arc<Downloader>,
    ) -> Option<JoinHandle<Vec<Result<DownloadOutcome>>>> {
        let due = self.take_due(now);
        if due.is_empty() {
            return None;
        }

        for entry in &due {
            self.notifier
                .info(format!("Scheduled download triggered: {}", entry.request.url));
            self.notifier.emit(AppEvent::ScheduleFired {
                entry_id: entry.id,
                url: entry.request.url.clone(),
            });
        }

        let downloader = Arc::clone(downloader);
        Some(tokio::spawn(async move {
            let mut results = Vec::with_capacity(due.len());
            for entry in due {
                results.push(downloader.run_when_idle(&entry.request).await);
            }
            results
        }))
    }

    /// Poll every `interval` until `shutdown` fires (or its sender is dropped).
    pub async fn run(
        self: Arc<Self>,
        downloader: Arc<Downloader>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        log::info!(
            "Scheduler started with {} entries, polling every {:?}",
            self.lock().len(),
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Local::now().naive_local(), &downloader);
                }
                _ = shutdown.recv() => {
                    log::info!("Scheduler stopping");
                    break;
                }
            }
        }
    }
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<ScheduledEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse schedule")
}

fn write_entries(path: &Path, entries: &[ScheduledEntry]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schedule dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(entries).context("Failed to serialize schedule")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::HistoryStore;
    use crate::testing::RecordingExtractor;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn request(url: &str) -> DownloadRequest {
        DownloadRequest::new(url, PathBuf::from("/media"))
    }

    fn scheduler(dir: &tempfile::TempDir) -> Scheduler {
        Scheduler::load(dir.path().join("schedule.json"), Notifier::detached())
    }

    #[test]
    fn once_entry_fires_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(&dir);
        s.add(request("https://example.com/once"), hm(9, 30), Repeat::Once)
            .unwrap();

        assert!(s.take_due(at(2024, 5, 6, 9, 29, 59)).is_empty());
        let due = s.take_due(at(2024, 5, 6, 9, 30, 10));
        assert_eq!(due.len(), 1);
        assert!(s.list().is_empty());

        // Removal is persisted.
        assert!(scheduler(&dir).list().is_empty());
        assert!(s.take_due(at(2024, 5, 7, 9, 30, 0)).is_empty());
    }

    #[test]
    fn daily_entry_fires_once_per_minute_and_stays() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(&dir);
        s.add(request("https://example.com/daily"), hm(7, 0), Repeat::Daily)
            .unwrap();

        assert_eq!(s.take_due(at(2024, 5, 6, 7, 0, 5)).len(), 1);
        assert!(s.take_due(at(2024, 5, 6, 7, 0, 35)).is_empty());
        assert_eq!(s.take_due(at(2024, 5, 7, 7, 0, 1)).len(), 1);
        assert_eq!(s.list().len(), 1);
    }

    #[test]
    fn weekly_entry_anchors_to_creation_weekday() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(&dir);
        // 2024-05-06 is a Monday.
        let entry = s
            .add_at(
                request("https://example.com/weekly"),
                hm(20, 15),
                Repeat::Weekly,
                at(2024, 5, 6, 12, 0, 0),
            )
            .unwrap();
        assert_eq!(entry.weekday, Some(Weekday::Mon));

        assert!(s.take_due(at(2024, 5, 7, 20, 15, 0)).is_empty());
        assert_eq!(s.take_due(at(2024, 5, 13, 20, 15, 0)).len(), 1);
        assert_eq!(s.list().len(), 1);
    }

    #[test]
    fn entries_survive_reload_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(&dir);
        let entry = s
            .add(request("https://example.com/a"), hm(1, 2), Repeat::Daily)
            .unwrap();

        let reloaded = scheduler(&dir);
        assert_eq!(reloaded.list(), vec![entry.clone()]);

        assert!(reloaded.remove(entry.id).unwrap());
        assert!(!reloaded.remove(entry.id).unwrap());
        assert!(scheduler(&dir).list().is_empty());
    }

    #[test]
    fn broken_file_is_an_empty_schedule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("schedule.json"), "not json").unwrap();
        assert!(scheduler(&dir).list().is_empty());
    }

    #[test]
    fn parses_time_of_day() {
        assert_eq!(parse_time_of_day("07:05").unwrap(), hm(7, 5));
        assert_eq!(parse_time_of_day("07:05:59").unwrap(), hm(7, 5));
        assert!(parse_time_of_day("7pm").is_err());
        assert_eq!("Weekly".parse(), Ok(Repeat::Weekly));
    }

    #[tokio::test]
    async fn tick_runs_due_entries_through_the_downloader() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir(&media).unwrap();
        let extractor = Arc::new(RecordingExtractor::new());
        let history = HistoryStore::open(dir.path().join("history.sqlite3")).unwrap();
        let downloader = Arc::new(Downloader::new(
            extractor.clone(),
            history,
            Notifier::detached(),
        ));

        let s = scheduler(&dir);
        for url in ["https://example.com/1", "https://example.com/2"] {
            s.add(DownloadRequest::new(url, media.clone()), hm(6, 0), Repeat::Once)
                .unwrap();
        }

        assert!(s.tick(at(2024, 5, 6, 5, 59, 0), &downloader).is_none());
        let results = s
            .tick(at(2024, 5, 6, 6, 0, 0), &downloader)
            .expect("entries due")
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            extractor.calls(),
            vec!["https://example.com/1".to_string(), "https://example.com/2".to_string()]
        );
        assert!(s.list().is_empty());
    }

    #[tokio::test]
    async fn once_entry_waits_for_a_running_download() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir(&media).unwrap();
        let extractor =
            Arc::new(RecordingExtractor::new().with_delay(Duration::from_millis(300)));
        let history = HistoryStore::open(dir.path().join("history.sqlite3")).unwrap();
        let downloader = Arc::new(Downloader::new(
            extractor.clone(),
            history,
            Notifier::detached(),
        ));

        let s = scheduler(&dir);
        s.add(DownloadRequest::new("https://example.com/scheduled", media.clone()), hm(6, 0), Repeat::Once)
            .unwrap();

        let manual = {
            let downloader = downloader.clone();
            let request = DownloadRequest::new("https://example.com/manual", media.clone());
            tokio::spawn(async move { downloader.run(&request).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let results = s
            .tick(at(2024, 5, 6, 6, 0, 0), &downloader)
            .expect("entry due")
            .await
            .unwrap();
        assert!(manual.await.unwrap().is_ok());

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(
            extractor.calls(),
            vec![
                "https://example.com/manual".to_string(),
                "https://example.com/scheduled".to_string()
            ]
        );
        assert!(s.list().is_empty());
        assert_eq!(downloader.history().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::open(dir.path().join("history.sqlite3")).unwrap();
        let downloader = Arc::new(Downloader::new(
            Arc::new(RecordingExtractor::new()),
            history,
            Notifier::detached(),
        ));
        let s = Arc::new(scheduler(&dir));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(s.run(downloader, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler stopped")
            .unwrap();
    }
}
