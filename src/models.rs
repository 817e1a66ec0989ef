use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::{keys, ConfigStore};

/// User-facing quality choice.
///
/// Textual form is `"best"`, `"audio"` or a decimal height such as `"720"`;
/// presets in the config document and the history `quality` column use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QualitySelector {
    Best,
    Audio,
    MaxHeight(u32),
}

impl Default for QualitySelector {
    fn default() -> Self {
        QualitySelector::Best
    }
}

impl fmt::Display for QualitySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualitySelector::Best => f.write_str("best"),
            QualitySelector::Audio => f.write_str("audio"),
            QualitySelector::MaxHeight(h) => write!(f, "{h}"),
        }
    }
}

impl FromStr for QualitySelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(QualitySelector::Best),
            "audio" => Ok(QualitySelector::Audio),
            other => {
                // Accept "720" as well as "720p".
                let digits = other.strip_suffix('p').unwrap_or(other);
                match digits.parse::<u32>() {
                    Ok(h) if h > 0 => Ok(QualitySelector::MaxHeight(h)),
                    _ => Err(format!("unknown quality selector: {s}")),
                }
            }
        }
    }
}

impl TryFrom<String> for QualitySelector {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualitySelector> for String {
    fn from(value: QualitySelector) -> Self {
        value.to_string()
    }
}

/// One download to run. Cloned into the queue/schedule and never mutated there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub quality: QualitySelector,
    #[serde(default)]
    pub subtitles: bool,
    #[serde(default = "default_subtitle_language")]
    pub subtitle_language: String,
    /// KB/s as entered by the user; `None` or `Some(0)` means unlimited.
    #[serde(default)]
    pub rate_limit_kbps: Option<u32>,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    pub destination: PathBuf,
}

impl DownloadRequest {
    pub fn new<S: Into<String>>(url: S, destination: PathBuf) -> Self {
        Self {
            url: url.into(),
            quality: QualitySelector::Best,
            subtitles: false,
            subtitle_language: default_subtitle_language(),
            rate_limit_kbps: None,
            cookie_file: None,
            destination,
        }
    }

    pub fn with_quality(mut self, quality: QualitySelector) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_subtitles<S: Into<String>>(mut self, language: S) -> Self {
        self.subtitles = true;
        self.subtitle_language = language.into();
        self
    }

    pub fn with_rate_limit_kbps(mut self, kbps: u32) -> Self {
        self.rate_limit_kbps = Some(kbps);
        self
    }

    pub fn with_cookie_file(mut self, path: PathBuf) -> Self {
        self.cookie_file = Some(path);
        self
    }
}

pub(crate) fn default_subtitle_language() -> String {
    "en".to_string()
}

/// Persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub quality: String,
    pub filename: String,
    pub size: i64,
    pub downloaded_at: DateTime<Utc>,
    pub status: String,
}

/// Named (quality, subtitles) pair stored in the config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub quality: QualitySelector,
    #[serde(default)]
    pub subtitles: bool,
}

/// Normalized download progress. Any field may be `None` depending on what
/// the extractor reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    /// 0..=100
    pub percent: Option<f64>,
    pub bytes_downloaded: Option<u64>,
    pub bytes_total: Option<u64>,
    pub speed_bps: Option<u64>,
    pub eta_seconds: Option<u64>,
}

/// What the extractor reports through its progress callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Downloading(Progress),
    Finished,
    PostProcessing { step: String },
}

/// Result of a completed extraction, used for the history record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub filename: Option<String>,
    pub filesize: Option<u64>,
}

/// Metadata returned by an info-only probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub url: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    pub view_count: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// Explicit state behind the download form.
///
/// A front end binds its widgets to these fields and calls
/// [`DownloadForm::to_request`] when the user acts.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadForm {
    pub url: String,
    pub quality: QualitySelector,
    pub download_subtitles: bool,
    pub subtitle_language: String,
    pub speed_limit_kbps: u32,
    pub use_cookies: bool,
    pub cookies_file: Option<PathBuf>,
    pub download_path: PathBuf,
    pub preset: Option<String>,
}

impl DownloadForm {
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            url: String::new(),
            quality: QualitySelector::Best,
            download_subtitles: config.get_as::<bool>(keys::DOWNLOAD_SUBTITLES).unwrap_or(false),
            subtitle_language: config.subtitle_language(),
            speed_limit_kbps: config.speed_limit_kbps(),
            use_cookies: false,
            cookies_file: None,
            download_path: config.download_path(),
            preset: None,
        }
    }

    /// Copy a named preset's quality and subtitle toggle into the form.
    /// Returns `false` if no such preset exists.
    pub fn apply_preset(&mut self, config: &ConfigStore, name: &str) -> bool {
        match config.preset(name) {
            Some(preset) => {
                self.quality = preset.quality;
                self.download_subtitles = preset.subtitles;
                self.preset = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    pub fn to_request(&self) -> DownloadRequest {
        let cookie_file = if self.use_cookies {
            self.cookies_file
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
        } else {
            None
        };

        DownloadRequest {
            url: self.url.trim().to_string(),
            quality: self.quality,
            subtitles: self.download_subtitles,
            subtitle_language: self.subtitle_language.clone(),
            rate_limit_kbps: (self.speed_limit_kbps > 0).then_some(self.speed_limit_kbps),
            cookie_file,
            destination: self.download_path.clone(),
        }
    }
}
