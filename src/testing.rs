//! Test double for the extractor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, FailureCode, Result};
use crate::models::{ExtractedInfo, MediaInfo, Progress, ProgressUpdate};
use crate::options::RequestOptions;
use crate::ytdlp::{Extractor, ProgressFn};

/// Records every URL it is asked to download, in call order, and can be
/// told to fail for specific URLs or to take a while.
#[derive(Default)]
pub struct RecordingExtractor {
    calls: Mutex<Vec<String>>,
    failures: HashMap<String, (FailureCode, String)>,
    delay: Option<Duration>,
}

impl RecordingExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, url: &str, code: FailureCode, message: &str) -> Self {
        self.failures
            .insert(url.to_string(), (code, message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for RecordingExtractor {
    async fn extract(
        &self,
        url: &str,
        options: &RequestOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<ExtractedInfo> {
        self.calls.lock().unwrap().push(url.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((code, message)) = self.failures.get(url) {
            return Err(AppError::Extraction {
                code: *code,
                message: message.clone(),
            });
        }

        for percent in [0.0, 50.0, 100.0] {
            on_progress(ProgressUpdate::Downloading(Progress {
                percent: Some(percent),
                ..Progress::default()
            }));
        }
        on_progress(ProgressUpdate::Finished);

        let title = url.rsplit('/').next().unwrap_or("media").to_string();
        let filename = options
            .output_template
            .with_file_name(format!("{title}.mp4"))
            .to_string_lossy()
            .to_string();

        Ok(ExtractedInfo {
            title: Some(title),
            filename: Some(filename),
            filesize: Some(1024),
        })
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        Ok(MediaInfo {
            url: url.to_string(),
            title: Some("Probe".to_string()),
            ..MediaInfo::default()
        })
    }
}
