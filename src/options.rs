//! Options Builder
//!
//! Pure translation from a [`DownloadRequest`] to the extractor's request
//! options, and from those options to a yt-dlp argument vector. Nothing here
//! validates URLs, language tags or cookie files; the extractor reports those
//! problems when it runs.

use std::path::PathBuf;

use serde::Serialize;

use crate::models::{DownloadRequest, QualitySelector};

/// Container used when separate video and audio streams are merged.
pub const MERGE_CONTAINER: &str = "mp4";
/// Codec audio-only downloads are transcoded to.
pub const AUDIO_CODEC: &str = "mp3";
/// Target bitrate (kbps) for audio-only downloads.
pub const AUDIO_BITRATE_KBPS: u32 = 192;
/// Output file name template; the extractor substitutes title and extension.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Post-download audio extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioExtraction {
    pub codec: String,
    pub bitrate_kbps: u32,
}

/// Request options handed to the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestOptions {
    pub output_template: PathBuf,
    pub format: String,
    pub merge_output_format: Option<String>,
    pub extract_audio: Option<AudioExtraction>,
    pub write_subtitles: bool,
    pub subtitle_langs: Vec<String>,
    /// Bytes per second.
    pub rate_limit: Option<u64>,
    pub cookie_file: Option<PathBuf>,
}

/// Build the extractor options for one request.
pub fn build_options(request: &DownloadRequest) -> RequestOptions {
    let (format, merge_output_format, extract_audio) = match request.quality {
        QualitySelector::Audio => (
            "bestaudio/best".to_string(),
            None,
            Some(AudioExtraction {
                codec: AUDIO_CODEC.to_string(),
                bitrate_kbps: AUDIO_BITRATE_KBPS,
            }),
        ),
        QualitySelector::Best => (
            "bestvideo+bestaudio/best".to_string(),
            Some(MERGE_CONTAINER.to_string()),
            None,
        ),
        QualitySelector::MaxHeight(h) => (
            format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
            Some(MERGE_CONTAINER.to_string()),
            None,
        ),
    };

    let subtitle_langs = if request.subtitles {
        vec![request.subtitle_language.clone()]
    } else {
        vec![]
    };

    let rate_limit = request
        .rate_limit_kbps
        .filter(|kbps| *kbps > 0)
        .map(|kbps| u64::from(kbps) * 1024);

    RequestOptions {
        output_template: request.destination.join(OUTPUT_TEMPLATE),
        format,
        merge_output_format,
        extract_audio,
        write_subtitles: request.subtitles,
        subtitle_langs,
        rate_limit,
        cookie_file: request.cookie_file.clone(),
    }
}

impl RequestOptions {
    /// Render these options as yt-dlp command-line arguments (URL excluded).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            self.output_template.to_string_lossy().to_string(),
            "-f".to_string(),
            self.format.clone(),
        ];

        if let Some(ref container) = self.merge_output_format {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }

        if let Some(ref audio) = self.extract_audio {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(audio.codec.clone());
            args.push("--audio-quality".to_string());
            args.push(format!("{}K", audio.bitrate_kbps));
        }

        if self.write_subtitles {
            args.push("--write-subs".to_string());
            if !self.subtitle_langs.is_empty() {
                args.push("--sub-langs".to_string());
                args.push(self.subtitle_langs.join(","));
            }
        }

        if let Some(rate) = self.rate_limit {
            args.push("--limit-rate".to_string());
            args.push(rate.to_string());
        }

        if let Some(ref cookies) = self.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        args
    }
}
