use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{AppError, FailureCode, Result};
use crate::models::{ExtractedInfo, MediaInfo, Progress, ProgressUpdate};
use crate::options::RequestOptions;

const TOOL: &str = "yt-dlp";

/// Synchronous progress callback, invoked from inside [`Extractor::extract`].
pub type ProgressFn<'a> = &'a (dyn Fn(ProgressUpdate) + Send + Sync);

/// The extraction library as the rest of the crate sees it.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download `url` with `options`. Resolves once the media (and any
    /// post-processing) is finished; there is no timeout.
    async fn extract(
        &self,
        url: &str,
        options: &RequestOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<ExtractedInfo>;

    /// Metadata only; nothing is downloaded.
    async fn probe(&self, url: &str) -> Result<MediaInfo>;
}

/// Where to find yt-dlp and how to call it.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,

    /// Extra arguments injected into every call (e.g. a proxy).
    pub global_args: Vec<String>,

    /// Timeout for metadata probes (not for downloads).
    pub metadata_timeout: Duration,
}

impl YtDlpConfig {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self {
            yt_dlp_path,
            ffmpeg_path: None,
            global_args: vec![],
            metadata_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg_path: Option<PathBuf>) -> Self {
        self.ffmpeg_path = ffmpeg_path;
        self
    }
}

/// [`Extractor`] backed by the yt-dlp executable.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    cfg: YtDlpConfig,
}

impl YtDlpExtractor {
    pub fn new(cfg: YtDlpConfig) -> Self {
        Self { cfg }
    }

    pub fn yt_dlp_path(&self) -> &Path {
        &self.cfg.yt_dlp_path
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cfg.yt_dlp_path);
        cmd.args(&self.cfg.global_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }

    fn download_args(&self, url: &str, options: &RequestOptions) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "--progress-template".to_string(),
            POSTPROCESS_TEMPLATE.to_string(),
            "--print".to_string(),
            RESULT_TEMPLATE.to_string(),
        ];

        args.extend(options.to_args());

        if let Some(ref ffmpeg_path) = self.cfg.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg_path.to_string_lossy().to_string());
        }

        // URL last
        args.push(url.to_string());
        args
    }
}

/// Raw numeric fields, `|`-separated; unknown values print as `NA`.
/// `[mediagrab] 52953088|104857600|NA|1572864.0|30`
const PROGRESS_TEMPLATE: &str = "download:[mediagrab] %(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s";
/// `[mediagrab-pp] Merger started`
const POSTPROCESS_TEMPLATE: &str =
    "postprocess:[mediagrab-pp] %(progress.postprocessor)s %(progress.status)s";
/// One JSON object describing the final file, printed after it is moved into place.
const RESULT_TEMPLATE: &str = "after_move:%(.{title,filepath,filesize,filesize_approx})j";

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        url: &str,
        options: &RequestOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<ExtractedInfo> {
        let args = self.download_args(url, options);
        log::info!("Starting yt-dlp with args: {:?}", args);

        let mut cmd = self.command();
        cmd.args(&args);
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture yt-dlp stderr"))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let parser = LineParser::new();
        let mut tracker = OutputTracker::default();
        let mut stderr_lines: Vec<String> = Vec::new();

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_reader.next_line(), if stdout_open => {
                    match line {
                        Ok(Some(l)) => {
                            log::debug!("yt-dlp stdout: {}", l);
                            tracker.observe(&parser, &l, on_progress);
                        }
                        Ok(None) => stdout_open = false,
                        Err(e) => {
                            log::error!("Error reading yt-dlp stdout: {}", e);
                            stdout_open = false;
                        }
                    }
                }
                line = stderr_reader.next_line(), if stderr_open => {
                    match line {
                        Ok(Some(l)) => {
                            log::debug!("yt-dlp stderr: {}", l);
                            // In quiet mode progress lines can land on stderr.
                            if !tracker.observe(&parser, &l, on_progress) {
                                stderr_lines.push(l);
                            }
                        }
                        Ok(None) => stderr_open = false,
                        Err(e) => {
                            log::error!("Error reading yt-dlp stderr: {}", e);
                            stderr_open = false;
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr_text = stderr_lines.join("\n");
            return Err(AppError::Extraction {
                code: classify_error(&stderr_text),
                message: failure_message(&stderr_text, status.code()),
            });
        }

        tracker.into_info().await
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        let mut cmd = self.command();
        cmd.args([
            "--dump-json",
            "--no-warnings",
            "--no-playlist",
            "--skip-download",
            url,
        ]);

        let timeout = self.cfg.metadata_timeout;
        let child = cmd.spawn().map_err(spawn_error)?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => {
                // The child is dropped with the future and killed.
                return Err(AppError::ToolTimeout {
                    tool: TOOL.to_string(),
                    after: timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr_text = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Extraction {
                code: classify_error(&stderr_text),
                message: failure_message(&stderr_text, output.status.code()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout
            .lines()
            .find(|l| looks_like_json_object(l))
            .ok_or_else(|| AppError::Extraction {
                code: FailureCode::Unknown,
                message: "yt-dlp returned no JSON output".to_string(),
            })?;

        parse_media_info(first, url)
    }
}

fn spawn_error(e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppError::ToolMissing {
            tool: TOOL.to_string(),
        }
    } else {
        AppError::Io(e)
    }
}

/// Recognized kinds of yt-dlp output lines.
#[derive(Debug, Clone, PartialEq)]
enum Line {
    Progress(Progress),
    PostProcessing(String),
    Destination(String),
    Result(Value),
    Other,
}

struct LineParser {
    progress_re: Option<Regex>,
    fallback_progress_re: Option<Regex>,
    fallback_progress_re2: Option<Regex>,
    postprocess_re: Option<Regex>,
    merge_re: Option<Regex>,
    dest_re: Option<Regex>,
    already_re: Option<Regex>,
}

impl LineParser {
    fn new() -> Self {
        Self {
            progress_re: Regex::new(
                r"\[mediagrab\]\s+([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|([^|\s]*)",
            )
            .ok(),
            // Standard line: [download]  50.5% of ~100.00MiB at 1.50MiB/s ETA 00:30
            fallback_progress_re: Regex::new(
                r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\S+)\s+at\s+(\S+)\s+ETA\s+(\S+)",
            )
            .ok(),
            fallback_progress_re2: Regex::new(r"\[download\]\s+(\d+\.?\d*)%").ok(),
            postprocess_re: Regex::new(r"\[mediagrab-pp\]\s+(\S+)\s+started").ok(),
            merge_re: Regex::new(r"\[Merger\]|Merging formats").ok(),
            dest_re: Regex::new(r"\[download\] Destination: (.+)").ok(),
            already_re: Regex::new(r"\[download\] (.+) has already been downloaded").ok(),
        }
    }

    fn parse(&self, line: &str) -> Line {
        if looks_like_json_object(line) {
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                return Line::Result(v);
            }
        }

        if let Some(caps) = self.progress_re.as_ref().and_then(|re| re.captures(line)) {
            let field = |i: usize| caps.get(i).and_then(|m| parse_raw_number(m.as_str()));
            let downloaded = field(1);
            let total = field(2).or_else(|| field(3)).filter(|&t| t > 0);
            let percent = match (downloaded, total) {
                (Some(d), Some(t)) => Some((d as f64 / t as f64 * 100.0).min(100.0)),
                _ => None,
            };
            return Line::Progress(Progress {
                percent,
                bytes_downloaded: downloaded,
                bytes_total: total,
                speed_bps: field(4),
                eta_seconds: field(5),
            });
        }

        if let Some(caps) = self.postprocess_re.as_ref().and_then(|re| re.captures(line)) {
            let step = caps.get(1).map(|m| m.as_str()).unwrap_or("Post-processing");
            return Line::PostProcessing(describe_postprocessor(step));
        }

        if let Some(caps) = self.dest_re.as_ref().and_then(|re| re.captures(line)) {
            return Line::Destination(caps[1].trim().to_string());
        }

        if let Some(caps) = self.already_re.as_ref().and_then(|re| re.captures(line)) {
            return Line::Destination(caps[1].trim().to_string());
        }

        if let Some(caps) = self
            .fallback_progress_re
            .as_ref()
            .and_then(|re| re.captures(line))
        {
            return Line::Progress(Progress {
                percent: caps.get(1).and_then(|m| parse_percent(m.as_str())),
                bytes_total: caps.get(2).and_then(|m| parse_bytes(m.as_str())),
                speed_bps: caps.get(3).and_then(|m| parse_speed(m.as_str())),
                eta_seconds: caps.get(4).and_then(|m| parse_eta(m.as_str())),
                bytes_downloaded: None,
            });
        }

        if let Some(caps) = self
            .fallback_progress_re2
            .as_ref()
            .and_then(|re| re.captures(line))
        {
            return Line::Progress(Progress {
                percent: caps.get(1).and_then(|m| parse_percent(m.as_str())),
                ..Progress::default()
            });
        }

        if self.merge_re.as_ref().is_some_and(|re| re.is_match(line)) {
            return Line::PostProcessing("Merging streams".to_string());
        }

        Line::Other
    }
}

/// Accumulates what a running download has told us so far.
#[derive(Debug, Default)]
struct OutputTracker {
    result: Option<Value>,
    destination: Option<String>,
    finished: bool,
}

impl OutputTracker {
    /// Feed one output line; returns `false` if the line wasn't recognized.
    fn observe(&mut self, parser: &LineParser, line: &str, on_progress: ProgressFn<'_>) -> bool {
        match parser.parse(line) {
            Line::Progress(p) => {
                let done = p.percent.is_some_and(|v| v >= 100.0);
                on_progress(ProgressUpdate::Downloading(p));
                if done && !self.finished {
                    self.finished = true;
                    on_progress(ProgressUpdate::Finished);
                } else if !done {
                    // A second stream (audio after video) starts over.
                    self.finished = false;
                }
            }
            Line::PostProcessing(step) => on_progress(ProgressUpdate::PostProcessing { step }),
            Line::Destination(path) => self.destination = Some(path),
            Line::Result(v) => self.result = Some(v),
            Line::Other => return false,
        }
        true
    }

    async fn into_info(self) -> Result<ExtractedInfo> {
        let str_field = |key: &str| {
            self.result
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(|x| x.as_str())
                .map(|s| s.to_string())
        };
        let u64_field = |key: &str| {
            self.result
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(|x| x.as_u64().or_else(|| x.as_f64().map(|f| f as u64)))
        };

        let title = str_field("title");
        let filename = str_field("filepath").or_else(|| self.destination.clone());
        let mut filesize = u64_field("filesize").or_else(|| u64_field("filesize_approx"));

        // Merged and transcoded files have no reported size; ask the filesystem.
        if let Some(ref path) = filename {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                filesize = Some(meta.len());
            }
        }

        Ok(ExtractedInfo {
            title,
            filename,
            filesize,
        })
    }
}

fn describe_postprocessor(name: &str) -> String {
    match name {
        "Merger" => "Merging streams".to_string(),
        "ExtractAudio" => "Extracting audio".to_string(),
        "MoveFiles" => "Moving files".to_string(),
        other => other.to_string(),
    }
}

fn looks_like_json_object(s: &str) -> bool {
    let t = s.trim();
    t.starts_with('{') && t.ends_with('}')
}

fn parse_media_info(json_line: &str, fallback_url: &str) -> Result<MediaInfo> {
    let v: Value = serde_json::from_str(json_line)?;

    let str_field = |key: &str| v.get(key).and_then(|x| x.as_str()).map(|s| s.to_string());
    let u64_field = |key: &str| {
        v.get(key)
            .and_then(|x| x.as_u64().or_else(|| x.as_f64().map(|f| f as u64)))
    };

    Ok(MediaInfo {
        url: str_field("webpage_url").unwrap_or_else(|| fallback_url.to_string()),
        title: str_field("title"),
        uploader: str_field("uploader").or_else(|| str_field("channel")),
        duration_seconds: u64_field("duration"),
        view_count: u64_field("view_count"),
        thumbnail_url: str_field("thumbnail"),
    })
}

/// A raw template field: an integer or float, or `NA`/`None` when unknown.
fn parse_raw_number(s: &str) -> Option<u64> {
    let v = s.trim().parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0).then(|| v as u64)
}

fn parse_percent(s: &str) -> Option<f64> {
    let cleaned = s.trim_end_matches('%').trim();
    cleaned.parse::<f64>().ok()
}

fn parse_speed(s: &str) -> Option<u64> {
    // Format: "1.5MiB/s" or "500KiB/s"
    parse_bytes(s.trim().trim_end_matches("/s"))
}

fn parse_eta(s: &str) -> Option<u64> {
    // Format: "00:05:30" or "05:30" or "30" or "N/A"
    let s = s.trim();
    if s == "N/A" || s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        1 => parts[0].parse::<u64>().ok(),
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            Some(mins * 60 + secs)
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            Some(hours * 3600 + mins * 60 + secs)
        }
        _ => None,
    }
}

fn parse_bytes(s: &str) -> Option<u64> {
    // Format: "1.5GiB" or "500MiB" or "N/A"
    let s = s.trim().trim_start_matches('~');
    if s == "N/A" || s.is_empty() {
        return None;
    }

    static BYTES_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = BYTES_RE
        .get_or_init(|| Regex::new(r"([\d.]+)\s*(Ki?B|Mi?B|Gi?B|B)").ok())
        .as_ref()?;
    let caps = re.captures(s)?;
    let num: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();

    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KB" | "KiB" => 1024.0,
        "MB" | "MiB" => 1024.0 * 1024.0,
        "GB" | "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };

    Some((num * multiplier) as u64)
}

/// Classify yt-dlp stderr into a stable failure code.
pub fn classify_error(stderr: &str) -> FailureCode {
    let stderr_lower = stderr.to_lowercase();

    // Sign-in / cookies required
    if stderr_lower.contains("sign in")
        || stderr_lower.contains("login")
        || stderr_lower.contains("cookies")
        || stderr_lower.contains("age-restricted")
    {
        return FailureCode::LoginRequired;
    }

    // Bot check / CAPTCHA
    if stderr_lower.contains("captcha")
        || stderr_lower.contains("not a bot")
        || stderr_lower.contains("confirm you're not")
    {
        return FailureCode::BotCheck;
    }

    if stderr_lower.contains("not available in your country")
        || stderr_lower.contains("geo restrict")
        || stderr_lower.contains("geo-restrict")
        || stderr_lower.contains("blocked")
    {
        return FailureCode::GeoRestricted;
    }

    if stderr_lower.contains("requested format") || stderr_lower.contains("format not available") {
        return FailureCode::FormatUnavailable;
    }

    if stderr_lower.contains("unsupported url")
        || stderr_lower.contains("no video formats")
        || stderr_lower.contains("unable to extract")
    {
        return FailureCode::ExtractorOutdated;
    }

    if stderr_lower.contains("network")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("timed out")
        || stderr_lower.contains("name resolution")
    {
        return FailureCode::Network;
    }

    FailureCode::Unknown
}

/// The message shown for a failed run: yt-dlp's own `ERROR:` line when
/// present, otherwise the tail of stderr.
fn failure_message(stderr: &str, exit_code: Option<i32>) -> String {
    if let Some(line) = stderr.lines().rev().find(|l| l.starts_with("ERROR:")) {
        return line.trim().to_string();
    }

    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return format!("yt-dlp exited with status {:?}", exit_code);
    }

    const MAX_CHARS: usize = 500;
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() > MAX_CHARS {
        let tail: String = chars[chars.len() - MAX_CHARS..].iter().collect();
        format!("…{}", tail)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("50.5%"), Some(50.5));
        assert_eq!(parse_percent("100%"), Some(100.0));
        assert_eq!(parse_percent("N/A"), None);
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("1.5MiB/s"), Some(1572864));
        assert_eq!(parse_speed("500KiB/s"), Some(512000));
        assert_eq!(parse_speed("N/A"), None);
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("30"), Some(30));
        assert_eq!(parse_eta("05:30"), Some(330));
        assert_eq!(parse_eta("01:05:30"), Some(3930));
        assert_eq!(parse_eta("N/A"), None);
    }

    #[test]
    fn test_classify_error_login() {
        assert_eq!(
            classify_error("ERROR: Sign in to confirm your age"),
            FailureCode::LoginRequired
        );
    }

    #[test]
    fn test_classify_error_geo() {
        assert_eq!(
            classify_error("Video not available in your country"),
            FailureCode::GeoRestricted
        );
    }

    #[test]
    fn test_classify_error_unsupported_and_network() {
        assert_eq!(
            classify_error("ERROR: Unsupported URL: https://example.com"),
            FailureCode::ExtractorOutdated
        );
        assert_eq!(
            classify_error("ERROR: Unable to download webpage: <urlopen error timed out>"),
            FailureCode::Network
        );
        assert_eq!(classify_error("something odd"), FailureCode::Unknown);
    }

    #[test]
    fn failure_message_prefers_error_line() {
        let stderr = "WARNING: slow\nERROR: [generic] Unsupported URL: x\n";
        assert_eq!(
            failure_message(stderr, Some(1)),
            "ERROR: [generic] Unsupported URL: x"
        );
        assert_eq!(
            failure_message("", Some(2)),
            "yt-dlp exited with status Some(2)"
        );
    }

    #[test]
    fn parses_custom_progress_template() {
        let parser = LineParser::new();
        let line = "[mediagrab] 52428800|104857600|NA|1572864.0|30";
        assert_eq!(
            parser.parse(line),
            Line::Progress(Progress {
                percent: Some(50.0),
                bytes_downloaded: Some(52428800),
                bytes_total: Some(104857600),
                speed_bps: Some(1572864),
                eta_seconds: Some(30),
            })
        );
    }

    #[test]
    fn unknown_speed_and_eta_keep_the_other_fields_in_place() {
        let parser = LineParser::new();
        let line = "[mediagrab] 1048576|NA|4194304.5|NA|NA";
        assert_eq!(
            parser.parse(line),
            Line::Progress(Progress {
                percent: Some(25.0),
                bytes_downloaded: Some(1048576),
                bytes_total: Some(4194304),
                speed_bps: None,
                eta_seconds: None,
            })
        );
    }

    #[test]
    fn parses_standard_progress_and_destination() {
        let parser = LineParser::new();
        match parser.parse("[download]  12.0% of ~10.00MiB at 1.00MiB/s ETA 00:09") {
            Line::Progress(p) => {
                assert_eq!(p.percent, Some(12.0));
                assert_eq!(p.bytes_total, Some(10485760));
                assert_eq!(p.eta_seconds, Some(9));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            parser.parse("[download] Destination: /tmp/Song.webm"),
            Line::Destination("/tmp/Song.webm".to_string())
        );
        assert_eq!(
            parser.parse("[mediagrab-pp] Merger started"),
            Line::PostProcessing("Merging streams".to_string())
        );
        assert_eq!(parser.parse("[youtube] abc: Downloading webpage"), Line::Other);
    }

    #[tokio::test]
    async fn tracker_reports_finished_once_per_stream_and_collects_result() {
        let parser = LineParser::new();
        let seen: Mutex<Vec<ProgressUpdate>> = Mutex::new(Vec::new());
        let cb = |u: ProgressUpdate| seen.lock().unwrap().push(u);

        let mut tracker = OutputTracker::default();
        for line in [
            "[mediagrab] 1048576|2097152|NA|1048576.0|1",
            "[mediagrab] 2097152|2097152|NA|1048576.0|0",
            "[mediagrab] 2097152|2097152|NA|NA|NA",
            r#"{"title": "Song", "filepath": "/nonexistent/Song.mp3", "filesize": null, "filesize_approx": 2097152}"#,
        ] {
            assert!(tracker.observe(&parser, line, &cb));
        }

        let finished = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches!(u, ProgressUpdate::Finished))
            .count();
        assert_eq!(finished, 1);

        let info = tracker.into_info().await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Song"));
        assert_eq!(info.filename.as_deref(), Some("/nonexistent/Song.mp3"));
        assert_eq!(info.filesize, Some(2097152));
    }

    #[test]
    fn parses_media_info() {
        let json = r#"{"webpage_url":"https://example.com/w","title":"T","uploader":"U","duration":61.5,"view_count":10,"thumbnail":"https://i/x.jpg"}"#;
        let info = parse_media_info(json, "https://fallback").unwrap();
        assert_eq!(info.url, "https://example.com/w");
        assert_eq!(info.title.as_deref(), Some("T"));
        assert_eq!(info.duration_seconds, Some(61));
        assert_eq!(info.view_count, Some(10));
    }

    #[test]
    fn download_args_end_with_url() {
        let extractor = YtDlpExtractor::new(
            YtDlpConfig::new(PathBuf::from("yt-dlp")).with_ffmpeg(Some(PathBuf::from("/bin/ffmpeg"))),
        );
        let request = crate::models::DownloadRequest::new("https://example.com/v", PathBuf::from("/d"));
        let args = extractor.download_args(&request.url, &crate::options::build_options(&request));

        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
        assert!(args.contains(&"bestvideo+bestaudio/best".to_string()));
    }
}
