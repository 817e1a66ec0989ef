//! Converter
//!
//! Runs ffmpeg over an already downloaded file with one of two canned
//! command templates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::tool_manager::{run_with_timeout, Tool};

/// Upper bound for one transcode.
pub const CONVERT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertPreset {
    /// Remux without re-encoding (container change only).
    StreamCopy,
    /// Re-encode video scaled to `height`, keeping the audio stream.
    Scale { height: u32 },
}

impl ConvertPreset {
    pub fn ffmpeg_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];
        match self {
            ConvertPreset::StreamCopy => {
                args.push("-c".to_string());
                args.push("copy".to_string());
            }
            ConvertPreset::Scale { height } => {
                args.push("-vf".to_string());
                args.push(format!("scale=-2:{height}"));
                args.push("-c:a".to_string());
                args.push("copy".to_string());
            }
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl fmt::Display for ConvertPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertPreset::StreamCopy => f.write_str("copy"),
            ConvertPreset::Scale { height } => write!(f, "{height}p"),
        }
    }
}

impl FromStr for ConvertPreset {
    type Err = String;

    /// `"copy"`, or a target height such as `"720"` / `"720p"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "copy" {
            return Ok(ConvertPreset::StreamCopy);
        }
        let digits = s.strip_suffix('p').unwrap_or(&s);
        match digits.parse::<u32>() {
            Ok(height) if height > 0 => Ok(ConvertPreset::Scale { height }),
            _ => Err(format!("unknown conversion preset: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Converter {
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

impl Converter {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            timeout: CONVERT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Convert `input` into `output`, overwriting it.
    pub async fn convert(&self, input: &Path, output: &Path, preset: ConvertPreset) -> Result<PathBuf> {
        if !input.is_file() {
            return Err(AppError::validation(format!(
                "input file does not exist: {}",
                input.display()
            )));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(AppError::MissingDirectory(parent.to_path_buf()));
            }
        }

        let args = preset.ffmpeg_args(input, output);
        log::info!("Converting {} ({}) with args: {:?}", input.display(), preset, args);

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args);
        run_with_timeout(cmd, Tool::Ffmpeg.as_str(), self.timeout).await?;

        log::info!("Conversion finished: {}", output.display());
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_copy_args() {
        let args = ConvertPreset::StreamCopy.ffmpeg_args(Path::new("in.webm"), Path::new("out.mp4"));
        assert_eq!(args, vec!["-y", "-i", "in.webm", "-c", "copy", "out.mp4"]);
    }

    #[test]
    fn scale_args() {
        let args = ConvertPreset::Scale { height: 480 }
            .ffmpeg_args(Path::new("in.mp4"), Path::new("out.mp4"));
        assert_eq!(
            args,
            vec!["-y", "-i", "in.mp4", "-vf", "scale=-2:480", "-c:a", "copy", "out.mp4"]
        );
    }

    #[test]
    fn parses_presets() {
        assert_eq!("copy".parse(), Ok(ConvertPreset::StreamCopy));
        assert_eq!("720p".parse(), Ok(ConvertPreset::Scale { height: 720 }));
        assert!("0".parse::<ConvertPreset>().is_err());
        assert!("fast".parse::<ConvertPreset>().is_err());
    }

    #[tokio::test]
    async fn missing_input_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        // The ffmpeg path doesn't exist either; validation must come first.
        let converter = Converter::new(dir.path().join("no-ffmpeg"));
        let err = converter
            .convert(
                &dir.path().join("missing.webm"),
                &dir.path().join("out.mp4"),
                ConvertPreset::StreamCopy,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.webm");
        std::fs::write(&input, b"x").unwrap();

        let converter = Converter::new(dir.path().join("no-ffmpeg"));
        let err = converter
            .convert(&input, &dir.path().join("out.mp4"), ConvertPreset::StreamCopy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolMissing { .. }));
    }
}
