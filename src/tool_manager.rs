//! Tool Manager
//!
//! Discovery and version checks for the external tools (yt-dlp, ffmpeg), and
//! the package-manager upgrade of yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{AppError, Result};

/// External tools mediagrab drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    YtDlp,
    Ffmpeg,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::YtDlp => "yt-dlp",
            Tool::Ffmpeg => "ffmpeg",
        }
    }

    pub fn binary_name(&self) -> &'static str {
        #[cfg(target_os = "windows")]
        {
            match self {
                Tool::YtDlp => "yt-dlp.exe",
                Tool::Ffmpeg => "ffmpeg.exe",
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            match self {
                Tool::YtDlp => "yt-dlp",
                Tool::Ffmpeg => "ffmpeg",
            }
        }
    }

    pub fn version_args(&self) -> &[&str] {
        match self {
            Tool::YtDlp => &["--version"],
            Tool::Ffmpeg => &["-version"],
        }
    }
}

/// Captured output of a finished tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Result of [`ToolManager::upgrade_extractor`].
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl UpgradeReport {
    pub fn changed(&self) -> bool {
        self.current.is_some() && self.previous != self.current
    }
}

#[derive(Debug, Clone)]
pub struct ToolManagerConfig {
    /// Extra directory searched before the usual install locations.
    pub bundled_dir: Option<PathBuf>,
    pub version_timeout: Duration,
    pub upgrade_timeout: Duration,
}

impl Default for ToolManagerConfig {
    fn default() -> Self {
        Self {
            bundled_dir: None,
            version_timeout: Duration::from_secs(10),
            upgrade_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    config: ToolManagerConfig,
}

impl ToolManager {
    pub fn new(config: ToolManagerConfig) -> Self {
        Self { config }
    }

    /// Find a tool binary.
    ///
    /// Priority:
    /// 1. Configured bundled directory
    /// 2. Next to the running executable (and a sibling `Resources/`)
    /// 3. Common install locations (Homebrew, pip --user, pipx, MacPorts)
    /// 4. System PATH
    pub fn find_tool(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(ref dir) = self.config.bundled_dir {
            let path = dir.join(tool.binary_name());
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let sidecar_path = exe_dir.join(tool.binary_name());
                if sidecar_path.exists() {
                    log::info!("Found bundled {} at: {:?}", tool.as_str(), sidecar_path);
                    return Some(sidecar_path);
                }

                if let Some(parent) = exe_dir.parent() {
                    let resources_path = parent.join("Resources").join(tool.binary_name());
                    if resources_path.exists() {
                        log::info!(
                            "Found bundled {} in Resources at: {:?}",
                            tool.as_str(),
                            resources_path
                        );
                        return Some(resources_path);
                    }
                }
            }
        }

        for path in common_paths(tool) {
            if path.exists() {
                log::info!("Found {} at: {:?}", tool.as_str(), path);
                return Some(path);
            }
        }

        which::which(tool.binary_name()).ok()
    }

    /// [`find_tool`](Self::find_tool), falling back to the bare binary name
    /// so the OS resolves it (and a spawn reports it missing).
    pub fn tool_path(&self, tool: Tool) -> PathBuf {
        self.find_tool(tool).unwrap_or_else(|| {
            log::warn!(
                "Could not find {} in common paths, falling back to PATH lookup",
                tool.as_str()
            );
            PathBuf::from(tool.binary_name())
        })
    }

    /// Installed version of `tool`.
    pub async fn version(&self, tool: Tool) -> Result<String> {
        self.version_at(&self.tool_path(tool), tool).await
    }

    pub async fn version_at(&self, path: &Path, tool: Tool) -> Result<String> {
        let mut cmd = Command::new(path);
        cmd.args(tool.version_args());

        let output = run_with_timeout(cmd, tool.as_str(), self.config.version_timeout).await?;
        parse_version(&output.stdout, tool).ok_or_else(|| AppError::ToolFailed {
            tool: tool.as_str().to_string(),
            code: Some(0),
            stderr: "could not parse version output".to_string(),
        })
    }

    /// Upgrade yt-dlp through pip, then report the version before and after.
    pub async fn upgrade_extractor(&self) -> Result<UpgradeReport> {
        let previous = self.version(Tool::YtDlp).await.ok();

        let python = find_python().ok_or_else(|| AppError::ToolMissing {
            tool: "python".to_string(),
        })?;
        log::info!("Updating yt-dlp with {}", python.display());

        let mut cmd = Command::new(&python);
        cmd.args(["-m", "pip", "install", "--upgrade", "yt-dlp"]);
        let output = run_with_timeout(cmd, "pip", self.config.upgrade_timeout).await?;
        if let Some(last) = output.stdout.lines().last() {
            log::info!("pip: {}", last);
        }

        let current = self.version(Tool::YtDlp).await.ok();
        Ok(UpgradeReport { previous, current })
    }
}

fn common_paths(tool: Tool) -> Vec<PathBuf> {
    let name = tool.binary_name();
    let mut paths: Vec<PathBuf> = [
        // Homebrew on Apple Silicon
        "/opt/homebrew/bin",
        // Homebrew on Intel Mac
        "/usr/local/bin",
        "/usr/bin",
        // MacPorts
        "/opt/local/bin",
    ]
    .iter()
    .map(|dir| Path::new(dir).join(name))
    .collect();

    if let Some(home) = dirs::home_dir() {
        // pip install --user
        paths.push(home.join(".local").join("bin").join(name));
        if tool == Tool::YtDlp {
            // pipx
            paths.push(
                home.join(".local/pipx/venvs/yt-dlp/bin")
                    .join(name),
            );
        }
    }
    paths
}

fn find_python() -> Option<PathBuf> {
    ["python3", "python"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Run a command to completion with a timeout, capturing its output.
///
/// A missing binary maps to `ToolMissing`, a non-zero exit to `ToolFailed`
/// and an elapsed timeout to `ToolTimeout` (the child is killed).
pub async fn run_with_timeout(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<ToolOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Hide console window on Windows
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            AppError::Io(e)
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(res) => res?,
        Err(_) => {
            log::warn!("{} timed out after {:?}", tool, timeout);
            return Err(AppError::ToolTimeout {
                tool: tool.to_string(),
                after: timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(AppError::ToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn parse_version(output: &str, tool: Tool) -> Option<String> {
    let first_line = output.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }

    match tool {
        Tool::YtDlp => {
            // yt-dlp outputs just the version number, e.g., "2024.01.01"
            Some(first_line.to_string())
        }
        Tool::Ffmpeg => {
            // "ffmpeg version 6.1.1 Copyright (c) ..."
            let parts: Vec<&str> = first_line.split_whitespace().collect();
            if parts.len() >= 3 && parts[0] == "ffmpeg" {
                Some(parts[2].to_string())
            } else {
                Some(first_line.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_ytdlp() {
        let output = "2024.01.01\n";
        assert_eq!(
            parse_version(output, Tool::YtDlp),
            Some("2024.01.01".to_string())
        );
        assert_eq!(parse_version("", Tool::YtDlp), None);
    }

    #[test]
    fn test_parse_version_ffmpeg() {
        let output = "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers\n";
        assert_eq!(
            parse_version(output, Tool::Ffmpeg),
            Some("6.1.1".to_string())
        );
    }

    #[test]
    fn test_tool_binary_names() {
        #[cfg(target_os = "windows")]
        {
            assert_eq!(Tool::YtDlp.binary_name(), "yt-dlp.exe");
            assert_eq!(Tool::Ffmpeg.binary_name(), "ffmpeg.exe");
        }
        #[cfg(not(target_os = "windows"))]
        {
            assert_eq!(Tool::YtDlp.binary_name(), "yt-dlp");
            assert_eq!(Tool::Ffmpeg.binary_name(), "ffmpeg");
        }
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let cmd = Command::new("mediagrab-no-such-binary");
        let err = run_with_timeout(cmd, "nothing", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolMissing { ref tool } if tool == "nothing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_with_timeout_maps_exit_and_timeout() {
        let mut ok = Command::new("sh");
        ok.args(["-c", "echo hello"]);
        let out = run_with_timeout(ok, "sh", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");

        let mut failing = Command::new("sh");
        failing.args(["-c", "echo boom >&2; exit 3"]);
        match run_with_timeout(failing, "sh", Duration::from_secs(5)).await {
            Err(AppError::ToolFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut slow = Command::new("sh");
        slow.args(["-c", "sleep 5"]);
        let err = run_with_timeout(slow, "sh", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolTimeout { .. }));
        assert!(err.is_retryable());
    }
}
