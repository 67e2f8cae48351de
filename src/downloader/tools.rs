// External tool discovery (yt-dlp binary, python yt_dlp module, ffmpeg)

use serde::Serialize;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    PythonYtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::PythonYtDlp => "python yt_dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Probes the configured commands for the health endpoint
pub struct ToolManager {
    ytdlp_bin: String,
    python_bin: String,
    ffmpeg_bin: String,
}

impl ToolManager {
    pub fn new(ytdlp_bin: impl Into<String>, python_bin: impl Into<String>, ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ytdlp_bin: ytdlp_bin.into(),
            python_bin: python_bin.into(),
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let (path, version) = match tool_type {
            ToolType::YtDlp => (
                Some(self.ytdlp_bin.clone()),
                run_version(&self.ytdlp_bin, &["--version"]),
            ),
            ToolType::PythonYtDlp => (
                Some(self.python_bin.clone()),
                run_version(&self.python_bin, &["-m", "yt_dlp", "--version"]),
            ),
            ToolType::Ffmpeg => (
                Some(self.ffmpeg_bin.clone()),
                run_version(&self.ffmpeg_bin, &["-version"]).map(|v| {
                    // "ffmpeg version 6.1.1 Copyright ..." -> "6.1.1"
                    v.split_whitespace().nth(2).unwrap_or(&v).to_string()
                }),
            ),
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            is_available: version.is_some(),
            version,
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp),
            self.get_tool_info(ToolType::PythonYtDlp),
            self.get_tool_info(ToolType::Ffmpeg),
        ]
    }
}

/// First stdout line of a successful version command
fn run_version(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).stdin(Stdio::null()).output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        _ => None,
    }
}

/// Find yt-dlp executable in common paths
pub fn find_ytdlp() -> String {
    let common_paths = [
        "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
        "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac / pip --user on Linux
        "/usr/bin/yt-dlp",          // System installation
    ];

    for path in common_paths {
        if std::path::Path::new(path).exists() {
            return path.to_string();
        }
    }

    if let Ok(output) = Command::new("which").arg("yt-dlp").output() {
        if output.status.success() {
            if let Ok(path) = String::from_utf8(output.stdout) {
                let trimmed = path.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    // Last resort: hope it's in PATH
    "yt-dlp".to_string()
}
