// Shared yt-dlp plumbing for the python-module and CLI backends
//
// Both backends run the same program with different launchers, so the
// argument building, catalog parsing and progress scraping live here.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::downloader::diagnostics::{diagnose_error, error_context};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{CanonicalSource, FormatDescriptor, VideoCatalog};
use crate::downloader::traits::ProgressEmitter;
use crate::downloader::utils::run_output_with_timeout;

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(r"\[download\]\s+(\d+\.?\d*)%").unwrap();
    static ref NOTE_NUMBER_RE: Regex = Regex::new(r"(\d+)").unwrap();
}

/// One way of launching yt-dlp (`python3 -m yt_dlp` or the binary)
#[derive(Debug, Clone)]
pub struct YtDlpInvoker {
    /// Tag used in log lines
    label: &'static str,
    program: String,
    /// Arguments placed before any yt-dlp option (e.g. `-m yt_dlp`)
    launcher_args: Vec<String>,
    player_client: Option<String>,
    proxy: Option<String>,
    catalog_timeout_secs: u64,
}

impl YtDlpInvoker {
    pub fn new(label: &'static str, program: impl Into<String>, launcher_args: Vec<String>) -> Self {
        Self {
            label,
            program: program.into(),
            launcher_args,
            player_client: None,
            proxy: None,
            catalog_timeout_secs: 25,
        }
    }

    pub fn with_player_client(mut self, client: impl Into<String>) -> Self {
        self.player_client = Some(client.into());
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_catalog_timeout(mut self, secs: u64) -> Self {
        self.catalog_timeout_secs = secs;
        self
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = self.launcher_args.clone();
        args.extend(["--no-playlist".to_string(), "--no-warnings".to_string()]);

        if let Some(client) = &self.player_client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }

    /// Fetch title and format catalog via `--dump-single-json`
    pub async fn list_formats(&self, source: &CanonicalSource) -> Result<VideoCatalog, DownloadError> {
        let mut args = self.common_args();
        args.extend(["--dump-single-json".to_string(), "--skip-download".to_string()]);
        args.push(source.url.clone());

        tracing::info!("[{}] Fetching catalog for {}", self.label, source.video_id);
        tracing::debug!("[{}] Running: {} {}", self.label, self.program, args.join(" "));

        let output = run_output_with_timeout(&self.program, args, self.catalog_timeout_secs)
            .await
            .map_err(DownloadError::from)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            tracing::warn!("[{}] Catalog fetch failed: {}", self.label, stderr.trim());
            return Err(DownloadError::from(stderr));
        }

        parse_catalog(&output.stdout, &source.video_id)
    }

    /// Run a download with the given selector, writing to `dest`.
    ///
    /// Progress lines on stdout are forwarded to `progress`; stderr is kept
    /// for error classification only.
    pub async fn download(
        &self,
        source: &CanonicalSource,
        selector: &str,
        dest: &Path,
        extra_args: &[String],
        progress: &ProgressEmitter,
    ) -> Result<PathBuf, DownloadError> {
        let mut args = self.common_args();
        args.extend([
            "-f".to_string(),
            selector.to_string(),
            "--newline".to_string(),
            "--no-part".to_string(),
            "--force-overwrites".to_string(),
            "-o".to_string(),
            dest.to_string_lossy().to_string(),
        ]);
        args.extend(extra_args.iter().cloned());
        args.push(source.url.clone());

        tracing::info!("[{}] Downloading '{}' for {}", self.label, selector, source.video_id);
        tracing::debug!("[{}] Running: {} {}", self.label, self.program, args.join(" "));

        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DownloadError::ToolNotFound(format!("{}: {}", self.program, e))
                } else {
                    DownloadError::SubprocessIo(format!("Failed to start {}: {}", self.program, e))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::SubprocessIo("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::SubprocessIo("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| DownloadError::SubprocessIo(format!("Failed to read yt-dlp output: {}", e)))?
        {
            if let Some(percent) = parse_progress_line(&line) {
                progress.emit(percent);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::SubprocessIo(format!("Failed to wait for yt-dlp: {}", e)))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let reason = diagnose_error(&stderr).map_or("unknown", |r| r.description());
            tracing::warn!(
                "[{}] Download failed ({}, {}): {}",
                self.label,
                status,
                reason,
                error_context(&stderr).unwrap_or_else(|| stderr.trim().to_string())
            );
            tracing::debug!("[{}] stderr: {}", self.label, stderr);
            return Err(DownloadError::from(stderr));
        }

        locate_output(dest).ok_or_else(|| {
            DownloadError::ExecutionError(format!("yt-dlp reported success but {} is missing", dest.display()))
        })
    }
}

/// Delete whatever an aborted run left at `dest` or under its stem
pub async fn remove_stale_outputs(dest: &Path) {
    while let Some(path) = locate_output(dest) {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("[yt-dlp] Failed to remove stale {}: {}", path.display(), e);
            break;
        }
        tracing::debug!("[yt-dlp] Removed stale {}", path.display());
    }
}

/// yt-dlp may swap the extension when merging; fall back to any file with
/// the same stem in the destination directory
fn locate_output(dest: &Path) -> Option<PathBuf> {
    if dest.is_file() {
        return Some(dest.to_path_buf());
    }

    let stem = dest.file_stem()?.to_string_lossy().to_string();
    let dir = dest.parent()?;
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|p| {
            p.is_file()
                && p.file_stem().map(|s| s.to_string_lossy() == stem).unwrap_or(false)
        })
}

/// Parse `[download]  42.3% of ...` lines
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let caps = PROGRESS_RE.captures(line)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Parse `--dump-single-json` output into a catalog
pub fn parse_catalog(stdout: &[u8], fallback_id: &str) -> Result<VideoCatalog, DownloadError> {
    let json_str = String::from_utf8_lossy(stdout);
    let json: serde_json::Value = serde_json::from_str(json_str.trim())
        .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

    let formats_array = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

    let formats = formats_array.iter().filter_map(parse_format_row).collect();

    Ok(VideoCatalog {
        video_id: json["id"].as_str().unwrap_or(fallback_id).to_string(),
        title: json["title"].as_str().unwrap_or("video").to_string(),
        formats,
    })
}

/// Only rows carrying a video stream and an extension become catalog entries
fn parse_format_row(f: &serde_json::Value) -> Option<FormatDescriptor> {
    let vcodec = f["vcodec"].as_str()?;
    if vcodec == "none" {
        return None;
    }
    let ext = f["ext"].as_str().filter(|e| !e.is_empty())?;

    let has_audio_track = f["acodec"].as_str().map_or(false, |a| a != "none");

    let bitrate_bps = f["tbr"]
        .as_f64()
        .or_else(|| f["vbr"].as_f64())
        .filter(|b| *b > 0.0)
        .map(|b| (b * 1000.0).round() as u64);

    let file_size_bytes = as_size(&f["filesize"]).or_else(|| as_size(&f["filesize_approx"]));

    Some(FormatDescriptor {
        format_id: f["format_id"].as_str().unwrap_or("").to_string(),
        container: ext.to_string(),
        quality_bucket: extract_quality(f["height"].as_u64(), f["format_note"].as_str()),
        bitrate_bps,
        frame_rate: f["fps"].as_f64().map(|fps| fps as f32),
        file_size_bytes,
        has_audio_track,
    })
}

fn as_size(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().filter(|s| *s >= 0.0).map(|s| s as u64))
}

/// "<height>p", else the first number in the format note
pub fn extract_quality(height: Option<u64>, format_note: Option<&str>) -> Option<String> {
    if let Some(h) = height.filter(|h| *h > 0) {
        return Some(format!("{}p", h));
    }

    let note = format_note?;
    let caps = NOTE_NUMBER_RE.captures(note)?;
    Some(format!("{}p", caps.get(1)?.as_str()))
}
