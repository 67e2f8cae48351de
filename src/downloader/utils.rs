// Helper functions shared by backends, the orchestrator and the API

use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};
use url::Url;

use super::errors::DownloadError;
use super::models::CanonicalSource;

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
    static ref ILLEGAL_FILENAME_RE: Regex = Regex::new(r#"[\\/:*?"<>|]+"#).unwrap();
    static ref SAFE_EXT_RE: Regex = Regex::new(r"^[a-z0-9]{1,5}$").unwrap();
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| format!("Failed to capture stdout from {}", program))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| format!("Failed to capture stderr from {}", program))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stdout: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stderr: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res.map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
            let stdout = stdout_task
                .await
                .map_err(|e| format!("stdout task failed: {}", e))??;
            let stderr = stderr_task
                .await
                .map_err(|e| format!("stderr task failed: {}", e))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(format!("Timed out after {}s", timeout_secs))
        }
    }
}

/// Turn any supported YouTube link into one canonical watch URL
pub fn canonicalize_source(input: &str) -> Result<CanonicalSource, DownloadError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidSource("empty URL".to_string()));
    }

    // Accept scheme-less links like "youtu.be/abc"
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|e| DownloadError::InvalidSource(format!("{}: {}", trimmed, e)))?;

    let host = parsed
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| DownloadError::InvalidSource(format!("{}: missing host", trimmed)))?;

    let video_id = extract_video_id(&parsed, &host)
        .ok_or_else(|| DownloadError::InvalidSource(format!("{}: no video id", trimmed)))?;

    Ok(CanonicalSource {
        url: format!("https://www.youtube.com/watch?v={}", video_id),
        video_id,
    })
}

fn extract_video_id(url: &Url, host: &str) -> Option<String> {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let candidate = match host {
        "youtu.be" => segments.first().map(|s| s.to_string()),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" | "gaming.youtube.com"
        | "youtube-nocookie.com" => {
            match segments.as_slice() {
                ["watch", ..] => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                ["embed" | "v" | "shorts" | "live", id, ..] => Some(id.to_string()),
                _ => None,
            }
        }
        _ => None,
    }?;

    VIDEO_ID_RE.is_match(&candidate).then_some(candidate)
}

/// Strip characters that are illegal in file names on common filesystems
pub fn sanitize_filename(title: &str) -> String {
    let cleaned = ILLEGAL_FILENAME_RE.replace_all(title, "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extension used for the artifact file; anything odd becomes `fallback`
pub fn sanitize_ext(ext: &str, fallback: &str) -> String {
    let lower = ext.trim().trim_start_matches('.').to_lowercase();
    if SAFE_EXT_RE.is_match(&lower) {
        lower
    } else {
        fallback.to_string()
    }
}
