// FfmpegMerger - joins a video-only stream with an audio-only stream
//
// Video is copied as-is, audio is transcoded to AAC so every container
// yt-dlp hands us ends up playable. Progress is scraped from ffmpeg's
// stderr, which redraws its status line with carriage returns.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

use super::errors::DownloadError;
use super::traits::{MergeTool, ProgressEmitter};

/// Bytes of stderr kept for the failure log
const STDERR_TAIL: usize = 500;

lazy_static::lazy_static! {
    static ref DURATION_RE: Regex = Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap();
    static ref TIME_RE: Regex = Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap();
}

fn captures_to_secs(caps: &regex::Captures<'_>) -> Option<f64> {
    let h: f64 = caps.get(1)?.as_str().parse().ok()?;
    let m: f64 = caps.get(2)?.as_str().parse().ok()?;
    let s: f64 = caps.get(3)?.as_str().parse().ok()?;
    let cs: f64 = caps.get(4)?.as_str().parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s + cs / 100.0)
}

/// Stateful stderr scraper: remembers the first `Duration:` and turns
/// every later `time=` marker into a 0-100 value.
#[derive(Debug, Default)]
pub struct MergeProgressParser {
    duration: Option<f64>,
    carry: String,
}

impl MergeProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw stderr chunk; returns the latest progress it contained
    pub fn feed(&mut self, chunk: &str) -> Option<f64> {
        self.carry.push_str(chunk);

        // Only complete segments are parsed; the tail waits for more input
        let cut = match self.carry.rfind(['\r', '\n']) {
            Some(idx) => idx + 1,
            None => return None,
        };
        let complete: String = self.carry.drain(..cut).collect();

        let mut latest = None;
        for segment in complete.split(['\r', '\n']) {
            if let Some(p) = self.parse_segment(segment) {
                latest = Some(p);
            }
        }
        latest
    }

    fn parse_segment(&mut self, segment: &str) -> Option<f64> {
        if self.duration.is_none() {
            if let Some(caps) = DURATION_RE.captures(segment) {
                self.duration = captures_to_secs(&caps).filter(|d| *d > 0.0);
            }
        }

        let current = TIME_RE.captures(segment).and_then(|c| captures_to_secs(&c))?;
        let duration = self.duration?;
        Some((current / duration * 100.0).round().clamp(0.0, 100.0))
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }
}

pub struct FfmpegMerger {
    bin: String,
}

impl FfmpegMerger {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn build_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-shortest".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl MergeTool for FfmpegMerger {
    fn available(&self) -> bool {
        Command::new(&self.bin)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        progress: ProgressEmitter,
    ) -> Result<(), DownloadError> {
        for input in [video, audio] {
            if !input.exists() {
                return Err(DownloadError::MergeFailed(format!(
                    "input file missing: {}",
                    input.display()
                )));
            }
        }

        tracing::info!("[ffmpeg] Merging {} + {}", video.display(), audio.display());

        let mut child = TokioCommand::new(&self.bin)
            .args(Self::build_args(video, audio, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DownloadError::MergeToolUnavailable(format!("{}: {}", self.bin, e))
                } else {
                    DownloadError::SubprocessIo(format!("Failed to start {}: {}", self.bin, e))
                }
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::SubprocessIo("Failed to capture ffmpeg stderr".to_string()))?;

        let mut parser = MergeProgressParser::new();
        let mut tail = String::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stderr
                .read(&mut buf)
                .await
                .map_err(|e| DownloadError::SubprocessIo(format!("Failed to read ffmpeg stderr: {}", e)))?;
            if n == 0 {
                break;
            }

            let chunk = String::from_utf8_lossy(&buf[..n]);
            if let Some(p) = parser.feed(&chunk) {
                progress.emit(p);
            }

            tail.push_str(&chunk);
            if tail.len() > STDERR_TAIL * 2 {
                let keep_from = tail.len() - STDERR_TAIL;
                let boundary = (keep_from..tail.len())
                    .find(|i| tail.is_char_boundary(*i))
                    .unwrap_or(tail.len());
                tail.drain(..boundary);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::SubprocessIo(format!("Failed to wait for ffmpeg: {}", e)))?;

        if !status.success() {
            tracing::warn!("[ffmpeg] Exited with {}: {}", status, tail.trim());
            return Err(DownloadError::MergeFailed(format!("ffmpeg exited with {}", status)));
        }
        if !output.exists() {
            return Err(DownloadError::MergeFailed("ffmpeg produced no output file".to_string()));
        }

        progress.emit(100.0);
        tracing::info!("[ffmpeg] Merge complete: {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parser_uses_first_duration() {
        let mut parser = MergeProgressParser::new();
        assert_eq!(parser.feed("Input #0, mov,mp4\n  Duration: 00:01:40.00, start: 0.000000\n"), None);
        assert_eq!(parser.feed("Input #1\n  Duration: 00:05:00.00, start: 0\n"), None);
        assert_eq!(parser.duration(), Some(100.0));

        let p = parser.feed("frame=  100 fps=0.0 size=  256kB time=00:00:25.00 bitrate=...\r");
        assert_eq!(p, Some(25.0));
    }

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = MergeProgressParser::new();
        parser.feed("  Duration: 00:00:10.00, start\n");

        assert_eq!(parser.feed("frame=1 time=00:00:0"), None);
        assert_eq!(parser.feed("5.00 bitrate=1\r"), Some(50.0));
    }

    #[test]
    fn test_parser_clamps_and_keeps_latest() {
        let mut parser = MergeProgressParser::new();
        parser.feed("Duration: 00:00:10.00\n");

        let p = parser.feed("time=00:00:02.00 x\rtime=00:00:04.00 x\rtime=00:00:12.00 x\r");
        assert_eq!(p, Some(100.0));
    }

    #[test]
    fn test_parser_without_duration() {
        let mut parser = MergeProgressParser::new();
        assert_eq!(parser.feed("time=00:00:05.00 bitrate\r"), None);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        assert!(!FfmpegMerger::new("no-such-ffmpeg-binary-xyz").available());
    }

    #[tokio::test]
    async fn test_merge_rejects_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let merger = FfmpegMerger::new("ffmpeg");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let err = merger
            .merge(
                &dir.path().join("video.mp4"),
                &dir.path().join("audio.m4a"),
                &dir.path().join("out.mp4"),
                ProgressEmitter::new(move |p| sink.lock().unwrap().push(p)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::MergeFailed(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = FfmpegMerger::build_args(Path::new("v.mp4"), Path::new("a.m4a"), Path::new("o.mp4"));
        assert_eq!(
            args.join(" "),
            "-i v.mp4 -i a.m4a -c:v copy -c:a aac -b:a 192k -shortest -y o.mp4"
        );
    }
}
