// Error types for the download pipeline and its backends

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Source reference could not be turned into a canonical video id
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Sequential filtering left no candidate
    #[error("No format matches the requested criteria")]
    NoMatchingFormat,

    /// Explicit format id is not part of the catalog
    #[error("Format '{0}' is not available for this video")]
    ExplicitFormatNotFound(String),

    /// Every retrieval backend failed
    #[error("All backends failed: {0}")]
    BackendExhausted(String),

    /// ffmpeg probe failed before the merge path was entered
    #[error("Merge tool not available: {0}")]
    MergeToolUnavailable(String),

    /// ffmpeg ran but did not produce the output
    #[error("Merge failed: {0}")]
    MergeFailed(String),

    /// Spawning, piping or waiting on a subprocess failed
    #[error("Subprocess I/O failure: {0}")]
    SubprocessIo(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Artifact was already streamed once and deleted
    #[error("Artifact for job {0} has expired")]
    ArtifactExpired(String),

    /// The platform blocked the request (403, SABR, bot detection, ...)
    #[error("Blocked by YouTube: {0}")]
    Blocked(String),

    /// Video does not exist or is private
    #[error("Video not found: {0}")]
    NotFound(String),

    /// 429 or equivalent
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// yt-dlp or python not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command exited unsuccessfully
    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl DownloadError {
    /// Errors that make a backend fallback pointless.
    ///
    /// Resolution depends only on the catalog and the criteria, and the merge
    /// tool is shared by every backend, so retrying elsewhere cannot help.
    /// A failed merge is not terminal: the next backend brings its own streams.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidSource(_)
                | Self::NoMatchingFormat
                | Self::ExplicitFormatNotFound(_)
                | Self::MergeToolUnavailable(_)
        )
    }

    /// Short message stored on a failed job. Raw stderr never goes here.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidSource(_) => "Invalid YouTube URL".to_string(),
            Self::NoMatchingFormat => {
                "No format matches the requested container, quality and bitrate".to_string()
            }
            Self::ExplicitFormatNotFound(id) => {
                format!("Format {} is not available for this video", id)
            }
            Self::BackendExhausted(_) => {
                "Download failed: every download method was exhausted. Try again later".to_string()
            }
            Self::MergeToolUnavailable(_) => {
                "ffmpeg is not installed on the server; this format cannot be merged".to_string()
            }
            Self::MergeFailed(_) => "Failed to merge video and audio".to_string(),
            Self::SubprocessIo(_) | Self::Io(_) => "Internal I/O error during download".to_string(),
            Self::JobNotFound(_) => "Job not found".to_string(),
            Self::ArtifactExpired(_) => {
                "File has already been downloaded and is no longer available".to_string()
            }
            Self::Blocked(_) => "YouTube blocked the download request".to_string(),
            Self::NotFound(_) => "Video not found or unavailable".to_string(),
            Self::RateLimited(_) => "YouTube is rate-limiting requests. Try again later".to_string(),
            Self::ToolNotFound(_) => "Download tool is not installed on the server".to_string(),
            Self::ParseError(_) => "Could not read video information".to_string(),
            Self::ExecutionError(_) => "Download failed".to_string(),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// Classify raw yt-dlp stderr
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
            return Self::RateLimited(s);
        }

        if lower.contains("403")
            || lower.contains("401")
            || lower.contains("forbidden")
            || lower.contains("sabr")
            || lower.contains("po token")
            || lower.contains("sign in to confirm")
            || lower.contains("not a bot")
        {
            return Self::Blocked(s);
        }

        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("404")
            || lower.contains("does not exist")
        {
            return Self::NotFound(s);
        }

        if lower.contains("command not found") || lower.contains("no such file") || lower.contains("no module named") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::ParseError(s);
        }

        Self::ExecutionError(s)
    }
}
