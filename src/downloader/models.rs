// Common data models for the download pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

/// One row of a video's format catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    /// yt-dlp format id (e.g. "18", "399")
    pub format_id: String,
    /// Container / file extension (mp4, webm)
    pub container: String,
    /// Quality bucket (e.g. "1080p")
    pub quality_bucket: Option<String>,
    pub bitrate_bps: Option<u64>,
    pub frame_rate: Option<f32>,
    pub file_size_bytes: Option<u64>,
    pub has_audio_track: bool,
}

impl FormatDescriptor {
    /// Numeric height encoded in the quality bucket ("1080p" -> 1080)
    pub fn height(&self) -> Option<u32> {
        self.quality_bucket
            .as_deref()
            .and_then(|q| q.trim_end_matches(['p', 'P']).parse().ok())
    }
}

/// What the caller asked for. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionCriteria {
    /// When set, every other field is ignored
    #[serde(default, alias = "format_id", alias = "formatId")]
    pub explicit_format_id: Option<String>,
    #[serde(default, alias = "format", alias = "ext")]
    pub container: Option<String>,
    #[serde(default, alias = "quality")]
    pub quality_bucket: Option<String>,
    /// Display label such as "378 kbps"
    #[serde(default, alias = "bitrate")]
    pub bitrate_label: Option<String>,
}

impl SelectionCriteria {
    /// Drop blank strings so `""` behaves like an absent field
    pub fn normalized(self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        Self {
            explicit_format_id: clean(self.explicit_format_id),
            container: clean(self.container).map(|c| c.to_lowercase()),
            quality_bucket: clean(self.quality_bucket),
            bitrate_label: clean(self.bitrate_label),
        }
    }
}

/// Video title plus its format catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCatalog {
    pub video_id: String,
    pub title: String,
    pub formats: Vec<FormatDescriptor>,
}

/// Source reference normalized to one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSource {
    pub video_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Status only moves forward; terminal states are final
    pub fn can_become(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// Finished file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Absolute path inside the work directory
    pub file_path: PathBuf,
    /// Name offered to the client (sanitized title + extension)
    pub suggested_filename: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: String,
    /// Set iff status == Completed
    pub result: Option<Artifact>,
    /// Set iff status == Failed
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    /// The artifact has been handed to a client
    pub artifact_claimed: bool,
}

impl Job {
    pub fn new(id: String, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            stage: "Initializing...".to_string(),
            result: None,
            error: None,
            created_at,
            artifact_claimed: false,
        }
    }
}

/// Status payload returned to pollers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: u8,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            stage: job.stage.clone(),
            error: job.error.clone(),
            filename: job.result.as_ref().map(|a| a.suggested_filename.clone()),
            created_at: job.created_at,
        }
    }
}

/// Result of a single fetch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub path: PathBuf,
    /// The file already carries audio (relaxed selector merged it)
    pub includes_audio: bool,
}

/// Unique option values for the format picker
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvailableOptions {
    pub formats: Vec<String>,
    pub qualities: Vec<String>,
    pub bitrates: Vec<String>,
}
