// ProgressAggregator - maps sub-operation progress onto one job percentage
//
// Each sub-operation (metadata, video, audio, merge, ...) reports 0-100 on
// its own scale. The aggregator remaps that into the stage's slice of the
// overall bar and only ever moves the job forward.

use std::sync::Arc;

use super::registry::{JobRegistry, JobUpdate};
use super::traits::ProgressEmitter;

/// Stage labels shown to pollers
pub mod stage {
    pub const FETCHING_METADATA: &str = "Fetching metadata";
    pub const SELECTING_FORMAT: &str = "Selecting format";
    pub const DOWNLOADING: &str = "Downloading";
    pub const DOWNLOADING_VIDEO: &str = "Downloading video";
    pub const DOWNLOADING_AUDIO: &str = "Downloading audio";
    pub const MERGING: &str = "Merging";
    pub const FINALIZING: &str = "Finalizing";
}

/// Half-open share of the overall progress bar owned by one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSlice {
    pub start: u8,
    pub end: u8,
}

impl StageSlice {
    pub const METADATA: StageSlice = StageSlice { start: 0, end: 10 };
    pub const DIRECT_DOWNLOAD: StageSlice = StageSlice { start: 10, end: 99 };
    pub const VIDEO: StageSlice = StageSlice { start: 10, end: 60 };
    pub const AUDIO: StageSlice = StageSlice { start: 60, end: 70 };
    pub const MERGE: StageSlice = StageSlice { start: 70, end: 95 };
    pub const FINALIZING: StageSlice = StageSlice { start: 95, end: 99 };

    /// Map a 0-100 sub-operation value into this slice
    pub fn remap(&self, percent: f64) -> u8 {
        let p = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        let span = f64::from(self.end - self.start);
        self.start + (span * p / 100.0).floor() as u8
    }
}

/// Per-job progress writer bound to the registry
#[derive(Clone)]
pub struct ProgressAggregator {
    registry: Arc<JobRegistry>,
    job_id: String,
}

impl ProgressAggregator {
    pub fn new(registry: Arc<JobRegistry>, job_id: impl Into<String>) -> Self {
        Self {
            registry,
            job_id: job_id.into(),
        }
    }

    /// Switch the visible stage and move to the start of its slice
    pub fn enter(&self, label: &str, slice: StageSlice) {
        self.registry.update(
            &self.job_id,
            JobUpdate::Processing {
                stage: label.to_string(),
            },
        );
        self.registry.advance_progress(&self.job_id, slice.start, None);
    }

    /// Emitter for a sub-operation running inside `slice`
    pub fn emitter(&self, slice: StageSlice) -> ProgressEmitter {
        let registry = Arc::clone(&self.registry);
        let job_id = self.job_id.clone();
        ProgressEmitter::new(move |percent| {
            registry.advance_progress(&job_id, slice.remap(percent), None);
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}
