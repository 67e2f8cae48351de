// Backend and merge tool trait definitions

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::errors::DownloadError;
use super::models::{CanonicalSource, FetchOutcome, FormatDescriptor, VideoCatalog};

/// A strategy able to list and fetch the encodings of one video.
///
/// The orchestrator holds an ordered list of these and restarts the whole
/// pipeline on the next one when an attempt fails.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Name of the backend (for logging and temp directories)
    fn name(&self) -> &'static str;

    /// Fetch title and format catalog
    async fn list_formats(&self, source: &CanonicalSource) -> Result<VideoCatalog, DownloadError>;

    /// Download one catalog entry to `dest`
    async fn fetch_by_format(
        &self,
        source: &CanonicalSource,
        format: &FormatDescriptor,
        dest: &Path,
        progress: ProgressEmitter,
    ) -> Result<FetchOutcome, DownloadError>;

    /// Download the best audio-only stream to `dest`
    async fn fetch_best_audio(
        &self,
        source: &CanonicalSource,
        dest: &Path,
        progress: ProgressEmitter,
    ) -> Result<(), DownloadError>;
}

/// External audio/video merge tool
#[async_trait]
pub trait MergeTool: Send + Sync {
    /// Quick synchronous capability probe
    fn available(&self) -> bool;

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        progress: ProgressEmitter,
    ) -> Result<(), DownloadError>;
}

/// Progress emitter helper
///
/// Sub-operations report their own 0-100 completion through this; the
/// aggregator behind it decides what reaches the job.
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressEmitter {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    pub fn emit(&self, percent: f64) {
        (self.sink)(percent);
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressEmitter")
    }
}
