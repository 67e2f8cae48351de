// Downloader module - job pipeline, backends and supporting pieces

pub mod backends;
pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod tools;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use format_selector::FormatSelector;
pub use merge::FfmpegMerger;
pub use models::{Artifact, CanonicalSource, FormatDescriptor, Job, JobSnapshot, JobStatus, SelectionCriteria, VideoCatalog};
pub use orchestrator::DownloadOrchestrator;
pub use registry::JobRegistry;
pub use traits::{MergeTool, ProgressEmitter, RetrievalBackend};
