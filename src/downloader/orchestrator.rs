// DownloadOrchestrator - runs one job through the backend fallback chain
//
// Pipeline per backend:
//   metadata -> format selection -> video (-> audio -> merge) -> finalize
//
// A failing backend is abandoned wholesale and the next one starts again
// from metadata. Resolution errors and a missing merge tool end the job
// immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::errors::DownloadError;
use super::format_selector::FormatSelector;
use super::models::{Artifact, CanonicalSource, SelectionCriteria, VideoCatalog};
use super::progress::{stage, ProgressAggregator, StageSlice};
use super::registry::{JobRegistry, JobUpdate};
use super::traits::{MergeTool, RetrievalBackend};
use super::utils::{canonicalize_source, sanitize_ext, sanitize_filename};

pub struct DownloadOrchestrator {
    backends: Vec<Arc<dyn RetrievalBackend>>,
    merge_tool: Arc<dyn MergeTool>,
    registry: Arc<JobRegistry>,
    work_dir: PathBuf,
}

impl DownloadOrchestrator {
    pub fn new(registry: Arc<JobRegistry>, merge_tool: Arc<dyn MergeTool>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let work_dir = if work_dir.is_absolute() {
            work_dir
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&work_dir))
                .unwrap_or(work_dir)
        };

        Self {
            backends: Vec::new(),
            merge_tool,
            registry,
            work_dir,
        }
    }

    /// Append a backend; backends are tried in insertion order
    pub fn add_backend(&mut self, backend: Arc<dyn RetrievalBackend>) {
        self.backends.push(backend);
    }

    // `available()` spawns ffmpeg synchronously
    async fn merge_tool_available(&self) -> bool {
        let merge_tool = Arc::clone(&self.merge_tool);
        tokio::task::spawn_blocking(move || merge_tool.available())
            .await
            .unwrap_or(false)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn merge_tool(&self) -> &Arc<dyn MergeTool> {
        &self.merge_tool
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Validate the source, register a job and run it in the background.
    ///
    /// Returns as soon as the job exists; an unusable source is rejected
    /// before any job is created.
    pub fn start(self: &Arc<Self>, source_url: &str, criteria: SelectionCriteria) -> Result<String, DownloadError> {
        let source = canonicalize_source(source_url)?;
        let criteria = criteria.normalized();
        let job_id = self.registry.create_job();

        tracing::info!(
            "[Orchestrator] Job {} created for {} ({:?})",
            job_id,
            source.video_id,
            criteria
        );

        let this = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            this.run_job(&id, source, criteria).await;
        });

        Ok(job_id)
    }

    /// Drive an existing job to Completed or Failed
    pub async fn run_job(&self, job_id: &str, source: CanonicalSource, criteria: SelectionCriteria) {
        let progress = ProgressAggregator::new(Arc::clone(&self.registry), job_id);
        let job_dir = self.work_dir.join(job_id);
        let mut failures: Vec<String> = Vec::new();

        for backend in &self.backends {
            tracing::info!("[Orchestrator] Job {}: trying backend {}", job_id, backend.name());

            let attempt_dir = job_dir.join(backend.name());
            let result = self
                .attempt(backend.as_ref(), &source, &criteria, &progress, &attempt_dir)
                .await;
            remove_dir_quietly(&attempt_dir).await;

            match result {
                Ok(artifact) => {
                    tracing::info!(
                        "[Orchestrator] Job {}: ✓ completed with {} -> {}",
                        job_id,
                        backend.name(),
                        artifact.file_path.display()
                    );
                    remove_dir_quietly(&job_dir).await;

                    let path = artifact.file_path.clone();
                    if !self.registry.update(job_id, JobUpdate::Completed(artifact)) {
                        // Job was swept while we worked; nobody can claim the file
                        tracing::warn!("[Orchestrator] Job {} vanished before completion, discarding artifact", job_id);
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                    return;
                }
                Err(e) if e.is_terminal() => {
                    tracing::warn!("[Orchestrator] Job {}: ✗ {} (no fallback)", job_id, e);
                    remove_dir_quietly(&job_dir).await;
                    self.registry.update(job_id, JobUpdate::Failed(e.user_message()));
                    return;
                }
                Err(e) => {
                    tracing::warn!("[Orchestrator] Job {}: ✗ {} failed: {}", job_id, backend.name(), e);
                    failures.push(format!("{}: {}", backend.name(), e));
                }
            }
        }

        remove_dir_quietly(&job_dir).await;
        let err = DownloadError::BackendExhausted(failures.join("; "));
        tracing::error!("[Orchestrator] Job {}: {}", job_id, err);
        self.registry.update(job_id, JobUpdate::Failed(err.user_message()));
    }

    /// One full pipeline run against a single backend
    async fn attempt(
        &self,
        backend: &dyn RetrievalBackend,
        source: &CanonicalSource,
        criteria: &SelectionCriteria,
        progress: &ProgressAggregator,
        attempt_dir: &Path,
    ) -> Result<Artifact, DownloadError> {
        progress.enter(stage::FETCHING_METADATA, StageSlice::METADATA);
        let catalog = backend.list_formats(source).await?;
        progress.emitter(StageSlice::METADATA).emit(100.0);

        progress.enter(stage::SELECTING_FORMAT, StageSlice::METADATA);
        let format = FormatSelector::resolve(&catalog.formats, criteria)?;
        tracing::info!(
            "[Orchestrator] Job {}: selected format {} ({} {}, audio: {})",
            progress.job_id(),
            format.format_id,
            format.container,
            format.quality_bucket.as_deref().unwrap_or("?"),
            format.has_audio_track
        );

        let needs_merge = !format.has_audio_track;
        if needs_merge && !self.merge_tool_available().await {
            return Err(DownloadError::MergeToolUnavailable(format!(
                "format {} has no audio track",
                format.format_id
            )));
        }

        tokio::fs::create_dir_all(attempt_dir).await?;
        let container_ext = sanitize_ext(&format.container, "mp4");
        let video_dest = attempt_dir.join(format!("video.{}", container_ext));

        let output = if needs_merge {
            progress.enter(stage::DOWNLOADING_VIDEO, StageSlice::VIDEO);
            let video = backend
                .fetch_by_format(source, &format, &video_dest, progress.emitter(StageSlice::VIDEO))
                .await?;

            if video.includes_audio {
                video.path
            } else {
                progress.enter(stage::DOWNLOADING_AUDIO, StageSlice::AUDIO);
                let audio_dest = attempt_dir.join("audio.m4a");
                backend
                    .fetch_best_audio(source, &audio_dest, progress.emitter(StageSlice::AUDIO))
                    .await?;

                progress.enter(stage::MERGING, StageSlice::MERGE);
                let merged = attempt_dir.join(format!("merged.{}", container_ext));
                self.merge_tool
                    .merge(&video.path, &audio_dest, &merged, progress.emitter(StageSlice::MERGE))
                    .await?;
                merged
            }
        } else {
            progress.enter(stage::DOWNLOADING, StageSlice::DIRECT_DOWNLOAD);
            backend
                .fetch_by_format(source, &format, &video_dest, progress.emitter(StageSlice::DIRECT_DOWNLOAD))
                .await?
                .path
        };

        progress.enter(stage::FINALIZING, StageSlice::FINALIZING);
        self.finalize(progress.job_id(), &catalog, &output, &container_ext).await
    }

    /// Move the output next to the other artifacts and name it for the client
    async fn finalize(
        &self,
        job_id: &str,
        catalog: &VideoCatalog,
        output: &Path,
        container_ext: &str,
    ) -> Result<Artifact, DownloadError> {
        let ext = output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| sanitize_ext(e, container_ext))
            .unwrap_or_else(|| container_ext.to_string());

        let final_path = self.work_dir.join(format!("{}.{}", job_id, ext));
        tokio::fs::rename(output, &final_path).await?;

        Ok(Artifact {
            file_path: final_path,
            suggested_filename: format!("{}.{}", sanitize_filename(&catalog.title), ext),
        })
    }

    /// Catalog from the first backend that answers
    pub async fn list_catalog(&self, source: &CanonicalSource) -> Result<VideoCatalog, DownloadError> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            tracing::info!("[Orchestrator] Listing formats with backend: {}", backend.name());

            match backend.list_formats(source).await {
                Ok(catalog) => {
                    tracing::info!(
                        "[Orchestrator] ✓ {} returned {} formats",
                        backend.name(),
                        catalog.formats.len()
                    );
                    return Ok(catalog);
                }
                Err(e) => {
                    tracing::warn!("[Orchestrator] ✗ {} failed: {}", backend.name(), e);
                    failures.push(format!("{}: {}", backend.name(), e));
                }
            }
        }

        Err(DownloadError::BackendExhausted(failures.join("; ")))
    }
}

async fn remove_dir_quietly(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("[Orchestrator] Could not remove {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{FetchOutcome, FormatDescriptor, JobStatus};
    use crate::downloader::traits::ProgressEmitter;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records (stage, progress) of the job at interesting moments
    struct Recorder {
        registry: Arc<JobRegistry>,
        job_id: Mutex<String>,
        seen: Mutex<Vec<(String, u8)>>,
    }

    impl Recorder {
        fn new(registry: Arc<JobRegistry>) -> Arc<Self> {
            Arc::new(Self {
                registry,
                job_id: Mutex::new(String::new()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn record(&self) {
            let id = self.job_id.lock().unwrap().clone();
            if let Some(job) = self.registry.get(&id) {
                self.seen.lock().unwrap().push((job.stage, job.progress));
            }
        }

        fn stages(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    struct FakeBackend {
        name: &'static str,
        catalog: Option<VideoCatalog>,
        fetch_error: Option<DownloadError>,
        fetch_includes_audio: bool,
        calls: Mutex<Vec<&'static str>>,
        recorder: Arc<Recorder>,
    }

    impl FakeBackend {
        fn working(name: &'static str, catalog: VideoCatalog, recorder: &Arc<Recorder>) -> Self {
            Self {
                name,
                catalog: Some(catalog),
                fetch_error: None,
                fetch_includes_audio: false,
                calls: Mutex::new(Vec::new()),
                recorder: Arc::clone(recorder),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RetrievalBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn list_formats(&self, _source: &CanonicalSource) -> Result<VideoCatalog, DownloadError> {
            self.calls.lock().unwrap().push("list_formats");
            self.catalog
                .clone()
                .ok_or_else(|| DownloadError::Blocked("HTTP Error 403: Forbidden".into()))
        }

        async fn fetch_by_format(
            &self,
            _source: &CanonicalSource,
            format: &FormatDescriptor,
            dest: &Path,
            progress: ProgressEmitter,
        ) -> Result<FetchOutcome, DownloadError> {
            self.calls.lock().unwrap().push("fetch_by_format");
            // partial file left behind even on failure
            std::fs::write(dest, format!("{}:{}", self.name, format.format_id)).unwrap();
            progress.emit(50.0);
            self.recorder.record();

            if let Some(err) = &self.fetch_error {
                return Err(err.clone());
            }
            progress.emit(100.0);
            Ok(FetchOutcome {
                path: dest.to_path_buf(),
                includes_audio: self.fetch_includes_audio || format.has_audio_track,
            })
        }

        async fn fetch_best_audio(
            &self,
            _source: &CanonicalSource,
            dest: &Path,
            progress: ProgressEmitter,
        ) -> Result<(), DownloadError> {
            self.calls.lock().unwrap().push("fetch_best_audio");
            std::fs::write(dest, "audio").unwrap();
            progress.emit(100.0);
            self.recorder.record();
            Ok(())
        }
    }

    struct FakeMerge {
        available: bool,
        reject_from: Option<&'static str>,
        merged: Mutex<u32>,
        recorder: Arc<Recorder>,
    }

    impl FakeMerge {
        fn new(available: bool, recorder: &Arc<Recorder>) -> Arc<Self> {
            Arc::new(Self {
                available,
                reject_from: None,
                merged: Mutex::new(0),
                recorder: Arc::clone(recorder),
            })
        }

        /// Fails the merge when the video came from `backend`
        fn rejecting(backend: &'static str, recorder: &Arc<Recorder>) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                reject_from: Some(backend),
                merged: Mutex::new(0),
                recorder: Arc::clone(recorder),
            })
        }

        fn merge_count(&self) -> u32 {
            *self.merged.lock().unwrap()
        }
    }

    #[async_trait]
    impl MergeTool for FakeMerge {
        fn available(&self) -> bool {
            self.available
        }

        async fn merge(
            &self,
            video: &Path,
            audio: &Path,
            output: &Path,
            progress: ProgressEmitter,
        ) -> Result<(), DownloadError> {
            *self.merged.lock().unwrap() += 1;
            self.recorder.record();
            let video = std::fs::read_to_string(video).unwrap();
            if let Some(backend) = self.reject_from {
                if video.starts_with(backend) {
                    return Err(DownloadError::MergeFailed("Invalid data found when processing input".into()));
                }
            }
            let audio = std::fs::read_to_string(audio).unwrap();
            std::fs::write(output, format!("{}+{}", video, audio)).unwrap();
            progress.emit(100.0);
            Ok(())
        }
    }

    fn scenario_catalog() -> VideoCatalog {
        let format = |id: &str, quality: &str, bitrate: u64, audio: bool| FormatDescriptor {
            format_id: id.to_string(),
            container: "mp4".to_string(),
            quality_bucket: Some(quality.to_string()),
            bitrate_bps: Some(bitrate),
            frame_rate: Some(30.0),
            file_size_bytes: None,
            has_audio_track: audio,
        };

        VideoCatalog {
            video_id: "dQw4w9WgXcQ".into(),
            title: "Never: Gonna/Give?".into(),
            formats: vec![
                format("18", "360p", 155_759, true),
                format("399", "1080p", 377_524, false),
            ],
        }
    }

    fn source() -> CanonicalSource {
        canonicalize_source("https://youtu.be/dQw4w9WgXcQ").unwrap()
    }

    fn scenario_criteria() -> SelectionCriteria {
        SelectionCriteria {
            container: Some("mp4".into()),
            quality_bucket: Some("1080p".into()),
            bitrate_label: Some("378 kbps".into()),
            ..Default::default()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        registry: Arc<JobRegistry>,
        recorder: Arc<Recorder>,
        work_dir: PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let registry = Arc::new(JobRegistry::new(Duration::from_secs(600)));
            let recorder = Recorder::new(Arc::clone(&registry));
            let work_dir = dir.path().to_path_buf();
            Self {
                _dir: dir,
                registry,
                recorder,
                work_dir,
            }
        }

        fn orchestrator(&self, merge: Arc<FakeMerge>, backends: Vec<Arc<FakeBackend>>) -> DownloadOrchestrator {
            let mut orchestrator = DownloadOrchestrator::new(Arc::clone(&self.registry), merge, &self.work_dir);
            for backend in backends {
                orchestrator.add_backend(backend);
            }
            orchestrator
        }

        fn new_job(&self) -> String {
            let id = self.registry.create_job();
            *self.recorder.job_id.lock().unwrap() = id.clone();
            id
        }
    }

    #[tokio::test]
    async fn test_scenario_merges_video_only_format() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(Arc::clone(&merge), vec![Arc::clone(&primary)]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());

        let artifact = job.result.unwrap();
        assert_eq!(artifact.suggested_filename, "Never GonnaGive.mp4");
        assert_eq!(artifact.file_path, h.work_dir.join(format!("{}.mp4", id)));
        assert!(artifact.file_path.is_absolute());
        assert_eq!(
            std::fs::read_to_string(&artifact.file_path).unwrap(),
            "primary:399+audio"
        );

        assert_eq!(primary.calls(), vec!["list_formats", "fetch_by_format", "fetch_best_audio"]);
        assert_eq!(merge.merge_count(), 1);
        assert_eq!(
            h.recorder.stages(),
            vec![stage::DOWNLOADING_VIDEO, stage::DOWNLOADING_AUDIO, stage::MERGING]
        );
        assert!(!h.work_dir.join(&id).exists());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(merge, vec![primary]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let seen: Vec<u8> = h.recorder.seen.lock().unwrap().iter().map(|(_, p)| *p).collect();
        assert_eq!(seen, vec![35, 70, 70]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(h.registry.get(&id).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_direct_download_skips_merge() {
        let h = Harness::new();
        let merge = FakeMerge::new(false, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(Arc::clone(&merge), vec![Arc::clone(&primary)]);

        let id = h.new_job();
        let criteria = SelectionCriteria {
            explicit_format_id: Some("18".into()),
            container: Some("webm".into()),
            ..Default::default()
        };
        orchestrator.run_job(&id, source(), criteria).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(merge.merge_count(), 0);
        assert_eq!(primary.calls(), vec!["list_formats", "fetch_by_format"]);
        assert_eq!(h.recorder.stages(), vec![stage::DOWNLOADING]);
    }

    #[tokio::test]
    async fn test_fallback_restarts_from_metadata() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);

        let mut primary = FakeBackend::working("primary", scenario_catalog(), &h.recorder);
        primary.fetch_error = Some(DownloadError::Blocked("HTTP Error 403".into()));
        let primary = Arc::new(primary);
        let secondary = Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(
            Arc::clone(&merge),
            vec![Arc::clone(&primary), Arc::clone(&secondary)],
        );

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(primary.calls(), vec!["list_formats", "fetch_by_format"]);
        assert_eq!(
            secondary.calls(),
            vec!["list_formats", "fetch_by_format", "fetch_best_audio"]
        );

        // nothing from the primary attempt leaks into the result
        let artifact = job.result.unwrap();
        assert_eq!(
            std::fs::read_to_string(&artifact.file_path).unwrap(),
            "secondary:399+audio"
        );
        assert!(!h.work_dir.join(&id).join("primary").exists());
        assert!(!h.work_dir.join(&id).exists());
    }

    #[tokio::test]
    async fn test_merge_failure_falls_back() {
        let h = Harness::new();
        let merge = FakeMerge::rejecting("primary", &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let secondary = Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(
            Arc::clone(&merge),
            vec![Arc::clone(&primary), Arc::clone(&secondary)],
        );

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(merge.merge_count(), 2);
        assert_eq!(
            secondary.calls(),
            vec!["list_formats", "fetch_by_format", "fetch_best_audio"]
        );
        assert_eq!(
            std::fs::read_to_string(&job.result.unwrap().file_path).unwrap(),
            "secondary:399+audio"
        );
        assert!(!h.work_dir.join(&id).exists());
    }

    #[tokio::test]
    async fn test_metadata_failure_falls_back() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let mut primary = FakeBackend::working("primary", scenario_catalog(), &h.recorder);
        primary.catalog = None;
        let secondary = Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(merge, vec![Arc::new(primary), Arc::clone(&secondary)]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), SelectionCriteria::default()).await;

        assert_eq!(h.registry.get(&id).unwrap().status, JobStatus::Completed);
        assert_eq!(secondary.calls()[0], "list_formats");
    }

    #[tokio::test]
    async fn test_relaxed_fetch_skips_audio_and_merge() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let mut backend = FakeBackend::working("secondary", scenario_catalog(), &h.recorder);
        backend.fetch_includes_audio = true;
        let backend = Arc::new(backend);
        let orchestrator = h.orchestrator(Arc::clone(&merge), vec![Arc::clone(&backend)]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        assert_eq!(h.registry.get(&id).unwrap().status, JobStatus::Completed);
        assert_eq!(backend.calls(), vec!["list_formats", "fetch_by_format"]);
        assert_eq!(merge.merge_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_terminal() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let secondary = Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(merge, vec![Arc::clone(&primary), Arc::clone(&secondary)]);

        let id = h.new_job();
        let criteria = SelectionCriteria {
            explicit_format_id: Some("137".into()),
            ..Default::default()
        };
        orchestrator.run_job(&id, source(), criteria).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(
            job.error.as_deref(),
            Some("Format 137 is not available for this video")
        );
        assert_eq!(primary.calls(), vec!["list_formats"]);
        assert!(secondary.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_merge_tool_is_terminal() {
        let h = Harness::new();
        let merge = FakeMerge::new(false, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let secondary = Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder));
        let orchestrator = h.orchestrator(merge, vec![Arc::clone(&primary), Arc::clone(&secondary)]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("ffmpeg"));
        assert_eq!(primary.calls(), vec!["list_formats"]);
        assert!(secondary.calls().is_empty());
    }

    #[tokio::test]
    async fn test_all_backends_exhausted() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let mut primary = FakeBackend::working("primary", scenario_catalog(), &h.recorder);
        primary.catalog = None;
        let mut secondary = FakeBackend::working("secondary", scenario_catalog(), &h.recorder);
        secondary.fetch_error = Some(DownloadError::ExecutionError("Traceback: boom".into()));
        let orchestrator = h.orchestrator(merge, vec![Arc::new(primary), Arc::new(secondary)]);

        let id = h.new_job();
        orchestrator.run_job(&id, source(), scenario_criteria()).await;

        let job = h.registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        let message = job.error.unwrap();
        assert!(!message.contains("Traceback"));
        assert_eq!(message, DownloadError::BackendExhausted(String::new()).user_message());
        assert!(!h.work_dir.join(&id).exists());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_source() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let orchestrator = Arc::new(h.orchestrator(merge, vec![]));

        let err = orchestrator
            .start("https://example.com/video", SelectionCriteria::default())
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidSource(_)));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let primary = Arc::new(FakeBackend::working("primary", scenario_catalog(), &h.recorder));
        let orchestrator = Arc::new(h.orchestrator(merge, vec![primary]));

        let id = orchestrator
            .start("https://www.youtube.com/watch?v=dQw4w9WgXcQ", scenario_criteria())
            .unwrap();

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = h.registry.get(&id).unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_catalog_falls_back() {
        let h = Harness::new();
        let merge = FakeMerge::new(true, &h.recorder);
        let mut primary = FakeBackend::working("primary", scenario_catalog(), &h.recorder);
        primary.catalog = None;
        let orchestrator = h.orchestrator(
            merge,
            vec![
                Arc::new(primary),
                Arc::new(FakeBackend::working("secondary", scenario_catalog(), &h.recorder)),
            ],
        );

        let catalog = orchestrator.list_catalog(&source()).await.unwrap();
        assert_eq!(catalog.formats.len(), 2);
    }
}
