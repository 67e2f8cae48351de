// Secondary backend - native `yt-dlp` binary
//
// Used after the python module failed. When the exact format is refused by
// YouTube (SABR, PO token, 401/403) it retries once with a relaxed selector
// that lets yt-dlp pick and merge streams itself.

use async_trait::async_trait;
use std::path::Path;

use super::ytdlp::{remove_stale_outputs, YtDlpInvoker};
use crate::downloader::diagnostics::diagnose_error;
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::{FormatSelector, BEST_AUDIO_SELECTOR};
use crate::downloader::models::{CanonicalSource, FetchOutcome, FormatDescriptor, VideoCatalog};
use crate::downloader::traits::{ProgressEmitter, RetrievalBackend};

/// Containers yt-dlp can merge into
const MERGE_CONTAINERS: [&str; 4] = ["mp4", "webm", "mkv", "mov"];

pub struct CliYtDlp {
    invoker: YtDlpInvoker,
}

impl CliYtDlp {
    pub fn new(ytdlp_bin: impl Into<String>, proxy: Option<String>, catalog_timeout_secs: u64) -> Self {
        let invoker = YtDlpInvoker::new("yt-dlp-cli", ytdlp_bin, Vec::new())
            .with_proxy(proxy)
            .with_catalog_timeout(catalog_timeout_secs);

        Self { invoker }
    }

    /// Blocking signatures that a different selector may get around
    fn should_relax(err: &DownloadError) -> bool {
        match err {
            DownloadError::Blocked(stderr) | DownloadError::ExecutionError(stderr) => {
                diagnose_error(stderr).map_or(false, |r| r.is_platform_blocking())
            }
            _ => false,
        }
    }

    fn relaxed_args(container: &str) -> Vec<String> {
        if MERGE_CONTAINERS.contains(&container) {
            vec!["--merge-output-format".to_string(), container.to_string()]
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl RetrievalBackend for CliYtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp-cli"
    }

    async fn list_formats(&self, source: &CanonicalSource) -> Result<VideoCatalog, DownloadError> {
        self.invoker.list_formats(source).await
    }

    async fn fetch_by_format(
        &self,
        source: &CanonicalSource,
        format: &FormatDescriptor,
        dest: &Path,
        progress: ProgressEmitter,
    ) -> Result<FetchOutcome, DownloadError> {
        let first = self
            .invoker
            .download(source, &format.format_id, dest, &[], &progress)
            .await;

        let err = match first {
            Ok(path) => {
                return Ok(FetchOutcome {
                    path,
                    includes_audio: format.has_audio_track,
                })
            }
            Err(e) => e,
        };

        if !Self::should_relax(&err) {
            return Err(err);
        }

        let selector = FormatSelector::relaxed_selector(&format.container, format.height());
        tracing::warn!(
            "[yt-dlp-cli] Format {} blocked, retrying once with '{}'",
            format.format_id,
            selector
        );

        // The blocked run may have left a truncated file behind
        remove_stale_outputs(dest).await;

        // A relaxed fetch merges audio itself
        let path = self
            .invoker
            .download(source, &selector, dest, &Self::relaxed_args(&format.container), &progress)
            .await?;

        Ok(FetchOutcome {
            path,
            includes_audio: true,
        })
    }

    async fn fetch_best_audio(
        &self,
        source: &CanonicalSource,
        dest: &Path,
        progress: ProgressEmitter,
    ) -> Result<(), DownloadError> {
        self.invoker
            .download(source, BEST_AUDIO_SELECTOR, dest, &[], &progress)
            .await
            .map(|_| ())
    }
}
