// Primary backend - yt-dlp run as a python module (`python3 -m yt_dlp`)
//
// The module tracks upstream fixes faster than packaged binaries and is
// less likely to hit 403/SABR blocks, so it goes first.

use async_trait::async_trait;
use std::path::Path;

use super::ytdlp::YtDlpInvoker;
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::BEST_AUDIO_SELECTOR;
use crate::downloader::models::{CanonicalSource, FetchOutcome, FormatDescriptor, VideoCatalog};
use crate::downloader::traits::{ProgressEmitter, RetrievalBackend};

const PLAYER_CLIENTS: &str = "web,web_safari,ios";

pub struct PythonYtDlp {
    invoker: YtDlpInvoker,
}

impl PythonYtDlp {
    pub fn new(python_bin: impl Into<String>, proxy: Option<String>, catalog_timeout_secs: u64) -> Self {
        let invoker = YtDlpInvoker::new("yt-dlp-python", python_bin, vec!["-m".to_string(), "yt_dlp".to_string()])
            .with_player_client(PLAYER_CLIENTS)
            .with_proxy(proxy)
            .with_catalog_timeout(catalog_timeout_secs);

        Self { invoker }
    }
}

#[async_trait]
impl RetrievalBackend for PythonYtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp-python"
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
        let path = self
            .invoker
            .download(source, &format.format_id, dest, &[], &progress)
            .await?;

        Ok(FetchOutcome {
            path,
            includes_audio: format.has_audio_track,
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
