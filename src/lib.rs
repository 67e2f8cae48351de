pub mod api;
pub mod config;
pub mod downloader;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

use api::AppState;
use config::Config;
use downloader::backends::{CliYtDlp, PythonYtDlp};
use downloader::tools::ToolManager;
use downloader::{DownloadOrchestrator, FfmpegMerger, JobRegistry};

/// Wire registry, backends and merge tool from the configuration
pub fn build_state(config: &Config, registry: Arc<JobRegistry>) -> AppState {
    let merger = Arc::new(FfmpegMerger::new(config.ffmpeg_bin.clone()));
    let mut orchestrator = DownloadOrchestrator::new(registry, merger, config.work_dir.clone());

    orchestrator.add_backend(Arc::new(PythonYtDlp::new(
        config.ytdlp_python.clone(),
        config.proxy.clone(),
        config.catalog_timeout_secs,
    )));
    orchestrator.add_backend(Arc::new(CliYtDlp::new(
        config.ytdlp_bin.clone(),
        config.proxy.clone(),
        config.catalog_timeout_secs,
    )));

    AppState {
        orchestrator: Arc::new(orchestrator),
        tools: Arc::new(ToolManager::new(
            config.ytdlp_bin.clone(),
            config.ytdlp_python.clone(),
            config.ffmpeg_bin.clone(),
        )),
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    let registry = Arc::new(JobRegistry::new(config.job_ttl));
    let _sweeper = registry.spawn_sweeper(config.sweep_interval);
    let state = build_state(&config, registry);

    for tool in state.tools.get_all_tools() {
        if tool.is_available {
            tracing::info!(
                "[Startup] {} available: {}",
                tool.name,
                tool.version.as_deref().unwrap_or("?")
            );
        } else {
            tracing::warn!("[Startup] {} not available ({:?})", tool.name, tool.path);
        }
    }

    let app = api::router(state, &config.cors_origin);
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!(
        "[Startup] Listening on http://{} (work dir {}, job TTL {}s)",
        addr,
        config.work_dir.display(),
        config.job_ttl.as_secs()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("[Startup] Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[Startup] Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
