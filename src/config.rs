// Service configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::downloader::tools::find_ytdlp;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Artifacts and per-attempt temp directories
    pub work_dir: PathBuf,
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
    /// Binary used by the secondary backend
    pub ytdlp_bin: String,
    /// Interpreter used by the primary backend (`<python> -m yt_dlp`)
    pub ytdlp_python: String,
    pub ffmpeg_bin: String,
    pub proxy: Option<String>,
    pub catalog_timeout_secs: u64,
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            work_dir: default_work_dir(),
            job_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            ytdlp_bin: "yt-dlp".to_string(),
            ytdlp_python: "python3".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            proxy: None,
            catalog_timeout_secs: 25,
            cors_origin: "*".to_string(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("youtube-fetcher")
}

impl Config {
    /// Read the process environment; yt-dlp is auto-detected when unset
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        if std::env::var("YTDLP_BIN").map_or(true, |v| v.trim().is_empty()) {
            config.ytdlp_bin = find_ytdlp();
        }
        config
    }

    /// Build from any key lookup. Blank values count as unset; unparsable
    /// numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        config.port = parse_or(get("PORT"), "PORT", config.port);
        if let Some(dir) = get("WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        let ttl = parse_or(get("JOB_TTL_SECS"), "JOB_TTL_SECS", config.job_ttl.as_secs());
        config.job_ttl = Duration::from_secs(ttl);

        // tokio intervals reject a zero period
        let sweep = parse_or(get("SWEEP_INTERVAL_SECS"), "SWEEP_INTERVAL_SECS", config.sweep_interval.as_secs());
        config.sweep_interval = Duration::from_secs(sweep.max(1));

        if let Some(bin) = get("YTDLP_BIN") {
            config.ytdlp_bin = bin;
        }
        if let Some(python) = get("YTDLP_PYTHON") {
            config.ytdlp_python = python;
        }
        if let Some(ffmpeg) = get("FFMPEG_BIN") {
            config.ffmpeg_bin = ffmpeg;
        }
        config.proxy = get("YTDLP_PROXY");
        config.catalog_timeout_secs = parse_or(
            get("CATALOG_TIMEOUT_SECS"),
            "CATALOG_TIMEOUT_SECS",
            config.catalog_timeout_secs,
        )
        .max(1);
        if let Some(origin) = get("CORS_ORIGIN") {
            config.cors_origin = origin;
        }

        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("[Config] Invalid {}={:?}, using {}", key, raw, default);
            default
        }),
    }
}
