// Blocking diagnostics - identifies why YouTube refused a download
//
// Used by the CLI backend to decide whether a relaxed retry is worth it,
// and by the yt-dlp runner to log a readable reason per failed download.

use serde::Serialize;

/// Reasons why YouTube might refuse a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockingReason {
    /// HTTP 403 Forbidden - general access denied
    Http403Forbidden,

    /// HTTP 401 on the media URL
    Http401Unauthorized,

    /// SABR streaming protection hides the adaptive formats
    SabrStreaming,

    /// Proof of Origin token required by the player client
    PoTokenRequired,

    AgeRestricted,

    GeoBlocked,

    /// Network timeout (soft IP block)
    NetworkTimeout,

    RateLimited,

    BotDetection,

    PrivateVideo,

    /// Video deleted or unavailable
    VideoUnavailable,

    /// DRM-protected content, cannot be downloaded at all
    DrmProtected,

    Unknown,
}

impl BlockingReason {
    /// The specific format was refused but a different selector may pass.
    ///
    /// SABR and PO token checks apply per format family, so the same video
    /// often downloads fine when yt-dlp is allowed to pick its own streams.
    pub fn is_platform_blocking(&self) -> bool {
        matches!(
            self,
            Self::SabrStreaming | Self::Http403Forbidden | Self::Http401Unauthorized | Self::PoTokenRequired
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::Http401Unauthorized => "Unauthorized (HTTP 401)",
            Self::SabrStreaming => "SABR streaming protection active",
            Self::PoTokenRequired => "Proof of Origin token required",
            Self::AgeRestricted => "Age-restricted content",
            Self::GeoBlocked => "Geographic restriction",
            Self::NetworkTimeout => "Network timeout (possible IP throttling)",
            Self::RateLimited => "Rate limited by YouTube",
            Self::BotDetection => "Bot detection triggered",
            Self::PrivateVideo => "Private video",
            Self::VideoUnavailable => "Video unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::Unknown => "Unknown blocking reason",
        }
    }
}

/// Analyze an error message and return the blocking reason
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    // Check patterns in order of specificity

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("encrypted media")
        || lower.contains("requires purchase")
        || lower.contains("this video requires payment")
    {
        return Some(BlockingReason::DrmProtected);
    }

    if lower.contains("sabr") {
        return Some(BlockingReason::SabrStreaming);
    }

    if lower.contains("po token") || lower.contains("proof of origin") {
        return Some(BlockingReason::PoTokenRequired);
    }

    if lower.contains("age-restricted") || lower.contains("sign in to confirm your age") {
        return Some(BlockingReason::AgeRestricted);
    }

    if lower.contains("private video") || lower.contains("video is private") {
        return Some(BlockingReason::PrivateVideo);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("this video is no longer available")
    {
        return Some(BlockingReason::VideoUnavailable);
    }

    if lower.contains("not available in your country") || lower.contains("blocked in your country") {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("not a bot") || lower.contains("captcha") || lower.contains("unusual traffic") {
        return Some(BlockingReason::BotDetection);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Http403Forbidden);
    }

    if lower.contains("401") || lower.contains("unauthorized") {
        return Some(BlockingReason::Http401Unauthorized);
    }

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection refused") {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

/// First line of stderr worth showing in logs
pub fn error_context(error: &str) -> Option<String> {
    error
        .lines()
        .map(str::trim)
        .find(|l| {
            let l = l.to_lowercase();
            l.starts_with("error:") || l.contains("forbidden") || l.contains("unavailable") || l.contains("sabr")
        })
        .map(|s| s.to_string())
}
