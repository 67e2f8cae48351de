// FormatSelector - matches a partial user request against a format catalog
//
// Handles:
// - Explicit format id lookup (wins over every other field)
// - Sequential container -> quality -> bitrate narrowing
// - Approximate bitrate matching against display labels ("378 kbps")
// - Tie-break: audio track first, then higher bitrate
// - yt-dlp selector strings for audio and relaxed retries

use regex::Regex;
use std::cmp::Reverse;
use std::collections::BTreeSet;

use super::errors::DownloadError;
use super::models::{AvailableOptions, FormatDescriptor, SelectionCriteria};

/// yt-dlp selector for the audio half of a merge
pub const BEST_AUDIO_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio/best";

/// Minimum absolute slack when comparing bitrates, in bps
const BITRATE_TOLERANCE_FLOOR: f64 = 2000.0;
/// Relative slack when comparing bitrates
const BITRATE_TOLERANCE_RATIO: f64 = 0.05;

pub struct FormatSelector;

impl FormatSelector {
    /// Pick exactly one catalog entry for the criteria.
    ///
    /// Filters narrow the working set in a fixed order and never backtrack:
    /// if a combination is only satisfiable by relaxing an earlier filter,
    /// resolution fails.
    pub fn resolve(
        catalog: &[FormatDescriptor],
        criteria: &SelectionCriteria,
    ) -> Result<FormatDescriptor, DownloadError> {
        if let Some(id) = &criteria.explicit_format_id {
            return catalog
                .iter()
                .find(|f| &f.format_id == id)
                .cloned()
                .ok_or_else(|| DownloadError::ExplicitFormatNotFound(id.clone()));
        }

        let mut candidates: Vec<&FormatDescriptor> = catalog.iter().collect();

        if let Some(container) = &criteria.container {
            candidates.retain(|f| f.container.eq_ignore_ascii_case(container));
            if candidates.is_empty() {
                return Err(DownloadError::NoMatchingFormat);
            }
        }

        if let Some(quality) = &criteria.quality_bucket {
            candidates.retain(|f| {
                f.quality_bucket
                    .as_deref()
                    .map_or(false, |q| q.eq_ignore_ascii_case(quality))
            });
            if candidates.is_empty() {
                return Err(DownloadError::NoMatchingFormat);
            }
        }

        if let Some(label) = &criteria.bitrate_label {
            candidates.retain(|f| f.bitrate_bps.map_or(false, |bps| Self::bitrate_matches(bps, label)));
        }

        // min_by_key keeps the first of equal candidates, so catalog order
        // settles full ties deterministically
        candidates
            .into_iter()
            .min_by_key(|f| (Reverse(f.has_audio_track), Reverse(f.bitrate_bps.unwrap_or(0))))
            .cloned()
            .ok_or(DownloadError::NoMatchingFormat)
    }

    /// Display rule shared with the format picker
    pub fn format_bitrate(bps: u64) -> String {
        if bps >= 1_000_000 {
            let tenths = (bps as f64 / 100_000.0).round() / 10.0;
            format!("{:.1} Mbps", tenths)
        } else if bps >= 1_000 {
            format!("{} kbps", (bps as f64 / 1_000.0).round() as u64)
        } else {
            format!("{} bps", bps)
        }
    }

    /// Parse a display label back into an approximate bps value
    pub fn parse_bitrate_label(label: &str) -> Option<f64> {
        lazy_static::lazy_static! {
            static ref LABEL_RE: Regex =
                Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(mbps|kbps|bps)\s*$").unwrap();
        }

        let caps = LABEL_RE.captures(label)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let factor = match caps.get(2)?.as_str().to_lowercase().as_str() {
            "mbps" => 1_000_000.0,
            "kbps" => 1_000.0,
            _ => 1.0,
        };
        Some(value * factor)
    }

    /// Exact display match, or within tolerance of the parsed label.
    ///
    /// The tolerance absorbs the double rounding introduced when the label
    /// itself was produced by `format_bitrate`.
    pub fn bitrate_matches(candidate_bps: u64, label: &str) -> bool {
        if Self::format_bitrate(candidate_bps) == label.trim() {
            return true;
        }

        match Self::parse_bitrate_label(label) {
            Some(target) => {
                let tolerance = BITRATE_TOLERANCE_FLOOR.max(BITRATE_TOLERANCE_RATIO * target);
                (candidate_bps as f64 - target).abs() <= tolerance
            }
            None => false,
        }
    }

    /// Unique extensions, qualities and bitrate labels for the picker
    pub fn available_options(catalog: &[FormatDescriptor]) -> AvailableOptions {
        let formats: BTreeSet<String> = catalog
            .iter()
            .map(|f| f.container.clone())
            .filter(|c| !c.is_empty())
            .collect();

        let mut qualities: Vec<String> = catalog
            .iter()
            .filter_map(|f| f.quality_bucket.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        qualities.sort_by_key(|q| Reverse(q.trim_end_matches('p').parse::<u32>().unwrap_or(0)));

        let bitrates: BTreeSet<u64> = catalog.iter().filter_map(|f| f.bitrate_bps).collect();
        let mut labels: Vec<String> = Vec::new();
        for bps in bitrates.into_iter().rev() {
            let label = Self::format_bitrate(bps);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        AvailableOptions {
            formats: formats.into_iter().collect(),
            qualities,
            bitrates: labels,
        }
    }

    /// yt-dlp selector used when the exact format is blocked: best video at
    /// or below the ceiling merged with best audio, container preferred
    pub fn relaxed_selector(container: &str, height_ceiling: Option<u32>) -> String {
        match height_ceiling {
            Some(h) => format!(
                "bv*[ext={c}][height<={h}]+ba/b[ext={c}][height<={h}]/bv*[height<={h}]+ba/b[height<={h}]",
                c = container,
                h = h
            ),
            None => format!("bv*[ext={c}]+ba/b[ext={c}]/bv*+ba/b", c = container),
        }
    }
}
