//! Subtitle track formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subtitle file format accepted for burning.
///
/// FFmpeg's `subtitles` filter keys off the file extension, so the format
/// determines the extension the track is materialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleFormat {
    /// WebVTT
    Vtt,
    /// SubRip
    #[default]
    Srt,
}

impl SubtitleFormat {
    /// Sniff the format from the raw subtitle bytes.
    ///
    /// WebVTT files are required to start with a `WEBVTT` line (an optional
    /// UTF-8 BOM may precede it); everything else is treated as SubRip.
    pub fn sniff(bytes: &[u8]) -> Self {
        let head = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
        if head.starts_with(b"WEBVTT") {
            SubtitleFormat::Vtt
        } else {
            SubtitleFormat::Srt
        }
    }

    /// File extension for this format, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Srt => "srt",
        }
    }
}
