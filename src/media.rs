//! Data model flowing from extraction through resolution into the built player.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::fmt;
use url::Url;

/// Extension of the legacy playlist pointer files.
pub const PLAYLIST_EXTENSION: &str = "asx";

static PLAYLIST_SUFFIX: Lazy<regex::Regex> = Lazy::new(|| {
    // The extension must close the path; only a query or fragment may follow.
    regex::Regex::new(r"(?is)\.asx(?:[?#].*)?$").expect("playlist suffix pattern")
});

/// Raw playlist path or URL taken from a legacy element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LegacyMediaReference(String);

impl LegacyMediaReference {
    /// Accepts `raw` when it names a playlist file, otherwise returns `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !PLAYLIST_SUFFIX.is_match(trimmed) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Returns the reference as written in the markup.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LegacyMediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container formats the engine can point a player at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// The legacy Windows Media file the playlist points at.
    Wmv,
    /// Modern substitute hosted out of band.
    Mp4,
}

impl MediaFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wmv => "wmv",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type used for `<source type>` and playback support probes.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wmv => "video/x-ms-wmv",
            Self::Mp4 => "video/mp4",
        }
    }

    /// Short human label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Wmv => "WMV",
            Self::Mp4 => "MP4",
        }
    }
}

/// Short numeric token that joins a media file to its caption resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MediaIdentifier(String);

impl MediaIdentifier {
    /// Length of the digit run that forms an identifier.
    pub const DIGITS: usize = 3;

    /// Takes the first maximal run of exactly three ASCII digits in `filename`.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let bytes = filename.as_bytes();
        let mut idx = 0;
        while idx < bytes.len() {
            if !bytes[idx].is_ascii_digit() {
                idx += 1;
                continue;
            }
            let start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            if idx - start == Self::DIGITS {
                return Some(Self(filename[start..idx].to_string()));
            }
        }
        None
    }

    /// Derives the identifier from the filename of a playlist reference.
    pub fn from_reference(reference: &LegacyMediaReference) -> Option<Self> {
        let raw = reference.as_str();
        let path = raw.split(['?', '#']).next().unwrap_or(raw);
        let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);
        Self::from_filename(filename)
    }

    /// Derives the identifier from the last path segment of `url`.
    pub fn from_url(url: &Url) -> Option<Self> {
        let filename = url.path_segments()?.last()?;
        Self::from_filename(filename)
    }

    /// Returns the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute media locations computed for one legacy element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMediaTarget {
    /// URL the player source points at.
    pub primary_url: Url,
    /// Format of `primary_url`.
    pub primary_format: MediaFormat,
    /// Original-format file offered as a second download, when distinct.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<Url>,
    /// Width carried over from the legacy element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height carried over from the legacy element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Parses a `width`/`height` attribute the way browsers' `parseInt` reads it.
///
/// Leading digits win (`"320px"` is 320); zero and non-numeric values are unknown.
pub fn parse_dimension(raw: &str) -> Option<u32> {
    let trimmed = raw.trim_start();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<u32>().ok().filter(|value| *value > 0)
}
