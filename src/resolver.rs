//! Turns playlist references into absolute, playable media URLs.

use crate::media::{LegacyMediaReference, MediaFormat, ResolvedMediaTarget, PLAYLIST_EXTENSION};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// How the primary (played) URL is derived from the playlist reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Play the legacy file next to the playlist.
    #[default]
    Direct,
    /// Play a modern file with the same stem hosted under `content_base`.
    Substituted {
        /// Directory the substitute files live in.
        content_base: Url,
    },
}

/// Stateless resolver configured with one [`ResolutionPolicy`].
#[derive(Debug, Clone)]
pub struct UrlResolver {
    policy: ResolutionPolicy,
}

impl UrlResolver {
    /// Builds a resolver for `policy`.
    pub fn new(policy: ResolutionPolicy) -> Self {
        let policy = match policy {
            ResolutionPolicy::Substituted { content_base } => ResolutionPolicy::Substituted {
                content_base: as_directory(content_base),
            },
            direct => direct,
        };
        Self { policy }
    }

    /// Active policy.
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Resolves `reference` relative to the directory of `page_location`.
    ///
    /// Returns `None` for anything that does not end up as a URL whose path
    /// ends in the playlist extension.
    pub fn resolve(
        &self,
        reference: &LegacyMediaReference,
        page_location: &Url,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Option<ResolvedMediaTarget> {
        let directory = page_directory(page_location)?;
        let playlist = match directory.join(reference.as_str()) {
            Ok(url) => url,
            Err(err) => {
                debug!(%reference, %err, "reference does not resolve to a URL");
                return None;
            }
        };
        let legacy = swap_extension(&playlist, MediaFormat::Wmv)?;

        let (primary_url, primary_format, fallback_url) = match &self.policy {
            ResolutionPolicy::Direct => (legacy, MediaFormat::Wmv, None),
            ResolutionPolicy::Substituted { content_base } => {
                let stem = playlist_stem(&playlist)?;
                let modern = content_base
                    .join(&format!("./{stem}.{}", MediaFormat::Mp4.extension()))
                    .ok()?;
                (modern, MediaFormat::Mp4, Some(legacy))
            }
        };

        Some(ResolvedMediaTarget {
            primary_url,
            primary_format,
            fallback_url,
            width,
            height,
        })
    }
}

/// Directory containing `page`: final path segment, query and fragment removed.
pub fn page_directory(page: &Url) -> Option<Url> {
    page.join("./").ok()
}

/// Replaces the playlist extension closing the path of `url` with `format`'s.
///
/// Query and fragment are kept. `None` when the path does not end in the
/// playlist extension.
pub fn swap_extension(url: &Url, format: MediaFormat) -> Option<Url> {
    let path = url.path();
    let base = strip_playlist_extension(path)?;
    let mut swapped = url.clone();
    swapped.set_path(&format!("{base}.{}", format.extension()));
    Some(swapped)
}

fn playlist_stem(url: &Url) -> Option<&str> {
    let filename = url.path_segments()?.last()?;
    strip_playlist_extension(filename).filter(|stem| !stem.is_empty())
}

fn strip_playlist_extension(path: &str) -> Option<&str> {
    let suffix_len = PLAYLIST_EXTENSION.len() + 1;
    let split = path.len().checked_sub(suffix_len)?;
    if !path.is_char_boundary(split) {
        return None;
    }
    let (base, suffix) = path.split_at(split);
    let matches = suffix
        .strip_prefix('.')
        .map(|ext| ext.eq_ignore_ascii_case(PLAYLIST_EXTENSION))
        .unwrap_or(false);
    matches.then_some(base)
}

fn as_directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
