//! Caption tracks for rebuilt players.
//!
//! Each configured language is fetched independently from a bundled resource
//! namespace laid out as `{directory}/{identifier}.vtt`. A fetch resolves to a
//! [`CaptionFetch`] that the rewriter turns into a `<track>` element; missing
//! files only ever cost that one track.

use crate::dom::ElementSpec;
use crate::media::MediaIdentifier;
use futures_util::future::{FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// MIME type of the caption files.
pub const CAPTION_MIME: &str = "text/vtt";

/// One caption language attached to every player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrackConfig {
    /// Resource subdirectory holding this language's files.
    pub directory: String,
    /// BCP 47 language tag for `<track srclang>`.
    pub srclang: String,
    /// Label shown in the player's caption menu.
    pub label: String,
    /// Marks the track active by default.
    #[serde(default)]
    pub default: bool,
}

impl CaptionTrackConfig {
    /// Builds a track description.
    pub fn new(directory: &str, srclang: &str, label: &str, default: bool) -> Self {
        Self {
            directory: directory.to_string(),
            srclang: srclang.to_string(),
            label: label.to_string(),
            default,
        }
    }

    /// Resource path of the caption file for `identifier`.
    pub fn resource_path(&self, identifier: &MediaIdentifier) -> String {
        format!("{}/{identifier}.vtt", self.directory)
    }

    /// `<track>` element pointing at `src`.
    pub fn element(&self, src: &str) -> ElementSpec {
        let track = ElementSpec::new("track")
            .attr("kind", "subtitles")
            .attr("src", src)
            .attr("srclang", self.srclang.as_str())
            .attr("label", self.label.as_str());
        if self.default {
            track.flag("default")
        } else {
            track
        }
    }
}

/// English (default) and Japanese tracks, matching the converter's output tree.
pub fn default_tracks() -> Vec<CaptionTrackConfig> {
    vec![
        CaptionTrackConfig::new("en", "en", "English", true),
        CaptionTrackConfig::new("jp", "ja", "日本語", false),
    ]
}

/// Errors surfaced while fetching one caption file.
#[derive(Debug, Error)]
pub enum CaptionError {
    /// No resource exists at the path.
    #[error("caption resource {0} not found")]
    Missing(String),
    /// Reading the resource failed.
    #[error("failed to read caption resource {path}: {source}")]
    Io {
        /// Resource path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The host fetch mechanism rejected the request.
    #[error("caption fetch for {path} failed: {message}")]
    Fetch {
        /// Resource path.
        path: String,
        /// Host-provided description.
        message: String,
    },
}

/// Bundled resource namespace caption files are read from.
pub trait CaptionSource {
    /// Reads the text at `path` (for example `en/017.vtt`).
    fn fetch(&self, path: &str) -> LocalBoxFuture<'static, Result<String, CaptionError>>;
}

/// Maps `path` into a bundled namespace with `lookup`.
///
/// A path the namespace cannot map is [`CaptionError::Missing`]; it is never
/// fetched from anywhere else.
pub fn bundled_url(
    path: &str,
    lookup: impl FnOnce(&str) -> Option<String>,
) -> Result<String, CaptionError> {
    lookup(path).ok_or_else(|| CaptionError::Missing(path.to_string()))
}

impl<T: CaptionSource + ?Sized> CaptionSource for Rc<T> {
    fn fetch(&self, path: &str) -> LocalBoxFuture<'static, Result<String, CaptionError>> {
        (**self).fetch(path)
    }
}

/// Caption files held in memory, keyed by resource path.
#[derive(Debug, Clone, Default)]
pub struct MemoryCaptions {
    files: Rc<HashMap<String, String>>,
}

impl MemoryCaptions {
    /// Empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one file.
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        Rc::make_mut(&mut self.files).insert(path.to_string(), contents.to_string());
        self
    }
}

impl CaptionSource for MemoryCaptions {
    fn fetch(&self, path: &str) -> LocalBoxFuture<'static, Result<String, CaptionError>> {
        let result = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| CaptionError::Missing(path.to_string()));
        async move { result }.boxed_local()
    }
}

/// Caption files read from a directory on disk.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct DirectoryCaptions {
    root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl DirectoryCaptions {
    /// Serves files below `root`.
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl CaptionSource for DirectoryCaptions {
    fn fetch(&self, path: &str) -> LocalBoxFuture<'static, Result<String, CaptionError>> {
        let full = self.root.join(path);
        let path = path.to_string();
        async move {
            match tokio::fs::read_to_string(&full).await {
                Ok(text) => Ok(text),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(CaptionError::Missing(path))
                }
                Err(source) => Err(CaptionError::Io { path, source }),
            }
        }
        .boxed_local()
    }
}

/// Outcome of fetching one track for one player.
#[derive(Debug)]
pub struct CaptionFetch<N> {
    /// Player the track belongs to.
    pub player: N,
    /// Track being loaded.
    pub track: CaptionTrackConfig,
    /// Caption text or the reason it is unavailable.
    pub result: Result<String, CaptionError>,
}

/// Issues caption fetches for freshly built players.
pub struct SubtitleLoader<C> {
    source: C,
    tracks: Vec<CaptionTrackConfig>,
}

impl<C: CaptionSource> SubtitleLoader<C> {
    /// Loader reading `tracks` from `source`.
    pub fn new(source: C, tracks: Vec<CaptionTrackConfig>) -> Self {
        Self { source, tracks }
    }

    /// Configured tracks.
    pub fn tracks(&self) -> &[CaptionTrackConfig] {
        &self.tracks
    }

    /// One independent future per configured track.
    pub fn requests<N>(
        &self,
        player: &N,
        identifier: &MediaIdentifier,
    ) -> Vec<LocalBoxFuture<'static, CaptionFetch<N>>>
    where
        N: Clone + 'static,
    {
        self.tracks
            .iter()
            .map(|track| {
                let fetch = self.source.fetch(&track.resource_path(identifier));
                let player = player.clone();
                let track = track.clone();
                async move {
                    CaptionFetch {
                        player,
                        track,
                        result: fetch.await,
                    }
                }
                .boxed_local()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    fn identifier() -> MediaIdentifier {
        MediaIdentifier::from_filename("017.asx").unwrap()
    }

    #[test]
    fn unmapped_bundle_path_is_missing() {
        assert!(matches!(
            bundled_url("en/017.vtt", |_| None),
            Err(CaptionError::Missing(path)) if path == "en/017.vtt"
        ));
        assert_eq!(
            bundled_url("en/017.vtt", |path| Some(format!("chrome-extension://abc/vtt/{path}")))
                .unwrap(),
            "chrome-extension://abc/vtt/en/017.vtt"
        );
    }

    #[test]
    fn track_element_marks_only_default_language() {
        let tracks = default_tracks();
        let english = tracks[0].element("blob:en");
        let japanese = tracks[1].element("blob:jp");

        assert_eq!(english.attribute("default"), Some(""));
        assert_eq!(english.attribute("srclang"), Some("en"));
        assert_eq!(japanese.attribute("default"), None);
        assert_eq!(japanese.attribute("srclang"), Some("ja"));
        assert_eq!(japanese.attribute("kind"), Some("subtitles"));
    }

    #[test]
    fn resource_paths_follow_language_directories() {
        let tracks = default_tracks();
        assert_eq!(tracks[0].resource_path(&identifier()), "en/017.vtt");
        assert_eq!(tracks[1].resource_path(&identifier()), "jp/017.vtt");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tracks_fail_independently() {
        let source = MemoryCaptions::new().with_file("jp/017.vtt", "WEBVTT\n\n");
        let loader = SubtitleLoader::new(source, default_tracks());

        let fetches = join_all(loader.requests(&7usize, &identifier())).await;

        assert_eq!(fetches.len(), 2);
        assert!(matches!(fetches[0].result, Err(CaptionError::Missing(ref path)) if path == "en/017.vtt"));
        assert_eq!(fetches[1].result.as_deref().ok(), Some("WEBVTT\n\n"));
        assert!(fetches.iter().all(|fetch| fetch.player == 7));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn directory_source_reads_files_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("en")).unwrap();
        std::fs::write(dir.path().join("en/017.vtt"), "WEBVTT\n\nhello\n").unwrap();
        let source = DirectoryCaptions::new(dir.path());

        assert_eq!(source.fetch("en/017.vtt").await.unwrap(), "WEBVTT\n\nhello\n");
        assert!(matches!(
            source.fetch("jp/017.vtt").await,
            Err(CaptionError::Missing(_))
        ));
    }
}
