#![warn(missing_docs)]
//! Core library entry points for the embedfix legacy media rewriter.
//!
//! The engine finds `<embed>`/`<object>` elements pointing at ASX playlists,
//! replaces each with an HTML5 player plus download tools, and attaches
//! bundled WebVTT captions. It runs against any [`Dom`] host: the in-memory
//! [`html::Document`] used by the offline CLI, or the live browser document
//! on `wasm32`.

pub mod builder;
pub mod captions;
pub mod controls;
pub mod dom;
pub mod extractor;
pub mod html;
pub mod manifest;
pub mod media;
pub mod resolver;
pub mod rewriter;
#[cfg(not(target_arch = "wasm32"))]
pub mod runtime;
#[cfg(target_arch = "wasm32")]
mod web;

pub use builder::{AspectRatio, PlaybackSupport, PlayerConfig, Replacement, ReplacementBuilder};
pub use captions::{
    default_tracks, CaptionError, CaptionFetch, CaptionSource, CaptionTrackConfig, MemoryCaptions,
    SubtitleLoader,
};
#[cfg(not(target_arch = "wasm32"))]
pub use captions::DirectoryCaptions;
pub use controls::{Cli, ConfigError, EngineConfig};
pub use dom::{ClickAction, Dom, DomError, ElementSpec, NodeSpec};
pub use manifest::RewriteRecord;
pub use media::{LegacyMediaReference, MediaFormat, MediaIdentifier, ResolvedMediaTarget};
pub use resolver::{ResolutionPolicy, UrlResolver};
pub use rewriter::{
    event_channel, LiveRewriter, RewriteEvent, RewriteStats, SkipReason, Visit,
};
#[cfg(not(target_arch = "wasm32"))]
pub use runtime::run as run_rewriter;
#[cfg(target_arch = "wasm32")]
pub use web::install;
