//! Builds the container that replaces a legacy element: player, tools row and status note.

use crate::dom::{ClickAction, Dom, ElementSpec};
use crate::media::{MediaFormat, MediaIdentifier, ResolvedMediaTarget};
use serde::{Deserialize, Serialize};

/// Width-to-height ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    /// Horizontal component.
    pub width: u32,
    /// Vertical component.
    pub height: u32,
}

impl AspectRatio {
    /// 16:9, used when neither dimension is known.
    pub const WIDESCREEN: Self = Self::new(16, 9);
    /// 4:3, the shape of most legacy Windows Media clips.
    pub const STANDARD: Self = Self::new(4, 3);

    /// Builds a ratio.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn height_for(self, width: u32) -> u32 {
        scale(width, self.height, self.width)
    }

    fn width_for(self, height: u32) -> u32 {
        scale(height, self.width, self.height)
    }
}

fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let denominator = u64::from(denominator.max(1));
    let scaled = (u64::from(value) * u64::from(numerator) + denominator / 2) / denominator;
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Player sizing defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Width used when the legacy element specifies no dimensions.
    pub default_width: u32,
    /// Aspect ratio of the original media, used when only one dimension is known.
    pub source_aspect: AspectRatio,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_width: 640,
            source_aspect: AspectRatio::STANDARD,
        }
    }
}

/// Whether the host can play the resolved format itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSupport {
    /// The player is shown.
    Native,
    /// The player is hidden and the note explains how to play the download.
    Unsupported,
}

impl PlaybackSupport {
    /// Probes `dom` for `format`.
    pub fn detect<D: Dom>(dom: &D, format: MediaFormat) -> Self {
        if dom.can_play_type(format.mime_type()) {
            Self::Native
        } else {
            Self::Unsupported
        }
    }
}

/// Built container plus the caption work it still needs once inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Container to insert in place of the legacy element.
    pub element: ElementSpec,
    /// Identifier to load captions for, when the media has one.
    pub captions: Option<MediaIdentifier>,
}

/// Class of the outer container.
pub const CONTAINER_CLASS: &str = "embedfix-player";
/// Class of the download/copy row.
pub const TOOLS_CLASS: &str = "embedfix-tools";
/// Class of the status note.
pub const NOTE_CLASS: &str = "embedfix-note";

const COPY_LABEL: &str = "Copy URL";
const COPIED_LABEL: &str = "Copied!";

/// Composes replacement containers.
#[derive(Debug, Clone, Default)]
pub struct ReplacementBuilder {
    config: PlayerConfig,
}

impl ReplacementBuilder {
    /// Builder using `config` for sizing.
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Player dimensions for the given legacy width/height.
    pub fn player_size(&self, width: Option<u32>, height: Option<u32>) -> (u32, u32) {
        let aspect = self.config.source_aspect;
        match (width, height) {
            (Some(width), Some(height)) => (width, height),
            (Some(width), None) => (width, aspect.height_for(width)),
            (None, Some(height)) => (aspect.width_for(height), height),
            (None, None) => {
                let width = self.config.default_width.max(1);
                (width, AspectRatio::WIDESCREEN.height_for(width))
            }
        }
    }

    /// Builds the container for `target`.
    pub fn build(
        &self,
        target: &ResolvedMediaTarget,
        identifier: Option<&MediaIdentifier>,
        support: PlaybackSupport,
    ) -> Replacement {
        let format = target.primary_format;
        let (width, height) = self.player_size(target.width, target.height);

        let mut player = ElementSpec::new("video")
            .flag("controls")
            .attr("preload", "metadata")
            .attr("width", width.to_string())
            .attr("height", height.to_string())
            .child(
                ElementSpec::new("source")
                    .attr("src", target.primary_url.as_str())
                    .attr("type", format.mime_type()),
            );

        let mut note = ElementSpec::new("div")
            .attr("class", NOTE_CLASS)
            .style("margin-top", "4px")
            .style("color", "#555")
            .text(unsupported_message(format));

        match support {
            PlaybackSupport::Native => note = note.style("display", "none"),
            PlaybackSupport::Unsupported => {
                player = player.style("display", "none");
                note = note.style("display", "block");
            }
        }

        let element = ElementSpec::new("div")
            .attr("class", CONTAINER_CLASS)
            .style("display", "inline-block")
            .style("font", "14px/1.4 system-ui, sans-serif")
            .child(player)
            .child(self.tools_row(target))
            .child(note);

        Replacement {
            element,
            captions: identifier.cloned(),
        }
    }

    fn tools_row(&self, target: &ResolvedMediaTarget) -> ElementSpec {
        let primary_label = format!("Open / download {}", target.primary_format.label());
        let mut tools = ElementSpec::new("p")
            .attr("class", TOOLS_CLASS)
            .style("margin", "6px 0")
            .child(download_link(target.primary_url.as_str(), &primary_label));

        if let Some(fallback) = &target.fallback_url {
            let label = format!("Download original {}", MediaFormat::Wmv.label());
            tools = tools
                .text(" ")
                .child(download_link(fallback.as_str(), &label));
        }

        tools.child(
            ElementSpec::new("button")
                .attr("type", "button")
                .style("margin-left", "8px")
                .style("padding", "2px 6px")
                .style("cursor", "pointer")
                .text(COPY_LABEL)
                .on_click(ClickAction::CopyToClipboard {
                    text: target.primary_url.to_string(),
                    confirmation: COPIED_LABEL.to_string(),
                }),
        )
    }
}

fn download_link(href: &str, label: &str) -> ElementSpec {
    ElementSpec::new("a")
        .attr("href", href)
        .attr("target", "_blank")
        .attr("rel", "noopener noreferrer")
        .flag("download")
        .text(label)
}

fn unsupported_message(format: MediaFormat) -> String {
    match format {
        MediaFormat::Wmv => format!(
            "Your browser can't play {}. Use the link above, then play in VLC / mpv or convert to MP4.",
            format.label()
        ),
        MediaFormat::Mp4 => format!(
            "Your browser can't play {}. Use the link above, then play in VLC / mpv.",
            format.label()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn target(fallback: bool) -> ResolvedMediaTarget {
        ResolvedMediaTarget {
            primary_url: Url::parse("https://cdn.test/mp4/017.mp4").unwrap(),
            primary_format: MediaFormat::Mp4,
            fallback_url: fallback.then(|| Url::parse("https://host/a/move/017.wmv").unwrap()),
            width: Some(320),
            height: Some(240),
        }
    }

    fn tools(built: &Replacement) -> &ElementSpec {
        built
            .element
            .find_all("p")
            .into_iter()
            .find(|p| p.attribute("class") == Some(TOOLS_CLASS))
            .expect("tools row")
    }

    #[test]
    fn sizes_player_from_known_dimensions() {
        let builder = ReplacementBuilder::default();
        assert_eq!(builder.player_size(Some(320), Some(240)), (320, 240));
        assert_eq!(builder.player_size(None, None), (640, 360));
        assert_eq!(builder.player_size(Some(320), None), (320, 240));
        assert_eq!(builder.player_size(None, Some(180)), (240, 180));
    }

    #[test]
    fn source_aspect_is_configurable() {
        let builder = ReplacementBuilder::new(PlayerConfig {
            default_width: 480,
            source_aspect: AspectRatio::WIDESCREEN,
        });
        assert_eq!(builder.player_size(Some(320), None), (320, 180));
        assert_eq!(builder.player_size(None, None), (480, 270));
    }

    #[test]
    fn player_has_exactly_one_source() {
        let built = ReplacementBuilder::default().build(&target(true), None, PlaybackSupport::Native);
        let video = built.element.find_all("video");
        assert_eq!(video.len(), 1);
        let sources = video[0].find_all("source");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].attribute("src"), Some("https://cdn.test/mp4/017.mp4"));
        assert_eq!(sources[0].attribute("type"), Some("video/mp4"));
        assert_eq!(video[0].attribute("width"), Some("320"));
    }

    #[test]
    fn fallback_link_only_when_fallback_present() {
        let builder = ReplacementBuilder::default();
        let single = builder.build(&target(false), None, PlaybackSupport::Native);
        let double = builder.build(&target(true), None, PlaybackSupport::Native);

        assert_eq!(tools(&single).find_all("a").len(), 1);
        let links = tools(&double).find_all("a");
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].attribute("href"), Some("https://host/a/move/017.wmv"));
        assert_eq!(links[1].text_content(), "Download original WMV");
    }

    #[test]
    fn copy_button_carries_primary_url() {
        let built = ReplacementBuilder::default().build(&target(false), None, PlaybackSupport::Native);
        let buttons = tools(&built).find_all("button");
        assert_eq!(
            buttons[0].click_action(),
            Some(&ClickAction::CopyToClipboard {
                text: "https://cdn.test/mp4/017.mp4".to_string(),
                confirmation: "Copied!".to_string(),
            })
        );
    }

    #[test]
    fn unsupported_format_hides_player_and_shows_note() {
        let builder = ReplacementBuilder::default();
        let hidden = builder.build(&target(false), None, PlaybackSupport::Unsupported);
        let shown = builder.build(&target(false), None, PlaybackSupport::Native);

        assert!(hidden.element.find_all("video")[0].is_hidden());
        let note = hidden.element.find_all("div")[0];
        assert!(!note.is_hidden());
        assert!(note.text_content().contains("can't play MP4"));

        assert!(!shown.element.find_all("video")[0].is_hidden());
        assert!(shown.element.find_all("div")[0].is_hidden());
    }

    #[test]
    fn caption_request_follows_identifier() {
        let builder = ReplacementBuilder::default();
        let id = MediaIdentifier::from_filename("017.asx").unwrap();
        assert_eq!(
            builder
                .build(&target(false), Some(&id), PlaybackSupport::Native)
                .captions,
            Some(id)
        );
        assert_eq!(
            builder
                .build(&target(false), None, PlaybackSupport::Native)
                .captions,
            None
        );
    }
}
