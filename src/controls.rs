//! Engine configuration and the command-line surface that builds it.

use crate::builder::PlayerConfig;
use crate::captions::{default_tracks, CaptionTrackConfig};
use crate::resolver::ResolutionPolicy;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Everything the rewriter needs to know about one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How played URLs are derived from playlist references.
    pub resolution: ResolutionPolicy,
    /// Caption languages to attach; `None` disables captions.
    pub captions: Option<Vec<CaptionTrackConfig>>,
    /// Player sizing.
    pub player: PlayerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolution: ResolutionPolicy::Direct,
            captions: Some(default_tracks()),
            player: PlayerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON options object, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Options)
    }

    /// Whether caption tracks will be requested.
    pub fn captions_enabled(&self) -> bool {
        self.captions
            .as_ref()
            .map(|tracks| !tracks.is_empty())
            .unwrap_or(false)
    }
}

/// Errors raised while assembling an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Substituted mode was requested without a content base.
    #[error("--mode substituted requires --content-base")]
    MissingContentBase,
    /// The content base cannot hold relative file names.
    #[error("content base {0} cannot be used as a directory URL")]
    InvalidContentBase(Url),
    /// Host-supplied options were malformed.
    #[error("invalid engine options: {0}")]
    Options(#[source] serde_json::Error),
}

/// Resolution mode selectable on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Point players at the `.wmv` next to the playlist.
    Direct,
    /// Point players at an `.mp4` under `--content-base`.
    Substituted,
}

/// Command-line interface of the offline rewriter.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "embedfix",
    version,
    about = "Rewrite legacy ASX/WMV embeds in a saved page into HTML5 players"
)]
pub struct Cli {
    /// URL the page was served from; playlist paths resolve against its directory
    #[arg(long, env = "EMBEDFIX_PAGE_URL")]
    pub page_url: Url,

    /// HTML file to read ('-' for stdin); decoded per its byte order mark or <meta charset>, else UTF-8
    #[arg(long, short, env = "EMBEDFIX_INPUT", default_value = "-")]
    pub input: String,

    /// Where to write the rewritten HTML ('-' for stdout)
    #[arg(long, short, env = "EMBEDFIX_OUTPUT", default_value = "-")]
    pub output: String,

    /// How played URLs are derived
    #[arg(long, value_enum, env = "EMBEDFIX_MODE", default_value_t = ModeArg::Direct)]
    pub mode: ModeArg,

    /// Directory URL holding substitute .mp4 files
    #[arg(long, env = "EMBEDFIX_CONTENT_BASE")]
    pub content_base: Option<Url>,

    /// Directory with per-language caption folders (en/, jp/)
    #[arg(long, env = "EMBEDFIX_CAPTIONS", default_value = "vtt")]
    pub captions: PathBuf,

    /// Skip caption attachment
    #[arg(long, env = "EMBEDFIX_NO_CAPTIONS", default_value_t = false)]
    pub no_captions: bool,

    /// Optional JSONL report with one record per rewritten element
    #[arg(long, env = "EMBEDFIX_REPORT")]
    pub report: Option<PathBuf>,

    /// MIME types the target browser plays natively, comma separated
    #[arg(
        long,
        env = "EMBEDFIX_PLAYABLE",
        value_delimiter = ',',
        default_value = "video/mp4,video/webm"
    )]
    pub playable: Vec<String>,

    /// Player width when the legacy element carries no dimensions
    #[arg(long, env = "EMBEDFIX_DEFAULT_WIDTH", default_value_t = 640)]
    pub default_width: u32,
}

impl Cli {
    /// Converts the parsed CLI into an `EngineConfig`.
    pub fn build_config(&self) -> Result<EngineConfig, ConfigError> {
        let resolution = match self.mode {
            ModeArg::Direct => ResolutionPolicy::Direct,
            ModeArg::Substituted => {
                let base = self
                    .content_base
                    .clone()
                    .ok_or(ConfigError::MissingContentBase)?;
                if base.cannot_be_a_base() {
                    return Err(ConfigError::InvalidContentBase(base));
                }
                ResolutionPolicy::Substituted { content_base: base }
            }
        };
        Ok(EngineConfig {
            resolution,
            captions: (!self.no_captions).then(default_tracks),
            player: PlayerConfig {
                default_width: self.default_width,
                ..PlayerConfig::default()
            },
        })
    }

    /// Playable MIME types with blanks removed.
    pub fn playable_types(&self) -> Vec<String> {
        self.playable
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["embedfix", "--page-url", "https://host/a/b/12.html"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_to_direct_mode_with_captions() {
        let config = cli(&[]).build_config().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.captions_enabled());
    }

    #[test]
    fn substituted_mode_requires_content_base() {
        assert!(matches!(
            cli(&["--mode", "substituted"]).build_config(),
            Err(ConfigError::MissingContentBase)
        ));
        let config = cli(&["--mode", "substituted", "--content-base", "https://cdn.test/mp4/"])
            .build_config()
            .unwrap();
        assert_eq!(
            config.resolution,
            ResolutionPolicy::Substituted {
                content_base: Url::parse("https://cdn.test/mp4/").unwrap()
            }
        );
    }

    #[test]
    fn no_captions_disables_tracks() {
        let config = cli(&["--no-captions"]).build_config().unwrap();
        assert_eq!(config.captions, None);
        assert!(!config.captions_enabled());
    }

    #[test]
    fn playable_list_splits_on_commas() {
        assert_eq!(
            cli(&["--playable", "video/mp4, video/x-ms-wmv"]).playable_types(),
            vec!["video/mp4".to_string(), "video/x-ms-wmv".to_string()]
        );
    }

    #[test]
    fn options_json_fills_missing_fields() {
        let config = EngineConfig::from_json(
            r#"{"resolution":{"mode":"substituted","content_base":"https://cdn.test/mp4/"},"captions":null}"#,
        )
        .unwrap();
        assert_eq!(config.captions, None);
        assert_eq!(config.player, PlayerConfig::default());
        assert!(matches!(
            config.resolution,
            ResolutionPolicy::Substituted { .. }
        ));

        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
        assert!(EngineConfig::from_json(r#"{"resolution":{"mode":"stream"}}"#).is_err());
    }
}
