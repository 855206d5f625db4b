//! Convert SubRip (`.srt`) subtitles into WebVTT (`.vtt`).
//!
//! The conversion is line based: cue indices in front of timing lines are
//! dropped, timing lines switch their millisecond separator to `.`, and every
//! other line (cue text, markup, cue settings) is copied as is.

use glob::MatchOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// First line of every WebVTT file.
pub const HEADER: &str = "WEBVTT";

static TIMING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{2}:[0-9]{2}:[0-9]{2}[.,][0-9]{3}\s+-->\s+[0-9]{2}:[0-9]{2}:[0-9]{2}[.,][0-9]{3}")
        .expect("timing line pattern")
});

static COMMA_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{2}:[0-9]{2}:[0-9]{2}),([0-9]{3})").expect("timestamp pattern"));

static CUE_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("cue index pattern"));

/// Errors raised while converting files.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input file could not be read as UTF-8 text.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The output file could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An output directory could not be created.
    #[error("failed to create {path}: {source}")]
    CreateDir {
        /// Directory being created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A directory listing could not be built or walked.
    #[error("failed to list {pattern}: {message}")]
    Pattern {
        /// Glob pattern being expanded.
        pattern: String,
        /// Description from the glob walker.
        message: String,
    },
}

/// Converts SubRip text to WebVTT text.
pub fn convert(srt: &str) -> String {
    let normalized = srt.replace("\r\n", "\n").replace('\r', "\n");
    let text = normalized
        .strip_prefix('\u{feff}')
        .unwrap_or(&normalized)
        .trim();

    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = vec![HEADER.to_string(), String::new()];
    for (idx, line) in lines.iter().enumerate() {
        let next_is_timing = lines
            .get(idx + 1)
            .map(|next| is_timing_line(next))
            .unwrap_or(false);
        if next_is_timing && CUE_INDEX.is_match(line) {
            continue;
        }
        if is_timing_line(line) {
            out.push(COMMA_TIMESTAMP.replace_all(line, "$1.$2").into_owned());
        } else {
            out.push(line.to_string());
        }
    }

    let mut vtt = out.join("\n");
    if !vtt.ends_with('\n') {
        vtt.push('\n');
    }
    vtt
}

/// Whether `line` starts with `HH:MM:SS,mmm --> HH:MM:SS,mmm` (either separator).
pub fn is_timing_line(line: &str) -> bool {
    TIMING_LINE.is_match(line)
}

/// Converts one file.
pub fn convert_file(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let srt = fs::read_to_string(input).map_err(|source| ConvertError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    fs::write(output, convert(&srt)).map_err(|source| ConvertError::Write {
        path: output.to_path_buf(),
        source,
    })
}

/// Totals for one [`convert_tree`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Files converted successfully.
    pub converted: usize,
    /// Files that failed to convert.
    pub failed: usize,
    /// Requested languages whose input directory does not exist.
    pub missing_languages: Vec<String>,
}

/// Converts every `*.srt` below `input_root/{lang}` into `output_root/{lang}/{stem}.vtt`.
///
/// Per-file failures are logged and counted; the batch always runs to the end.
pub fn convert_tree<S: AsRef<str>>(
    input_root: &Path,
    output_root: &Path,
    languages: &[S],
) -> BatchReport {
    let mut report = BatchReport::default();
    for lang in languages {
        let lang = lang.as_ref();
        let in_dir = input_root.join(lang);
        if !in_dir.is_dir() {
            warn!(dir = %in_dir.display(), "language directory missing, skipping");
            report.missing_languages.push(lang.to_string());
            continue;
        }
        let out_dir = output_root.join(lang);
        if let Err(source) = fs::create_dir_all(&out_dir) {
            let err = ConvertError::CreateDir {
                path: out_dir,
                source,
            };
            warn!(%err, "skipping language");
            continue;
        }
        match srt_files(&in_dir) {
            Ok(entries) => {
                for entry in entries {
                    match entry.and_then(|input| convert_into(&input, &out_dir)) {
                        Ok(output) => {
                            debug!(output = %output.display(), "converted");
                            report.converted += 1;
                        }
                        Err(err) => {
                            warn!(%err, "conversion failed");
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(err) => warn!(%err, "skipping language"),
        }
    }
    report
}

fn srt_files(dir: &Path) -> Result<Vec<Result<PathBuf, ConvertError>>, ConvertError> {
    let pattern = format!(
        "{}/*.srt",
        glob::Pattern::escape(&dir.display().to_string())
    );
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let paths = glob::glob_with(&pattern, options).map_err(|err| ConvertError::Pattern {
        pattern: pattern.clone(),
        message: err.to_string(),
    })?;
    Ok(paths
        .map(|entry| {
            entry.map_err(|err| ConvertError::Pattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })
        })
        .collect())
}

fn convert_into(input: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError> {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = out_dir.join(format!("{stem}.vtt"));
    convert_file(input, &output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn converts_single_cue() {
        assert_eq!(
            convert("1\n00:00:20,000 --> 00:00:24,400\nHello\n"),
            "WEBVTT\n\n00:00:20.000 --> 00:00:24.400\nHello\n"
        );
    }

    #[test]
    fn strips_bom_and_normalizes_newlines() {
        assert_eq!(
            convert("\u{feff}1\r\n00:00:01,000 --> 00:00:02,500\r\nHi\r\n\r\n2\r00:00:03,000 --> 00:00:04,000\rthere\r\n\r\n"),
            "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nHi\n\n00:00:03.000 --> 00:00:04.000\nthere\n"
        );
    }

    #[test]
    fn keeps_markup_and_cue_settings() {
        assert_eq!(
            convert("7\n00:01:02,003 --> 00:01:04,000 position:10% line:90%\n<i>whisper</i>\n"),
            "WEBVTT\n\n00:01:02.003 --> 00:01:04.000 position:10% line:90%\n<i>whisper</i>\n"
        );
    }

    #[test]
    fn numeric_cue_text_is_kept() {
        assert_eq!(
            convert("1\n00:00:01,000 --> 00:00:02,000\n42\n"),
            "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n42\n"
        );
    }

    #[test]
    fn malformed_timestamps_pass_through() {
        assert_eq!(
            convert("1\n0:00:01,000 --> 0:00:02,000\nHello"),
            "WEBVTT\n\n1\n0:00:01,000 --> 0:00:02,000\nHello\n"
        );
    }

    #[test]
    fn empty_input_yields_header() {
        assert_eq!(convert(""), "WEBVTT\n\n");
        assert_eq!(convert("\u{feff}\r\n  \n"), "WEBVTT\n\n");
    }

    #[test]
    fn detects_timing_lines_at_line_start() {
        assert!(is_timing_line("00:00:20,000 --> 00:00:24,400"));
        assert!(is_timing_line("00:00:20.000  -->  00:00:24.400 align:start"));
        assert!(!is_timing_line("note 00:00:20,000 --> 00:00:24,400"));
        assert!(!is_timing_line("00:00:20 --> 00:00:24"));
    }

    #[test]
    fn full_width_digits_are_cue_text() {
        assert!(!is_timing_line("０１:００:２０,０００ --> ０１:００:２４,４００"));
        assert_eq!(
            convert("１２\n０１:００:２０,０００ --> ０１:００:２４,４００\nこんにちは\n"),
            "WEBVTT\n\n１２\n０１:００:２０,０００ --> ０１:００:２４,４００\nこんにちは\n"
        );
    }

    #[test]
    fn tree_conversion_mirrors_languages_and_counts_failures() {
        let root = tempfile::tempdir().expect("tempdir");
        let input = root.path().join("srt");
        let output = root.path().join("vtt");
        fs::create_dir_all(input.join("en")).unwrap();
        fs::create_dir_all(input.join("jp")).unwrap();
        fs::write(input.join("en/017.srt"), "1\n00:00:01,000 --> 00:00:02,000\nHello\n").unwrap();
        fs::write(input.join("en/018.SRT"), "1\n00:00:01,000 --> 00:00:02,000\nBye\n").unwrap();
        fs::write(input.join("en/notes.txt"), "ignored").unwrap();
        fs::write(input.join("jp/017.srt"), [0xff, 0xfe, 0x00]).unwrap();

        let report = convert_tree(&input, &output, &["en", "jp", "fr"]);

        assert_eq!(
            report,
            BatchReport {
                converted: 2,
                failed: 1,
                missing_languages: vec!["fr".to_string()],
            }
        );
        assert_eq!(
            fs::read_to_string(output.join("en/017.vtt")).unwrap(),
            "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHello\n"
        );
        assert!(output.join("en/018.vtt").exists());
        assert!(output.join("jp").is_dir());
        assert!(!output.join("jp/017.vtt").exists());
    }
}
