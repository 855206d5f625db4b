//! Offline runner: rewrites a saved page on a single-threaded runtime.

use crate::captions::{CaptionSource, DirectoryCaptions};
use crate::controls::{Cli, ConfigError, EngineConfig};
use crate::dom::DomError;
use crate::html::Document;
use crate::manifest::{self, RewriteRecord};
use crate::rewriter::{event_channel, post, LiveRewriter, RewriteEvent, RewriteStats};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tokio::runtime::Builder;
use tokio::task::{spawn_local, LocalSet};
use tracing::{debug, info, warn};

const PRESCAN_BYTES: usize = 1024;

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?([a-z0-9_:.\-]+)"#)
        .expect("meta charset pattern")
});

/// Errors that abort an offline run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The command line did not describe a valid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The document refused observation.
    #[error(transparent)]
    Dom(#[from] DomError),
    /// Reading the input page failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Input path, `-` for stdin.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Writing output failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Output path, `-` for stdout.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The async runtime could not be started or the rewrite task died.
    #[error("runtime failure: {0}")]
    Runtime(String),
}

/// Outcome of rewriting one page.
#[derive(Debug)]
pub struct PageRewrite {
    /// Serialized document after all rewrites and caption attachment.
    pub html: String,
    /// Running totals.
    pub stats: RewriteStats,
    /// One record per rewritten element.
    pub records: Vec<RewriteRecord>,
}

/// Runs the engine over `doc` until no events or caption fetches remain.
///
/// Must be awaited inside a [`LocalSet`].
pub async fn rewrite_page<C>(
    doc: Document,
    config: &EngineConfig,
    captions: C,
) -> Result<PageRewrite, RunError>
where
    C: CaptionSource + 'static,
{
    let (events, mut receiver) = event_channel();
    let mut rewriter = LiveRewriter::new(doc.clone(), config, captions);
    rewriter.observe(events.clone())?;
    post(&events, RewriteEvent::InitialLoad);

    let task = spawn_local(async move {
        rewriter.run_until_idle(&mut receiver).await;
        rewriter.shutdown();
        rewriter
    });
    let mut rewriter = task
        .await
        .map_err(|err| RunError::Runtime(err.to_string()))?;

    Ok(PageRewrite {
        html: doc.to_html(),
        stats: rewriter.stats(),
        records: rewriter.take_records(),
    })
}

/// Executes one command-line run.
pub fn run(cli: &Cli) -> Result<RewriteStats, RunError> {
    let config = cli.build_config()?;
    let bytes = read_input(&cli.input)?;
    let (html, encoding) = decode_page(&bytes);
    let doc =
        Document::parse(&html, cli.page_url.clone()).with_playable_types(cli.playable_types());
    let captions = DirectoryCaptions::new(cli.captions.clone());

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| RunError::Runtime(err.to_string()))?;
    let local = LocalSet::new();
    let outcome = rt.block_on(local.run_until(rewrite_page(doc, &config, captions)))?;

    write_output(&cli.output, &encode_page(&outcome.html, encoding))?;
    if let Some(path) = &cli.report {
        write_report(path, &outcome.records)?;
    }
    info!(
        rewritten = outcome.stats.rewritten,
        skipped = outcome.stats.skipped,
        captions = outcome.stats.captions_attached,
        caption_failures = outcome.stats.caption_failures,
        page = %cli.page_url,
        "rewrite complete"
    );
    Ok(outcome.stats)
}

/// Picks the page encoding: byte order mark, then a `<meta>` charset within
/// the first kilobyte, then UTF-8.
fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    let head = &bytes[..bytes.len().min(PRESCAN_BYTES)];
    META_CHARSET
        .captures(head)
        .and_then(|caps| caps.get(1))
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        // A UTF-16 label in ASCII-compatible markup cannot be right.
        .map(|encoding| {
            if encoding == UTF_16LE || encoding == UTF_16BE {
                UTF_8
            } else {
                encoding
            }
        })
        .unwrap_or(UTF_8)
}

fn decode_page(bytes: &[u8]) -> (String, &'static Encoding) {
    let (text, encoding, had_errors) = sniff_encoding(bytes).decode(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "page contains malformed sequences");
    }
    debug!(encoding = encoding.name(), "decoded page");
    (text.into_owned(), encoding)
}

fn encode_page<'a>(html: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
    let (bytes, used, unmappable) = encoding.output_encoding().encode(html);
    if unmappable {
        debug!(
            encoding = used.name(),
            "characters outside the page encoding written as references"
        );
    }
    bytes
}

fn read_input(path: &str) -> Result<Vec<u8>, RunError> {
    let mut buf = Vec::new();
    let result = if path == "-" {
        io::stdin().read_to_end(&mut buf).map(|_| ())
    } else {
        File::open(path).and_then(|mut file| file.read_to_end(&mut buf).map(|_| ()))
    };
    result.map_err(|source| RunError::Read {
        path: path.to_string(),
        source,
    })?;
    Ok(buf)
}

fn write_output(path: &str, bytes: &[u8]) -> Result<(), RunError> {
    let result = if path == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes).and_then(|_| stdout.flush())
    } else {
        File::create(path).and_then(|mut file| file.write_all(bytes))
    };
    result.map_err(|source| RunError::Write {
        path: path.to_string(),
        source,
    })
}

fn write_report(path: &Path, records: &[RewriteRecord]) -> Result<(), RunError> {
    File::create(path)
        .and_then(|file| manifest::write_jsonl(BufWriter::new(file), records))
        .map_err(|source| RunError::Write {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    const PAGE: &str = r#"<!DOCTYPE html><html><head><title>12</title></head><body>
<object width="320" height="240"><param name="url" value="move/017.asx"><embed src="move/017.asx" width="320" height="240"></object>
<embed src="flash/banner.swf">
</body></html>"#;

    #[tokio::test(flavor = "current_thread")]
    async fn rewrites_page_and_attaches_bundled_captions() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("en")).unwrap();
        std::fs::write(dir.path().join("en/017.vtt"), "WEBVTT\n\nhi\n").unwrap();

        let doc = Document::parse(PAGE, Url::parse("https://host/a/b/12.html").unwrap());
        let local = LocalSet::new();
        let outcome = local
            .run_until(rewrite_page(
                doc.clone(),
                &EngineConfig::default(),
                DirectoryCaptions::new(dir.path()),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.stats.rewritten, 1);
        assert_eq!(outcome.stats.skipped, 1);
        assert_eq!(outcome.stats.captions_attached, 1);
        assert_eq!(outcome.stats.caption_failures, 1);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.html.contains(r#"<embed src="flash/banner.swf">"#));
        assert!(outcome.html.contains(r#"srclang="en""#));
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn report_lists_rewritten_elements() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("12.html");
        let output = dir.path().join("out.html");
        let report = dir.path().join("report.jsonl");
        std::fs::write(&input, PAGE).unwrap();

        let cli = <Cli as clap::Parser>::try_parse_from([
            "embedfix",
            "--page-url",
            "https://host/a/b/12.html",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--no-captions",
            "--report",
            report.to_str().unwrap(),
        ])
        .unwrap();

        let stats = run(&cli).unwrap();
        assert_eq!(stats.rewritten, 1);
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("https://host/a/b/move/017.wmv"));
        let lines = std::fs::read_to_string(&report).unwrap();
        assert_eq!(lines.lines().count(), 1);
        assert!(lines.contains(r#""tag":"object""#));
    }

    #[test]
    fn charset_comes_from_bom_then_meta() {
        assert_eq!(sniff_encoding(b"\xef\xbb\xbf<html>"), UTF_8);
        assert_eq!(
            sniff_encoding(br#"<head><meta charset="euc-jp"></head>"#),
            encoding_rs::EUC_JP
        );
        assert_eq!(
            sniff_encoding(br#"<META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=Shift_JIS">"#),
            encoding_rs::SHIFT_JIS
        );
        assert_eq!(sniff_encoding(br#"<meta charset="utf-16">"#), UTF_8);
        assert_eq!(sniff_encoding(b"<html><body></body></html>"), UTF_8);
    }

    #[test]
    fn shift_jis_page_is_rewritten_in_its_own_encoding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("12.html");
        let output = dir.path().join("out.html");
        let page = r#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=Shift_JIS"><title>動画</title></head><body><embed src="move/017.asx"></body></html>"#;
        let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(page);
        std::fs::write(&input, &encoded).unwrap();

        let cli = <Cli as clap::Parser>::try_parse_from([
            "embedfix",
            "--page-url",
            "https://host/a/b/12.html",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--no-captions",
        ])
        .unwrap();
        assert_eq!(run(&cli).unwrap().rewritten, 1);

        let written = std::fs::read(&output).unwrap();
        let (html, had_errors) = encoding_rs::SHIFT_JIS.decode_without_bom_handling(&written);
        assert!(!had_errors);
        assert!(html.contains("<title>動画</title>"));
        assert!(html.contains("https://host/a/b/move/017.wmv"));
    }

    #[test]
    fn missing_input_is_reported_with_path() {
        let cli = <Cli as clap::Parser>::try_parse_from([
            "embedfix",
            "--page-url",
            "https://host/a/b/12.html",
            "--input",
            "/nonexistent/page.html",
        ])
        .unwrap();
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/page.html"));
    }
}
