//! Per-element rewrite records emitted for audit and batch reporting.

use crate::media::{LegacyMediaReference, MediaIdentifier, ResolvedMediaTarget};
use serde::Serialize;
use std::io::{self, Write};

/// Digest of one rewritten legacy element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteRecord {
    /// Lowercase tag name of the replaced element.
    pub tag: String,
    /// Playlist reference as written in the markup.
    pub reference: LegacyMediaReference,
    /// URLs and dimensions the replacement was built from.
    pub target: ResolvedMediaTarget,
    /// Caption join key, when the filename carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<MediaIdentifier>,
    /// Whether the host reported native playback support for the primary format.
    pub native_playback: bool,
}

impl RewriteRecord {
    /// Creates a record from its components.
    pub fn new(
        tag: String,
        reference: LegacyMediaReference,
        target: ResolvedMediaTarget,
        identifier: Option<MediaIdentifier>,
        native_playback: bool,
    ) -> Self {
        Self {
            tag,
            reference,
            target,
            identifier,
            native_playback,
        }
    }
}

/// Writes `records` as JSON lines.
pub fn write_jsonl<W: Write>(mut out: W, records: &[RewriteRecord]) -> io::Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFormat;
    use url::Url;

    #[test]
    fn records_serialize_one_per_line() {
        let record = RewriteRecord::new(
            "embed".to_string(),
            LegacyMediaReference::parse("move/017.asx").unwrap(),
            ResolvedMediaTarget {
                primary_url: Url::parse("https://host/a/move/017.wmv").unwrap(),
                primary_format: MediaFormat::Wmv,
                fallback_url: None,
                width: Some(320),
                height: None,
            },
            MediaIdentifier::from_filename("017.asx"),
            false,
        );

        let mut buf = Vec::new();
        write_jsonl(&mut buf, &[record.clone(), record]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["reference"], "move/017.asx");
        assert_eq!(value["identifier"], "017");
        assert_eq!(value["target"]["primary_format"], "wmv");
        assert_eq!(value["target"]["width"], 320);
        assert!(value["target"].get("fallback_url").is_none());
    }
}
