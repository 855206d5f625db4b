//! Locates the playlist reference carried by a legacy `<embed>`/`<object>`.

use crate::dom::Dom;
use crate::media::LegacyMediaReference;

/// Tags that host legacy plugin media.
pub const LEGACY_TAGS: &[&str] = &["embed", "object"];

/// Attributes checked on the element itself, in priority order.
const SOURCE_ATTRIBUTES: &[&str] = &["src", "data"];

/// `<param name=…>` key (case-insensitive) that carries the playlist path.
const PARAM_KEY: &str = "url";

/// Whether `tag` is one of [`LEGACY_TAGS`].
pub fn is_legacy_tag(tag: &str) -> bool {
    LEGACY_TAGS.iter().any(|known| tag.eq_ignore_ascii_case(known))
}

/// Finds the playlist reference for `element`, or `None` when it carries none.
///
/// A direct `src`/`data` attribute wins over `<param>` descriptors. Params
/// are searched inside the element first, then inside its parent.
pub fn extract<D: Dom>(dom: &D, element: &D::Node) -> Option<LegacyMediaReference> {
    SOURCE_ATTRIBUTES
        .iter()
        .find_map(|name| {
            dom.attribute(element, name)
                .and_then(|value| LegacyMediaReference::parse(&value))
        })
        .or_else(|| param_reference(dom, element))
        .or_else(|| {
            dom.parent(element)
                .and_then(|parent| param_reference(dom, &parent))
        })
}

fn param_reference<D: Dom>(dom: &D, scope: &D::Node) -> Option<LegacyMediaReference> {
    dom.query_tags(scope, &["param"]).iter().find_map(|param| {
        let name = dom.attribute(param, "name")?;
        if !name.trim().eq_ignore_ascii_case(PARAM_KEY) {
            return None;
        }
        LegacyMediaReference::parse(&dom.attribute(param, "value")?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::Document;
    use url::Url;

    fn document(body: &str) -> Document {
        Document::parse(
            &format!("<html><body>{body}</body></html>"),
            Url::parse("https://host/a/b/12.html").unwrap(),
        )
    }

    fn first_legacy(doc: &Document) -> crate::html::NodeId {
        let root = doc.root().unwrap();
        doc.query_tags(&root, LEGACY_TAGS)[0]
    }

    fn extracted(body: &str) -> Option<String> {
        let doc = document(body);
        let element = first_legacy(&doc);
        extract(&doc, &element).map(|reference| reference.to_string())
    }

    #[test]
    fn reads_src_then_data() {
        assert_eq!(
            extracted(r#"<embed src="move/017.asx" width="320">"#),
            Some("move/017.asx".to_string())
        );
        assert_eq!(
            extracted(r#"<object data="clips/INTRO.ASX"></object>"#),
            Some("clips/INTRO.ASX".to_string())
        );
        assert_eq!(
            extracted(r#"<embed src="player.swf" data="move/018.asx">"#),
            Some("move/018.asx".to_string())
        );
    }

    #[test]
    fn reads_param_inside_element() {
        let body = r#"<object classid="clsid:22D6F312"><param name="Url" value="move/020.asx"></object>"#;
        assert_eq!(extracted(body), Some("move/020.asx".to_string()));
    }

    #[test]
    fn falls_back_to_params_beside_the_element() {
        let body = r#"<div><param name="URL" value="move/021.asx"><embed type="application/x-mplayer2"></div>"#;
        assert_eq!(extracted(body), Some("move/021.asx".to_string()));
    }

    #[test]
    fn attribute_wins_over_conflicting_param() {
        let body = r#"<object data="first.asx"><param name="url" value="second.asx"></object>"#;
        assert_eq!(extracted(body), Some("first.asx".to_string()));
    }

    #[test]
    fn ignores_unrelated_params_and_extensions() {
        assert_eq!(
            extracted(r#"<object><param name="movie" value="a.asx"></object>"#),
            None
        );
        assert_eq!(extracted(r#"<embed src="archive.asx.txt">"#), None);
        assert_eq!(extracted(r#"<embed src="flash/intro.swf">"#), None);
    }

    #[test]
    fn recognizes_tags_case_insensitively() {
        assert!(is_legacy_tag("EMBED"));
        assert!(is_legacy_tag("object"));
        assert!(!is_legacy_tag("video"));
    }
}
