//! Document reference extraction from a class detail fragment.
//!
//! Two inline-action shapes are recognised on any element with an `onclick`
//! attribute, then plain hyperlinks whose target looks like a document
//! download. Every match is resolved against the portal base and the list is
//! deduplicated by absolute URL, keeping first-seen order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use lectern_catalog::Portal;
use lectern_shared::DocumentReference;

/// `downloadcoursedoc('ID')`: fetch a document by identifier.
static FETCH_BY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"downloadcoursedoc\(\s*['"]([^'"]+)['"]"#).expect("valid regex")
});

/// `loadIframe('/path')`: open a frame on a document path.
static OPEN_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"loadIframe\(\s*['"]([^'"]+)['"]"#).expect("valid regex"));

static ONCLICK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[onclick]").expect("valid selector"));

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Marker an inline action must carry for the frame path to be a document.
const SLIDE_SEGMENT: &str = "downloadslidecoursedoc";

/// Path under the base that serves documents by identifier.
const DOC_BY_ID_PATH: &str = "s/referenceMeterials/downloadcoursedoc";

/// Label used when the matched element has no visible text.
pub const DEFAULT_LINK_TEXT: &str = "Course Document";

/// Parses detail fragments into [`DocumentReference`]s. Never touches the network.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    portal: Portal,
}

impl LinkExtractor {
    pub fn new(portal: Portal) -> Self {
        Self { portal }
    }

    /// Extract every distinct document reference, in document order.
    ///
    /// An empty result is normal: many classes have no documents.
    pub fn extract(&self, html: &str) -> Vec<DocumentReference> {
        let doc = Html::parse_fragment(html);
        let mut seen = HashSet::new();
        let mut refs = Vec::new();

        let mut push = |raw: String, el: ElementRef<'_>| {
            let source_url = self.portal.resolve(&raw);
            if source_url.is_empty() || !seen.insert(source_url.clone()) {
                return;
            }
            refs.push(DocumentReference {
                source_url,
                link_text: link_text(el),
            });
        };

        for el in doc.select(&ONCLICK_SELECTOR) {
            let onclick = el.value().attr("onclick").unwrap_or_default();
            if let Some(raw) = self.inline_action_target(onclick) {
                push(raw, el);
            }
        }

        for el in doc.select(&LINK_SELECTOR) {
            let href = el.value().attr("href").unwrap_or_default().trim();
            if is_document_href(href) {
                push(href.to_string(), el);
            }
        }

        debug!(count = refs.len(), "extracted document references");
        refs
    }

    fn inline_action_target(&self, onclick: &str) -> Option<String> {
        if let Some(caps) = FETCH_BY_ID.captures(onclick) {
            let id = caps.get(1)?.as_str().trim();
            if !id.is_empty() {
                return Some(format!("{}/{DOC_BY_ID_PATH}/{id}", self.portal.base_path()));
            }
        }
        if onclick.contains(SLIDE_SEGMENT) {
            let path = OPEN_FRAME.captures(onclick)?.get(1)?.as_str().trim();
            if !path.is_empty() {
                return Some(path.to_string());
            }
        }
        None
    }
}

fn is_document_href(href: &str) -> bool {
    let target = href.split('#').next().unwrap_or_default();
    if target.is_empty() || target.to_ascii_lowercase().starts_with("javascript:") {
        return false;
    }
    target.contains(SLIDE_SEGMENT)
        || target.contains("referenceMeterials")
        || target.to_ascii_lowercase().contains("download")
}

/// Visible text with whitespace collapsed, or the default label.
fn link_text(el: ElementRef<'_>) -> String {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        DEFAULT_LINK_TEXT.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_shared::PortalConfig;
    use std::time::Duration;

    fn extractor() -> LinkExtractor {
        let portal = Portal::new(&PortalConfig {
            base_url: "https://portal.example.com/Academy".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        LinkExtractor::new(portal)
    }

    #[test]
    fn fetch_by_id_actions() {
        let html = r#"
            <div onclick="downloadcoursedoc('A1')">Slides</div>
            <span onclick="downloadcoursedoc('B2')">  Lab   Sheet </span>
        "#;
        let refs = extractor().extract(html);
        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs[0].source_url,
            "https://portal.example.com/Academy/s/referenceMeterials/downloadcoursedoc/A1"
        );
        assert_eq!(refs[0].link_text, "Slides");
        assert_eq!(refs[1].link_text, "Lab Sheet");
    }

    #[test]
    fn open_frame_action_drops_fragment() {
        let html = r#"<a onclick="loadIframe('/Academy/a/referenceMeterials/downloadslidecoursedoc/99#view=FitH')"></a>"#;
        let refs = extractor().extract(html);
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].source_url,
            "https://portal.example.com/Academy/a/referenceMeterials/downloadslidecoursedoc/99"
        );
        assert_eq!(refs[0].link_text, DEFAULT_LINK_TEXT);
    }

    #[test]
    fn open_frame_without_document_marker_is_ignored() {
        let html = r#"<a onclick="loadIframe('/Academy/s/video/12')">Video</a>"#;
        assert!(extractor().extract(html).is_empty());
    }

    #[test]
    fn hyperlinks_by_segment() {
        let html = r##"
            <a href="a/referenceMeterials/notes/5">Notes</a>
            <a href="https://cdn.example.com/Download/file.pdf">Mirror</a>
            <a href="/Academy/s/home">Home</a>
            <a href="#">Top</a>
            <a href="javascript:download()">Script</a>
        "##;
        let refs = extractor().extract(html);
        let urls: Vec<_> = refs.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://portal.example.com/Academy/a/referenceMeterials/notes/5",
                "https://cdn.example.com/Download/file.pdf",
            ]
        );
    }

    #[test]
    fn duplicates_collapse_to_first_seen() {
        let html = r#"
            <div onclick="loadIframe('/Academy/a/referenceMeterials/downloadslidecoursedoc/7#page=1')">First</div>
            <div onclick="loadIframe('/Academy/a/referenceMeterials/downloadslidecoursedoc/7')">Second</div>
            <a href="https://portal.example.com/Academy/a/referenceMeterials/downloadslidecoursedoc/7">Third</a>
        "#;
        let refs = extractor().extract(html);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].link_text, "First");
    }

    #[test]
    fn nothing_to_extract() {
        assert!(extractor().extract("<p>No material uploaded</p>").is_empty());
        assert!(extractor().extract("").is_empty());
    }
}
