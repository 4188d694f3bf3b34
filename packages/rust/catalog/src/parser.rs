//! Catalog response parsing.
//!
//! The portal answers catalog lookups with `<option>` lists, sometimes as raw
//! HTML and sometimes as a JSON string whose value is the HTML. Identifiers
//! frequently arrive with escaped quotes still attached.

use scraper::{Html, Selector};

use lectern_shared::{CatalogEntry, CatalogLevel, LecternError, Result};

/// Return the HTML inside a response body, decoding a JSON string wrapper if present.
pub fn unwrap_fragment(content_type: Option<&str>, body: &str) -> Result<String> {
    let declared_json = content_type.is_some_and(|ct| ct.starts_with("application/json"));
    let trimmed = body.trim_start();

    if declared_json || trimmed.starts_with('"') {
        return serde_json::from_str::<String>(trimmed).map_err(|e| {
            LecternError::shape(format!("expected a JSON-encoded HTML string: {e}"))
        });
    }
    Ok(body.to_string())
}

/// Strip escape and quoting artifacts from an identifier.
pub fn clean_id(raw: &str) -> String {
    raw.trim()
        .replace("\\\"", "")
        .replace("\\'", "")
        .trim_matches(|c| c == '"' || c == '\'')
        .replace('\\', "")
        .trim()
        .to_string()
}

/// Collect every `<option>` with a non-empty value and label, in document order.
pub(crate) fn parse_options(html: &str, level: CatalogLevel) -> Vec<CatalogEntry> {
    let doc = Html::parse_fragment(html);
    let sel = Selector::parse("option").expect("option selector");

    doc.select(&sel)
        .filter_map(|el| {
            let id = clean_id(el.value().attr("value")?);
            let name = el.text().collect::<String>();
            CatalogEntry::new(id, name.trim(), level).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_id_strips_artifacts() {
        assert_eq!(clean_id(r#"\"20975\""#), "20975");
        assert_eq!(clean_id(r#""20975""#), "20975");
        assert_eq!(clean_id(r"'abc'"), "abc");
        assert_eq!(clean_id(r"  12\34 "), "1234");
        assert_eq!(clean_id("plain"), "plain");
    }

    #[test]
    fn unwrap_raw_html() {
        let body = "<option value='1'>One</option>";
        assert_eq!(unwrap_fragment(Some("text/html"), body).unwrap(), body);
    }

    #[test]
    fn unwrap_json_string_by_header_or_shape() {
        let body = r#""<option value=\"1\">One</option>""#;
        let expected = r#"<option value="1">One</option>"#;
        assert_eq!(unwrap_fragment(Some("application/json;charset=UTF-8"), body).unwrap(), expected);
        assert_eq!(unwrap_fragment(None, body).unwrap(), expected);
    }

    #[test]
    fn unwrap_bad_json_is_shape_error() {
        let err = unwrap_fragment(Some("application/json"), "{not json").unwrap_err();
        assert!(matches!(err, LecternError::Shape { .. }));
    }

    #[test]
    fn parse_options_in_order() {
        let html = r#"
            <option value="">Select</option>
            <option value="u1">Unit 1: Intro</option>
            <option value="u2">Unit 2: Sensors</option>
            <option value="u3">   </option>
        "#;
        let units = parse_options(html, CatalogLevel::Unit);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, "u1");
        assert_eq!(units[1].display_name, "Unit 2: Sensors");
        assert!(units.iter().all(|u| u.level == CatalogLevel::Unit));
    }

    #[test]
    fn parse_options_with_escaped_quotes() {
        // Raw body still carrying JSON-style escapes
        let html = r#"<option value=\"20975\">UE23CS342AA3-Internet of Things</option>"#;
        let subjects = parse_options(html, CatalogLevel::Subject);
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].id, "20975");
    }

    #[test]
    fn parse_options_none() {
        assert!(parse_options("<div>No data</div>", CatalogLevel::Class).is_empty());
    }
}
