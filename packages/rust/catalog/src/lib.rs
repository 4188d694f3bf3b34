//! Portal session and three-level catalog lookup (subjects → units → classes).
//!
//! Each lookup issues one GET against a fixed endpoint shape, tolerates both
//! raw and JSON-string-wrapped HTML, and parses `<option>` elements into
//! [`CatalogEntry`] values. Retrying is left to the caller.

mod parser;
mod session;

use tracing::{info, instrument, warn};

use lectern_shared::{CatalogEntry, CatalogLevel, LecternError, Result};

pub use parser::{clean_id, unwrap_fragment};
pub use session::{DEFAULT_TIMEOUT, Portal, content_type_of};

/// Subject listing endpoint.
const SUBJECTS_PATH: &str = "a/g/getSubjectsCode";

/// Unit listing endpoint, followed by the subject id.
const UNITS_PATH: &str = "a/i/getCourse";

/// Class listing endpoint, followed by the unit id.
const CLASSES_PATH: &str = "a/i/getCourseClasses";

/// Resolves the catalog hierarchy through a shared [`Portal`].
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    portal: Portal,
}

impl CatalogResolver {
    pub fn new(portal: Portal) -> Self {
        Self { portal }
    }

    /// Every subject the session can see.
    #[instrument(skip_all)]
    pub async fn list_subjects(&self) -> Result<Vec<CatalogEntry>> {
        self.list(SUBJECTS_PATH.to_string(), CatalogLevel::Subject, "subjects")
            .await
    }

    /// Units of one subject, in portal order.
    #[instrument(skip(self))]
    pub async fn list_units(&self, subject_id: &str) -> Result<Vec<CatalogEntry>> {
        self.list(
            format!("{UNITS_PATH}/{subject_id}"),
            CatalogLevel::Unit,
            "units",
        )
        .await
    }

    /// Classes of one unit, in portal order.
    #[instrument(skip(self))]
    pub async fn list_classes(&self, unit_id: &str) -> Result<Vec<CatalogEntry>> {
        self.list(
            format!("{CLASSES_PATH}/{unit_id}"),
            CatalogLevel::Class,
            "classes",
        )
        .await
    }

    /// Find a subject by exact id, or by subject code (case-insensitive).
    pub async fn find_subject(&self, id_or_code: &str) -> Result<CatalogEntry> {
        let subjects = self.list_subjects().await?;
        subjects
            .iter()
            .find(|s| s.id == id_or_code)
            .or_else(|| {
                subjects
                    .iter()
                    .find(|s| s.subject_code().eq_ignore_ascii_case(id_or_code))
            })
            .cloned()
            .ok_or_else(|| {
                LecternError::validation(format!(
                    "course '{id_or_code}' not found (use a course id or subject code)"
                ))
            })
    }

    async fn list(
        &self,
        path: String,
        level: CatalogLevel,
        what: &str,
    ) -> Result<Vec<CatalogEntry>> {
        let url = self.portal.endpoint(&path);

        let (content_type, body) = self.portal.get_text(&url).await.inspect_err(|e| {
            warn!(%url, error = %e, "catalog request failed");
        })?;
        let html = unwrap_fragment(content_type.as_deref(), &body).inspect_err(|e| {
            warn!(%url, error = %e, "catalog response had an unexpected shape");
        })?;

        let entries = parser::parse_options(&html, level);
        if entries.is_empty() {
            warn!(%url, "no {what} found in response");
            return Err(LecternError::CatalogEmpty(format!("no {what} at {url}")));
        }

        info!(count = entries.len(), "found {what}");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_shared::PortalConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resolver(server: &MockServer) -> CatalogResolver {
        let portal = Portal::new(&PortalConfig {
            base_url: format!("{}/Academy", server.uri()),
            timeout: DEFAULT_TIMEOUT,
        })
        .unwrap();
        CatalogResolver::new(portal)
    }

    #[tokio::test]
    async fn list_subjects_from_raw_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Academy/a/g/getSubjectsCode"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<option value=\"20975\">UE23CS342AA3-Internet of Things</option>
                   <option value="20976">UE23CS351A-Compilers</option>"#,
            ))
            .mount(&server)
            .await;

        let subjects = resolver(&server).await.list_subjects().await.unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].id, "20975");
        assert_eq!(subjects[0].subject_code(), "UE23CS342AA3");
        assert_eq!(subjects[1].display_name, "UE23CS351A-Compilers");
    }

    #[tokio::test]
    async fn list_units_from_json_wrapped_html() {
        let server = MockServer::start().await;
        let wrapped = serde_json::to_string(
            r#"<option value="u1">Unit 1: Intro</option><option value="u2">Unit 2: Sensors</option>"#,
        )
        .unwrap();
        Mock::given(method("GET"))
            .and(path("/Academy/a/i/getCourse/20975"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(wrapped, "application/json"),
            )
            .mount(&server)
            .await;

        let units = resolver(&server).await.list_units("20975").await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].id, "u2");
        assert_eq!(units[1].unit_title(), "Sensors");
    }

    #[tokio::test]
    async fn empty_listing_is_catalog_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Academy/a/i/getCourseClasses/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>nothing</p>"))
            .mount(&server)
            .await;

        let err = resolver(&server).await.list_classes("u1").await.unwrap_err();
        assert!(matches!(err, LecternError::CatalogEmpty(_)));
    }

    #[tokio::test]
    async fn server_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Academy/a/i/getCourseClasses/u1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = resolver(&server).await.list_classes("u1").await.unwrap_err();
        assert!(matches!(err, LecternError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn find_subject_by_id_or_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Academy/a/g/getSubjectsCode"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<option value="20975">UE23CS342AA3-Internet of Things</option>"#,
            ))
            .mount(&server)
            .await;

        let resolver = resolver(&server).await;
        assert_eq!(resolver.find_subject("20975").await.unwrap().id, "20975");
        assert_eq!(resolver.find_subject("ue23cs342aa3").await.unwrap().id, "20975");
        assert!(resolver.find_subject("nope").await.is_err());
    }
}
