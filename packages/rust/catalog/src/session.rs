//! Cookie-preserving portal session: the transport every stage shares.
//!
//! One [`Portal`] is built per run. Clones share the same connection pool and
//! cookie jar, so concurrent jobs can issue requests without coordinating.

use std::time::Duration;

use reqwest::{Client, Response};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use lectern_shared::{LecternError, PortalConfig, Result};

/// User-Agent string for portal requests.
const USER_AGENT: &str = concat!("Lectern/", env!("CARGO_PKG_VERSION"));

/// Request timeout for callers that have no config at hand.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 10;

/// Login form target, relative to the base.
const LOGIN_PATH: &str = "j_spring_security_check";

/// Page that only renders for an authenticated session.
const PROFILE_PATH: &str = "s/studentProfilePESU";

const LOGOUT_PATH: &str = "logout";

/// Class content endpoint, relative to the base.
const CLASS_CONTENT_PATH: &str = "s/studentProfilePESUAdmin";

/// Authenticated HTTP session against the portal.
#[derive(Debug, Clone)]
pub struct Portal {
    client: Client,
    /// API base without a trailing slash, e.g. `https://host/Academy`.
    base: String,
    /// Scheme + host + port.
    origin: String,
    /// Path component of the base, e.g. `/Academy` (empty at the root).
    base_path: String,
}

impl Portal {
    /// Build a session for the configured base URL.
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            LecternError::config(format!("invalid portal base_url '{}': {e}", config.base_url))
        })?;
        let origin = origin_url(&base_url)?;
        let base_path = base_url.path().trim_end_matches('/').to_string();

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout)
            .build()
            .map_err(|e| LecternError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: format!("{origin}{base_path}"),
            origin,
            base_path,
        })
    }

    /// The shared HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Path component of the base URL (empty when the portal is served at the root).
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Absolute URL for a path under the base.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// Resolve a link found in portal markup to an absolute URL.
    ///
    /// Absolute URLs are kept, paths rooted at the base path are joined to the
    /// origin, and everything else is taken as relative to the base.
    pub fn resolve(&self, raw: &str) -> String {
        let raw = raw.split('#').next().unwrap_or_default().trim();

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return raw.to_string();
        }
        if !self.base_path.is_empty() && raw.starts_with(&self.base_path) {
            return format!("{}{raw}", self.origin);
        }
        self.endpoint(raw)
    }

    /// URL serving one class's content (a document or a detail fragment).
    pub fn class_content_url(&self, subject_id: &str, class_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint(CLASS_CONTENT_PATH))
            .map_err(|e| LecternError::validation(format!("bad class content URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("url", "studentProfilePESUAdmin")
            .append_pair("controllerMode", "6403")
            .append_pair("actionType", "60")
            .append_pair("selectedData", subject_id)
            .append_pair("id", "2")
            .append_pair("unitid", class_id);
        Ok(url)
    }

    /// GET a URL and fail on non-success status.
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LecternError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LecternError::Transport(format!("{url}: HTTP {status}")));
        }
        Ok(response)
    }

    /// GET a URL and return its content type and body text.
    pub async fn get_text(&self, url: &str) -> Result<(Option<String>, String)> {
        let response = self.get(url).await?;
        let content_type = content_type_of(&response);
        let body = response
            .text()
            .await
            .map_err(|e| LecternError::Transport(format!("{url}: failed to read body: {e}")))?;
        Ok((content_type, body))
    }

    /// Run the login handshake: fetch the CSRF token, post credentials, then
    /// confirm the session can reach the profile page.
    #[instrument(skip_all, fields(user = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        info!("starting authentication");

        let (_, login_page) = self
            .get_text(&self.endpoint(""))
            .await
            .map_err(|e| LecternError::Auth(format!("could not load login page: {e}")))?;
        let csrf = extract_csrf_token(&login_page)?;

        let login_url = self.endpoint(LOGIN_PATH);
        let response = self
            .client
            .post(&login_url)
            .form(&[
                ("j_username", username),
                ("j_password", password),
                ("_csrf", csrf.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LecternError::Auth(format!("{login_url}: {e}")))?;
        if !response.status().is_success() {
            return Err(LecternError::Auth(format!(
                "{login_url}: HTTP {}",
                response.status()
            )));
        }

        self.validate_session().await?;
        info!("authentication successful");
        Ok(())
    }

    /// End the session. Failures are logged, never returned.
    pub async fn logout(&self) {
        match self.client.get(self.endpoint(LOGOUT_PATH)).send().await {
            Ok(_) => info!("session terminated"),
            Err(e) => warn!(error = %e, "logout failed"),
        }
    }

    /// An unauthenticated session is redirected away from the profile page.
    async fn validate_session(&self) -> Result<()> {
        let profile_url = self.endpoint(PROFILE_PATH);
        let response = self
            .client
            .get(&profile_url)
            .send()
            .await
            .map_err(|e| LecternError::Auth(format!("{profile_url}: {e}")))?;

        let landed = response.url().path().trim_end_matches('/').to_string();
        if !response.status().is_success() || !landed.ends_with(PROFILE_PATH) {
            return Err(LecternError::Auth("invalid credentials".into()));
        }
        Ok(())
    }
}

/// Lower-cased `Content-Type` header value, if any.
pub fn content_type_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| LecternError::config(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Pull the hidden `_csrf` input value out of the login page.
fn extract_csrf_token(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"input[name="_csrf"]"#).expect("csrf selector");
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("value"))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LecternError::Auth("CSRF token not found in login page".into()))
}
