//! One class: discover its documents, download, classify, convert, validate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Response;
use reqwest::header::CONTENT_DISPOSITION;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use lectern_catalog::{Portal, content_type_of, unwrap_fragment};
use lectern_convert::{ConversionOutcome, DocumentConverter};
use lectern_shared::{
    CatalogEntry, ClassOutcome, DocumentReference, FailureRecord, FetchedDocument, LecternError,
    MimeKind, Result, class_file_stem,
};

use crate::classifier::{SNIFF_LEN, classify};
use crate::links::LinkExtractor;

/// Everything a job needs to know about the class it fetches.
#[derive(Debug, Clone)]
pub struct ClassTarget {
    /// Course (subject) the class belongs to.
    pub subject_id: String,
    pub unit_number: usize,
    /// 1-based position of the class within its unit.
    pub ordinal: usize,
    pub class: CatalogEntry,
    /// Directory the class's files are written into.
    pub unit_dir: PathBuf,
}

impl ClassTarget {
    /// Human-readable scope for logs and failure records.
    pub fn scope(&self) -> String {
        format!(
            "unit {} / class {:02} \"{}\"",
            self.unit_number, self.ordinal, self.class.display_name
        )
    }

    fn failure(&self, url: Option<&str>, reason: impl Into<String>) -> FailureRecord {
        FailureRecord {
            scope: self.scope(),
            class_id: Some(self.class.id.clone()),
            url: url.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// How the class content endpoint answered.
enum ClassContent {
    /// The endpoint served a canonical document itself.
    Direct(Response),
    /// The endpoint served a detail fragment listing references.
    References(Vec<DocumentReference>),
}

/// Shared, stateless worker; one instance serves every class in a run.
#[derive(Debug, Clone)]
pub struct ClassFetchJob {
    portal: Portal,
    links: LinkExtractor,
    converter: DocumentConverter,
    rate_limit: Duration,
}

impl ClassFetchJob {
    pub fn new(portal: Portal, converter: DocumentConverter, rate_limit: Duration) -> Self {
        let links = LinkExtractor::new(portal.clone());
        Self {
            portal,
            links,
            converter,
            rate_limit,
        }
    }

    /// Fetch every document of one class. Never fails: problems are recorded
    /// on the outcome, which is `Failed` iff no document survived.
    #[instrument(skip_all, fields(unit = target.unit_number, ordinal = target.ordinal, class_id = %target.class.id))]
    pub async fn run(&self, target: &ClassTarget) -> ClassOutcome {
        let mut files = Vec::new();
        let mut failures = Vec::new();

        let content_url = match self
            .portal
            .class_content_url(&target.subject_id, &target.class.id)
        {
            Ok(url) => url.to_string(),
            Err(e) => {
                failures.push(target.failure(None, e.to_string()));
                return ClassOutcome::new(target.ordinal, &target.class, files, failures);
            }
        };

        let content = match self.load_content(&content_url, &target.class).await {
            Ok(content) => content,
            Err(e) => {
                warn!(url = %content_url, error = %e, "class content request failed");
                failures.push(target.failure(Some(&content_url), e.to_string()));
                return ClassOutcome::new(target.ordinal, &target.class, files, failures);
            }
        };

        match content {
            ClassContent::Direct(response) => {
                let reference = DocumentReference {
                    source_url: content_url.clone(),
                    link_text: target.class.display_name.clone(),
                };
                let stem = class_file_stem(target.ordinal, &target.class.display_name, None);
                match self.store(response, reference, &target.unit_dir, &stem).await {
                    Ok(doc) => files.push(doc),
                    Err(e) => {
                        warn!(url = %content_url, error = %e, "discarding document");
                        failures.push(target.failure(Some(&content_url), e.to_string()));
                    }
                }
            }
            ClassContent::References(references) => {
                if references.is_empty() {
                    info!("no documents listed for class");
                    failures.push(target.failure(Some(&content_url), "no document references found"));
                }

                let many = references.len() > 1;
                for (i, reference) in references.into_iter().enumerate() {
                    let url = reference.source_url.clone();
                    let sibling = many.then_some((i + 1, reference.link_text.as_str()));
                    let stem = class_file_stem(target.ordinal, &target.class.display_name, sibling);

                    match self.download(reference, &target.unit_dir, &stem).await {
                        Ok(doc) => files.push(doc),
                        Err(e) => {
                            warn!(%url, error = %e, "discarding document");
                            failures.push(target.failure(Some(&url), e.to_string()));
                        }
                    }
                }
            }
        }

        let outcome = ClassOutcome::new(target.ordinal, &target.class, files, failures);
        debug!(files = outcome.files.len(), status = ?outcome.status, "class finished");
        outcome
    }

    async fn throttle(&self) {
        if !self.rate_limit.is_zero() {
            tokio::time::sleep(self.rate_limit).await;
        }
    }

    /// Request the class content and decide between a direct document and a fragment.
    async fn load_content(&self, url: &str, class: &CatalogEntry) -> Result<ClassContent> {
        self.throttle().await;
        let response = self.portal.get(url).await?;
        let content_type = content_type_of(&response);

        match content_type.as_deref() {
            Some(ct) if ct.starts_with("application/pdf") => Ok(ClassContent::Direct(response)),
            None => self.fragment_references(None, response).await,
            Some(ct) if ct.contains("html") || ct.contains("json") || ct.starts_with("text/") => {
                self.fragment_references(Some(ct), response).await
            }
            Some(ct) => Err(LecternError::shape(format!(
                "unexpected content type '{ct}' for class {}",
                class.id
            ))),
        }
    }

    async fn fragment_references(
        &self,
        content_type: Option<&str>,
        response: Response,
    ) -> Result<ClassContent> {
        let body = response
            .text()
            .await
            .map_err(|e| LecternError::Transport(format!("failed to read class detail: {e}")))?;
        let html = unwrap_fragment(content_type, &body)?;
        Ok(ClassContent::References(self.links.extract(&html)))
    }

    async fn download(
        &self,
        reference: DocumentReference,
        dir: &Path,
        stem: &str,
    ) -> Result<FetchedDocument> {
        self.throttle().await;
        let response = self.portal.get(&reference.source_url).await?;
        self.store(response, reference, dir, stem).await
    }

    /// Stream a response to disk, then convert and re-validate it.
    async fn store(
        &self,
        response: Response,
        reference: DocumentReference,
        dir: &Path,
        stem: &str,
    ) -> Result<FetchedDocument> {
        let (path, kind) = stream_to_file(response, dir, stem).await?;

        let (path, kind) = match self.converter.convert(&path).await {
            ConversionOutcome::AlreadyCanonical => (path, kind),
            ConversionOutcome::Converted(converted) => (converted, MimeKind::Canonical),
            ConversionOutcome::Unchanged { reason } => {
                warn!(path = %path.display(), %reason, "kept in original format");
                (path, kind)
            }
        };

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| LecternError::io(&path, e))?
            .len();
        if size == 0 {
            let _ = tokio::fs::remove_file(&path).await;
        }
        let doc = FetchedDocument::new(path, size, kind, reference)?;
        info!(file = %doc.file_name(), size, "saved");
        Ok(doc)
    }
}

/// Leading body bytes collected across chunks until there are enough to sniff.
#[derive(Debug, Default)]
struct SniffBuffer {
    bytes: Vec<u8>,
}

impl SniffBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn is_complete(&self) -> bool {
        self.bytes.len() >= SNIFF_LEN
    }

    fn head(&self) -> &[u8] {
        &self.bytes[..self.bytes.len().min(SNIFF_LEN)]
    }

    fn buffered(&self) -> &[u8] {
        &self.bytes
    }
}

/// Write the body to `{dir}/{stem}.{ext}` through a `.part` file. The
/// extension comes from classifying the headers and the leading body bytes.
/// Zero-byte bodies are deleted and reported as [`LecternError::EmptyArtifact`].
/// An HTML page without an attachment filename is a [`LecternError::Shape`]
/// failure and nothing is written.
async fn stream_to_file(
    mut response: Response,
    dir: &Path,
    stem: &str,
) -> Result<(PathBuf, MimeKind)> {
    let url = response.url().to_string();
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = content_type_of(&response);

    if disposition.is_none()
        && content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/html"))
    {
        return Err(LecternError::shape(format!(
            "{url}: download returned an HTML page instead of a document"
        )));
    }

    let read_err = |e: reqwest::Error| LecternError::Transport(format!("{url}: body read failed: {e}"));

    let mut sniff = SniffBuffer::default();
    let mut ended = false;
    while !sniff.is_complete() {
        match response.chunk().await.map_err(read_err)? {
            Some(chunk) => sniff.push(&chunk),
            None => {
                ended = true;
                break;
            }
        }
    }
    let class = classify(disposition.as_deref(), content_type.as_deref(), sniff.head());

    let path = dir.join(format!("{stem}.{}", class.extension));
    let part = dir.join(format!("{stem}.{}.part", class.extension));

    let written = async {
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| LecternError::io(&part, e))?;
        file.write_all(sniff.buffered())
            .await
            .map_err(|e| LecternError::io(&part, e))?;
        let mut size = sniff.buffered().len() as u64;

        if !ended {
            while let Some(chunk) = response.chunk().await.map_err(read_err)? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| LecternError::io(&part, e))?;
                size += chunk.len() as u64;
            }
        }
        file.flush().await.map_err(|e| LecternError::io(&part, e))?;
        Ok::<u64, LecternError>(size)
    }
    .await;

    let size = match written {
        Ok(size) => size,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };

    if size == 0 {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(LecternError::EmptyArtifact { path });
    }

    tokio::fs::rename(&part, &path)
        .await
        .map_err(|e| LecternError::io(&path, e))?;
    debug!(path = %path.display(), size, extension = %class.extension, "downloaded");
    Ok((path, class.kind))
}
