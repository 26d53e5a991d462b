//! NCBI E-utilities Client
//!
//! Implements all three literature sources against PubMed:
//! - [`QuerySource`]: `esearch.fcgi` (JSON), publication-date window per call
//! - [`ArticleSource`]: `efetch.fcgi` (XML), title / abstract / authors
//! - [`AnnotationSource`]: `efetch.fcgi` (XML), MeSH heading descriptor names
//!
//! # API Reference
//! - Endpoint: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/
//! - Rate Limit: 3 requests/second, 10 with an API key (NCBI usage policy)

use super::{AnnotationSource, Article, ArticleSource, QuerySource, SourceError};
use crate::retry::{retry_with_delay, RetryPolicy};
use async_trait::async_trait;
use mtc_common::config::EntrezConfig;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Default timeout for E-utilities requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("mtc-builder/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TOOL: &str = "mtc-builder";

const REQUESTS_PER_SECOND: u32 = 3;
const REQUESTS_PER_SECOND_WITH_KEY: u32 = 10;

/// PubMed client for E-utilities
///
/// One instance is shared by every worker; the governor quota keeps the
/// combined request rate inside NCBI's limit regardless of pool size.
///
/// Article and annotations come from the same efetch document. The record
/// parsed by [`ArticleSource::fetch_article`] is held until the matching
/// [`AnnotationSource::fetch_annotations`] call consumes it, so one record
/// attempt costs one request.
pub struct EntrezClient {
    http_client: reqwest::Client,
    base_url: String,
    identity: Vec<(&'static str, String)>,
    query_retry: RetryPolicy,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    /// id → efetch record awaiting its annotation lookup
    pending: Mutex<HashMap<String, PubmedRecord>>,
}

impl EntrezClient {
    /// Create a client
    ///
    /// `query_retry` governs the internal retries of [`QuerySource::fetch_ids`];
    /// article and annotation calls are single-shot and retried by the caller.
    pub fn new(config: &EntrezConfig, query_retry: RetryPolicy) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = requests_per_second(config);
        let quota = governor::Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));

        info!(
            requests_per_second = per_second,
            email = config.email.as_deref().unwrap_or("<none>"),
            "E-utilities client ready"
        );

        Ok(Self {
            http_client,
            base_url: EUTILS_BASE_URL.to_string(),
            identity: identity_params(config),
            query_retry,
            rate_limiter: governor::RateLimiter::direct(quota),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Point the client at a different E-utilities host (mirror or proxy)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_text(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, SourceError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .query(&self.identity)
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("E-utilities request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api(status.as_u16(), body));
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to read E-utilities response: {}", e)))
    }

    /// One esearch call for a query and year window
    async fn search(
        &self,
        query: &str,
        year_from: i32,
        year_to: i32,
        max_results: u32,
    ) -> Result<Vec<String>, SourceError> {
        let params = [
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("datetype", "pdat".to_string()),
            ("mindate", year_from.to_string()),
            ("maxdate", year_to.to_string()),
            ("retmax", max_results.to_string()),
            ("retmode", "json".to_string()),
        ];
        let body = self.get_text("esearch.fcgi", &params).await?;
        parse_esearch(&body)
    }

    /// One efetch call returning the first PubMed article in the response
    async fn fetch_record(&self, id: &str) -> Result<PubmedRecord, SourceError> {
        let params = [
            ("db", "pubmed".to_string()),
            ("id", id.to_string()),
            ("retmode", "xml".to_string()),
        ];
        let body = self.get_text("efetch.fcgi", &params).await?;
        parse_efetch(&body)?.ok_or_else(|| SourceError::NotFound(format!("PubMed article {}", id)))
    }
}

#[async_trait]
impl QuerySource for EntrezClient {
    async fn fetch_ids(&self, query: &str, year_from: i32, year_to: i32, max_results: u32) -> Vec<String> {
        let operation = format!("esearch '{}' {}-{}", query, year_from, year_to);

        match retry_with_delay(&operation, &self.query_retry, || {
            self.search(query, year_from, year_to, max_results)
        })
        .await
        {
            Ok(ids) => {
                debug!(query, year_from, year_to, count = ids.len(), "esearch complete");
                ids
            }
            Err(e) => {
                error!(
                    query,
                    year_from,
                    year_to,
                    attempts = e.attempts,
                    error = %e.last_error,
                    "Identifier query failed, continuing with no results"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ArticleSource for EntrezClient {
    async fn fetch_article(&self, id: &str) -> Result<Article, SourceError> {
        let record = self.fetch_record(id).await?;
        let article = record.article.clone();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.to_string(), record);
        }
        Ok(article)
    }
}

#[async_trait]
impl AnnotationSource for EntrezClient {
    async fn fetch_annotations(&self, id: &str) -> Result<Vec<String>, SourceError> {
        let cached = self.pending.lock().ok().and_then(|mut pending| pending.remove(id));
        let record = match cached {
            Some(record) => record,
            None => self.fetch_record(id).await?,
        };
        Ok(record.mesh_headings.unwrap_or_default())
    }
}

fn requests_per_second(config: &EntrezConfig) -> u32 {
    if config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
        REQUESTS_PER_SECOND_WITH_KEY
    } else {
        REQUESTS_PER_SECOND
    }
}

/// `tool`, `email` and `api_key` parameters sent with every request
fn identity_params(config: &EntrezConfig) -> Vec<(&'static str, String)> {
    let mut params = vec![(
        "tool",
        config.tool.clone().unwrap_or_else(|| DEFAULT_TOOL.to_string()),
    )];
    if let Some(email) = config.email.as_ref().filter(|e| !e.trim().is_empty()) {
        params.push(("email", email.clone()));
    }
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
        params.push(("api_key", key.clone()));
    }
    params
}

// ============================================================================
// esearch (JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

fn parse_esearch(body: &str) -> Result<Vec<String>, SourceError> {
    let response: ESearchResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("Failed to parse esearch response: {}", e)))?;

    if let Some(message) = response.esearchresult.error {
        return Err(SourceError::Api(200, message));
    }
    Ok(response.esearchresult.idlist)
}

// ============================================================================
// efetch (PubMed XML)
// ============================================================================

/// First article of an efetch response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PubmedRecord {
    article: Article,
    /// `None` when the citation has no MeshHeadingList
    mesh_headings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    AbstractPart,
    LastName,
    Initials,
    ForeName,
    CollectiveName,
    MeshDescriptor,
}

#[derive(Debug, Default)]
struct AuthorParts {
    last_name: Option<String>,
    initials: Option<String>,
    fore_name: Option<String>,
    collective: Option<String>,
}

impl AuthorParts {
    /// "LastName Initials", falling back to fore name or collective name
    fn render(self) -> Option<String> {
        match (self.last_name, self.initials.or(self.fore_name), self.collective) {
            (Some(last), Some(first), _) => Some(format!("{} {}", last, first)),
            (Some(last), None, _) => Some(last),
            (None, _, Some(collective)) => Some(collective),
            _ => None,
        }
    }
}

/// Parse the first `PubmedArticle` out of an efetch document
///
/// Returns `Ok(None)` when the set holds no article (unknown or withdrawn id).
fn parse_efetch(xml: &str) -> Result<Option<PubmedRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut record: Option<PubmedRecord> = None;
    let mut abstract_parts: Vec<String> = Vec::new();
    let mut author: Option<AuthorParts> = None;
    let mut capture: Option<(Field, usize)> = None;
    let mut text = String::new();

    let malformed = |reader: &Reader<&[u8]>, e: String| {
        SourceError::Parse(format!(
            "Malformed efetch XML at byte {}: {}",
            reader.buffer_position(),
            e
        ))
    };

    loop {
        match reader.read_event().map_err(|e| malformed(&reader, e.to_string()))? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                let parent = path.last().map(String::as_str);

                if name == "PubmedArticle" && record.is_none() {
                    record = Some(PubmedRecord::default());
                }

                if let Some(current) = record.as_mut() {
                    match (name.as_str(), parent) {
                        ("Author", Some("AuthorList")) if in_article(&path) => {
                            author = Some(AuthorParts::default());
                        }
                        ("MeshHeadingList", Some("MedlineCitation")) => {
                            current.mesh_headings.get_or_insert_with(Vec::new);
                        }
                        _ => {}
                    }

                    if capture.is_none() {
                        let field = match (name.as_str(), parent) {
                            ("ArticleTitle", Some("Article")) => Some(Field::Title),
                            ("AbstractText", Some("Abstract")) if in_article(&path) => Some(Field::AbstractPart),
                            ("LastName", Some("Author")) if author.is_some() => Some(Field::LastName),
                            ("Initials", Some("Author")) if author.is_some() => Some(Field::Initials),
                            ("ForeName", Some("Author")) if author.is_some() => Some(Field::ForeName),
                            ("CollectiveName", Some("Author")) if author.is_some() => Some(Field::CollectiveName),
                            ("DescriptorName", Some("MeshHeading")) => Some(Field::MeshDescriptor),
                            _ => None,
                        };
                        if let Some(field) = field {
                            capture = Some((field, path.len()));
                            text.clear();
                        }
                    }
                }

                path.push(name);
            }
            Event::Text(t) => {
                if capture.is_some() {
                    let unescaped = t.unescape().map_err(|e| malformed(&reader, e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(data) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let closed = path.pop().unwrap_or_default();

                if let Some((field, depth)) = capture {
                    if depth == path.len() {
                        capture = None;
                        let value = collapse_whitespace(&text);
                        if let Some(current) = record.as_mut() {
                            match field {
                                Field::Title => current.article.title = value,
                                Field::AbstractPart => {
                                    if !value.is_empty() {
                                        abstract_parts.push(value);
                                    }
                                }
                                Field::MeshDescriptor => {
                                    if !value.is_empty() {
                                        current.mesh_headings.get_or_insert_with(Vec::new).push(value);
                                    }
                                }
                                author_field => {
                                    if let Some(parts) = author.as_mut() {
                                        let slot = match author_field {
                                            Field::LastName => &mut parts.last_name,
                                            Field::Initials => &mut parts.initials,
                                            Field::ForeName => &mut parts.fore_name,
                                            _ => &mut parts.collective,
                                        };
                                        *slot = Some(value).filter(|v| !v.is_empty());
                                    }
                                }
                            }
                        }
                    }
                }

                if closed == "Author" {
                    if let (Some(parts), Some(current)) = (author.take(), record.as_mut()) {
                        if let Some(name) = parts.render() {
                            current.article.authors.push(name);
                        }
                    }
                }

                if closed == "PubmedArticle" && record.is_some() {
                    break;
                }
            }
            Event::Eof => {
                if record.is_some() {
                    return Err(SourceError::Parse(
                        "efetch document ended inside PubmedArticle".to_string(),
                    ));
                }
                break;
            }
            _ => {}
        }
    }

    Ok(record.map(|mut r| {
        r.article.abstract_text = abstract_parts.join(" ");
        r
    }))
}

/// Author and abstract elements only count inside `Article`, not in
/// investigator or comment lists
fn in_article(path: &[String]) -> bool {
    path.iter().any(|p| p == "Article")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
