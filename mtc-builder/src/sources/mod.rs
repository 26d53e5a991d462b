//! External Literature Sources
//!
//! Trait seams for the three remote lookups the builder depends on. The
//! orchestrator and collector only see these traits, so tests substitute
//! in-memory sources and production plugs in [`entrez::EntrezClient`].

pub mod entrez;

use async_trait::async_trait;
use thiserror::Error;

pub use entrez::EntrezClient;

/// Bibliographic fields of one article
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub abstract_text: String,
    /// Rendered author names ("Smith JA"), in listed order
    pub authors: Vec<String>,
}

/// Per-call source failure
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Request never completed (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Service answered with a non-success status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Identifier unknown to the service
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<SourceError> for mtc_common::Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Parse(msg) => mtc_common::Error::Parse(msg),
            other => mtc_common::Error::Network(other.to_string()),
        }
    }
}

/// Resolves a topical query to literature identifiers
#[async_trait]
pub trait QuerySource: Send + Sync {
    /// Identifiers matching `query` published within `year_from..=year_to`
    ///
    /// Implementations retry transient failures internally and return an
    /// empty list once retries are exhausted, so one bad query/year never
    /// aborts collection.
    async fn fetch_ids(
        &self,
        query: &str,
        year_from: i32,
        year_to: i32,
        max_results: u32,
    ) -> Vec<String>;
}

/// Retrieves bibliographic metadata for an identifier
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch_article(&self, id: &str) -> Result<Article, SourceError>;
}

/// Retrieves controlled-vocabulary annotations for an identifier
#[async_trait]
pub trait AnnotationSource: Send + Sync {
    /// Descriptor names attached to the article, in source order
    async fn fetch_annotations(&self, id: &str) -> Result<Vec<String>, SourceError>;
}
