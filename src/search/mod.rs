//! Search collaborators
//!
//! Two retrieval services feed each research branch:
//! - [`WebSearch`]: general web pages with extracted content ([`tavily`])
//! - [`BiomedicalSearch`]: literature records ([`pubmed`])
//!
//! Both return [`RetrievedDocument`]s after conversion, which live only as
//! long as the branch that fetched them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SearchError;

pub mod pubmed;
pub mod tavily;

pub use pubmed::{LlmMeshTranslator, PubMedSearch, QueryTranslator};
pub use tavily::TavilySearch;

/// Maximum characters of page content kept per document
pub const MAX_CONTENT_CHARS: usize = 25_000;

/// Where a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Web,
    Biomedical,
}

/// A document retrieved for one branch
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    /// Url for web pages, `PMID:<id>` for biomedical records
    pub source_id: String,
    /// Link to the document
    pub url: String,
    pub content: String,
    pub provenance: Provenance,
}

impl RetrievedDocument {
    pub fn from_web(page: &WebPage) -> Self {
        Self {
            source_id: page.url.clone(),
            url: page.url.clone(),
            content: truncate_chars(&page.content, MAX_CONTENT_CHARS),
            provenance: Provenance::Web,
        }
    }

    pub fn from_biomedical(source: &BiomedicalSource) -> Self {
        Self {
            source_id: source.source_id(),
            url: source.url.clone(),
            content: truncate_chars(&source.to_content(), MAX_CONTENT_CHARS),
            provenance: Provenance::Biomedical,
        }
    }
}

// ----------------------------------------------------------------------------
// Web search
// ----------------------------------------------------------------------------

/// One web search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub url: String,
    pub content: String,
}

/// Domain allow/deny lists applied to web search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl DomainFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a url passes the filter (used to re-check provider results)
    pub fn allows(&self, url: &str) -> bool {
        let host = host_of(url);
        let matches = |domain: &String| {
            let domain = domain.trim_start_matches("www.").to_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        };
        if self.exclude.iter().any(matches) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(matches)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchOptions {
    pub timeout: Duration,
    pub max_results: usize,
    /// Ask for full page content (markdown) rather than snippets
    pub want_markdown: bool,
    pub domains: DomainFilter,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// May return fewer than `max_results`; must respect `timeout`
    async fn search(
        &self,
        query: &str,
        options: &WebSearchOptions,
    ) -> Result<Vec<WebPage>, SearchError>;
}

// ----------------------------------------------------------------------------
// Biomedical search
// ----------------------------------------------------------------------------

/// How aggressively a query is rewritten into MeSH vocabulary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Restrictiveness {
    /// Keep free-text terms, add MeSH terms alongside
    Broad,
    #[default]
    Balanced,
    /// Replace free text with major-topic MeSH headings
    Narrow,
}

/// A restrictiveness name that is not broad, balanced or narrow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown restrictiveness: {0} (expected broad, balanced or narrow)")]
pub struct ParseRestrictivenessError(pub String);

impl std::str::FromStr for Restrictiveness {
    type Err = ParseRestrictivenessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "broad" => Ok(Restrictiveness::Broad),
            "balanced" => Ok(Restrictiveness::Balanced),
            "narrow" => Ok(Restrictiveness::Narrow),
            other => Err(ParseRestrictivenessError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Restrictiveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Restrictiveness::Broad => write!(f, "broad"),
            Restrictiveness::Balanced => write!(f, "balanced"),
            Restrictiveness::Narrow => write!(f, "narrow"),
        }
    }
}

/// A literature record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiomedicalSource {
    /// Provider identifier (a PubMed PMID)
    pub id: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub date: Option<String>,
    pub doi: Option<String>,
    pub url: String,
}

impl BiomedicalSource {
    /// Identifier used in learnings and deduplication
    pub fn source_id(&self) -> String {
        format!("PMID:{}", self.id)
    }

    /// Text handed to the learning extractor
    pub fn to_content(&self) -> String {
        let mut content = format!("Title: {}\n", self.title);
        if !self.authors.is_empty() {
            content.push_str(&format!("Authors: {}\n", self.authors.join(", ")));
        }
        if let Some(journal) = &self.journal {
            content.push_str(&format!("Journal: {}\n", journal));
        }
        if let Some(date) = &self.date {
            content.push_str(&format!("Date: {}\n", date));
        }
        if let Some(abstract_text) = &self.abstract_text {
            content.push_str(&format!("\nAbstract: {}\n", abstract_text));
        }
        content
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BiomedicalSearchOptions {
    pub limit: usize,
    pub use_controlled_vocabulary: bool,
    pub restrictiveness: Restrictiveness,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiomedicalSearchResult {
    pub sources: Vec<BiomedicalSource>,
    pub total_count: usize,
}

#[async_trait]
pub trait BiomedicalSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &BiomedicalSearchOptions,
    ) -> Result<BiomedicalSearchResult, SearchError>;
}

/// Truncate on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Lower-cased host of a url, without a leading `www.`
fn host_of(url: &str) -> String {
    url.split("//")
        .nth(1)
        .unwrap_or(url)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_lowercase()
}
