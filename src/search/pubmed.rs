//! PubMed search over NCBI E-utilities
//!
//! `esearch` finds PMIDs for a term, `esummary` fetches record metadata.
//! When controlled vocabulary is requested, the query is first rewritten
//! by a [`QueryTranslator`]; a failed translation falls back to the
//! original text.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BiomedicalSearch, BiomedicalSearchOptions, BiomedicalSearchResult, BiomedicalSource, Restrictiveness};
use crate::error::{LlmError, SearchError};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::recovery::strategies;

const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Rewrites a free-text query into controlled vocabulary
#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(
        &self,
        query: &str,
        restrictiveness: Restrictiveness,
    ) -> Result<String, LlmError>;
}

/// MeSH translation through the language model
pub struct LlmMeshTranslator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl LlmMeshTranslator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    fn prompt(query: &str, restrictiveness: Restrictiveness) -> String {
        let rule = match restrictiveness {
            Restrictiveness::Broad => {
                "Keep the original free-text terms and OR them with matching MeSH terms ([MeSH Terms]). Favour recall."
            }
            Restrictiveness::Balanced => {
                "Use MeSH terms ([MeSH Terms]) for the central concepts and free-text terms ([tiab]) for the rest."
            }
            Restrictiveness::Narrow => {
                "Use only major-topic MeSH headings ([Majr]) joined with AND. Favour precision."
            }
        };
        format!(
            "Rewrite the following question as a single PubMed search query.\n{rule}\n\
             Reply with the query only, on one line, without explanation.\n\nQuestion: {query}"
        )
    }
}

#[async_trait]
impl QueryTranslator for LlmMeshTranslator {
    async fn translate(
        &self,
        query: &str,
        restrictiveness: Restrictiveness,
    ) -> Result<String, LlmError> {
        let options = GenerationOptions::new(self.timeout, 200);
        let reply = self
            .model
            .generate_text(&Self::prompt(query, restrictiveness), &options)
            .await?;

        let cleaned = strategies::strip_formatting_artifacts(&reply);
        cleaned
            .lines()
            .map(|line| {
                let line = line.trim();
                line.strip_prefix('"')
                    .and_then(|l| l.strip_suffix('"'))
                    .filter(|inner| !inner.contains('"'))
                    .unwrap_or(line)
            })
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(LlmError::MalformedOutput { raw: reply })
    }
}

/// PubMed-backed [`BiomedicalSearch`]
pub struct PubMedSearch {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    translator: Option<Arc<dyn QueryTranslator>>,
}

impl PubMedSearch {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            translator: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    async fn search_term(&self, query: &str, options: &BiomedicalSearchOptions) -> String {
        if !options.use_controlled_vocabulary {
            return query.to_string();
        }
        let Some(translator) = &self.translator else {
            return query.to_string();
        };
        match translator.translate(query, options.restrictiveness).await {
            Ok(term) => {
                debug!(original = %query, term = %term, "Translated query to MeSH");
                term
            }
            Err(e) => {
                warn!(error = %e, "MeSH translation failed, searching with original text");
                query.to_string()
            }
        }
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, String)], timeout: Duration) -> Result<Value, SearchError> {
        let mut query: Vec<(&str, String)> = vec![("db", "pubmed".to_string()), ("retmode", "json".to_string())];
        query.extend(params.iter().cloned());
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }

        let url = format!("{}/{}?{}", self.base_url, endpoint, encode_query(&query));
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(SearchError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::from_status(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))
    }

    async fn run(&self, query: &str, options: &BiomedicalSearchOptions) -> Result<BiomedicalSearchResult, SearchError> {
        let term = self.search_term(query, options).await;

        let search: ESearchEnvelope = serde_json::from_value(
            self.get_json(
                "esearch.fcgi",
                &[
                    ("term", term.clone()),
                    ("retmax", options.limit.to_string()),
                    ("sort", "relevance".to_string()),
                ],
                options.timeout,
            )
            .await?,
        )
        .map_err(|e| SearchError::ParseError(e.to_string()))?;

        let total_count = search.result.count.parse().unwrap_or(search.result.idlist.len());
        let ids: Vec<String> = search.result.idlist.into_iter().take(options.limit).collect();
        if ids.is_empty() {
            info!(term = %term, "PubMed returned no records");
            return Ok(BiomedicalSearchResult { sources: Vec::new(), total_count });
        }

        let summary = self
            .get_json("esummary.fcgi", &[("id", ids.join(","))], options.timeout)
            .await?;
        let sources = parse_summaries(&summary, &ids);

        info!(term = %term, count = sources.len(), total_count, "PubMed search completed");
        Ok(BiomedicalSearchResult { sources, total_count })
    }
}

impl Default for PubMedSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BiomedicalSearch for PubMedSearch {
    async fn search(
        &self,
        query: &str,
        options: &BiomedicalSearchOptions,
    ) -> Result<BiomedicalSearchResult, SearchError> {
        tokio::time::timeout(options.timeout, self.run(query, options))
            .await
            .map_err(|_| SearchError::Timeout)?
    }
}

#[derive(Debug, Deserialize)]
struct ESearchEnvelope {
    #[serde(rename = "esearchresult")]
    result: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

/// Pull records out of an esummary document, in the order of `ids`
fn parse_summaries(summary: &Value, ids: &[String]) -> Vec<BiomedicalSource> {
    let Some(result) = summary.get("result") else {
        return Vec::new();
    };

    ids.iter()
        .filter_map(|id| {
            let record = result.get(id)?;
            if record.get("error").is_some() {
                return None;
            }
            let text = |key: &str| {
                record
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            let authors = record
                .get("authors")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let doi = record
                .get("articleids")
                .and_then(Value::as_array)
                .and_then(|list| {
                    list.iter().find(|a| a.get("idtype").and_then(Value::as_str) == Some("doi"))
                })
                .and_then(|a| a.get("value").and_then(Value::as_str))
                .map(str::to_string);

            Some(BiomedicalSource {
                id: id.clone(),
                title: text("title").unwrap_or_else(|| format!("PubMed record {}", id)),
                abstract_text: text("abstract"),
                authors,
                journal: text("fulljournalname").or_else(|| text("source")),
                date: text("pubdate"),
                doi,
                url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", id),
            })
        })
        .collect()
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_summary() -> Value {
        serde_json::json!({
            "result": {
                "uids": ["111", "222"],
                "111": {
                    "uid": "111",
                    "title": "Gene therapy outcomes",
                    "pubdate": "2023 Mar",
                    "fulljournalname": "The Lancet",
                    "source": "Lancet",
                    "authors": [{"name": "Smith A"}, {"name": "Jones B"}],
                    "articleids": [
                        {"idtype": "pubmed", "value": "111"},
                        {"idtype": "doi", "value": "10.1000/xyz"}
                    ]
                },
                "222": {
                    "uid": "222",
                    "title": "",
                    "source": "BMJ",
                    "authors": []
                }
            }
        })
    }

    #[test]
    fn test_parse_summaries() {
        let ids = vec!["222".to_string(), "111".to_string(), "333".to_string()];
        let sources = parse_summaries(&sample_summary(), &ids);

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "222");
        assert_eq!(sources[0].title, "PubMed record 222");
        assert_eq!(sources[0].journal.as_deref(), Some("BMJ"));

        assert_eq!(sources[1].title, "Gene therapy outcomes");
        assert_eq!(sources[1].authors, vec!["Smith A", "Jones B"]);
        assert_eq!(sources[1].doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(sources[1].journal.as_deref(), Some("The Lancet"));
        assert_eq!(sources[1].url, "https://pubmed.ncbi.nlm.nih.gov/111/");
    }

    #[test]
    fn test_encode_query() {
        let encoded = encode_query(&[("term", "heart failure[MeSH Terms]".to_string())]);
        assert_eq!(encoded, "term=heart%20failure%5BMeSH%20Terms%5D");
    }

    #[test]
    fn test_translator_prompt_depends_on_restrictiveness() {
        let broad = LlmMeshTranslator::prompt("q", Restrictiveness::Broad);
        let narrow = LlmMeshTranslator::prompt("q", Restrictiveness::Narrow);
        assert!(broad.contains("recall"));
        assert!(narrow.contains("[Majr]"));
    }
}
