//! Report assembly
//!
//! Every url and biomedical source gets a stable citation token (`web1`,
//! `bio1`, ...) in first-seen order. The model writes the body citing those
//! tokens; the references section is plain string assembly from the same
//! table, so every token left in the body resolves to an entry.

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::budget;
use crate::error::ResearchError;
use crate::llm::{GenerationOptions, LanguageModel};
use crate::prompts;
use crate::recovery::{self, strategies, Recoverable, RecoveryRequest};
use crate::research::Learning;
use crate::search::{BiomedicalSource, Provenance};

/// `[web1]`, `[bio2]`, `[web1, bio2]`
static CITATION_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*((?:web|bio)\d+(?:\s*[,;]\s*(?:web|bio)\d+)*)\s*\]").expect("valid citation regex")
});

static MODEL_REFERENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?(?:references|sources|bibliography|works cited)(?:\*\*)?[ \t]*:?[ \t]*$",
    )
    .expect("valid references-heading regex")
});

const ANSWER_MAX_TOKENS: u32 = 1_000;

// =============================================================================
// SOURCE TABLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// `web1`, `bio1`, ...
    pub token: String,
    pub provenance: Provenance,
    pub url: String,
    /// One-line reference text
    pub reference: String,
}

/// Citation tokens for every source, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTable {
    entries: Vec<SourceEntry>,
}

impl SourceTable {
    pub fn build(visited_urls: &[String], biomedical_sources: &[BiomedicalSource]) -> Self {
        let mut entries = Vec::new();

        let mut seen = HashSet::new();
        for url in visited_urls.iter().filter(|url| seen.insert(url.as_str())) {
            entries.push(SourceEntry {
                token: format!("web{}", entries.len() + 1),
                provenance: Provenance::Web,
                url: url.clone(),
                reference: url.clone(),
            });
        }

        let web_count = entries.len();
        let mut seen = HashSet::new();
        for source in biomedical_sources.iter().filter(|s| seen.insert(s.id.as_str())) {
            entries.push(SourceEntry {
                token: format!("bio{}", entries.len() - web_count + 1),
                provenance: Provenance::Biomedical,
                url: source.url.clone(),
                reference: biomedical_reference(source),
            });
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.iter().any(|e| e.token.eq_ignore_ascii_case(token))
    }

    /// Source list shown to the model
    fn prompt_listing(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("[{}] {}", e.token, e.reference))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Deterministic references section appended to the report
    pub fn references_section(&self) -> String {
        let mut section = String::from("## References\n");
        if self.entries.is_empty() {
            section.push_str("\nNo sources were retrieved.\n");
            return section;
        }
        for entry in &self.entries {
            section.push_str(&format!("\n[{}] {}", entry.token, entry.reference));
        }
        section.push('\n');
        section
    }
}

fn biomedical_reference(source: &BiomedicalSource) -> String {
    let mut parts = Vec::new();
    if !source.authors.is_empty() {
        let authors = if source.authors.len() > 3 {
            format!("{} et al.", source.authors[..3].join(", "))
        } else {
            source.authors.join(", ")
        };
        parts.push(authors);
    }
    parts.push(source.title.trim_end_matches('.').to_string());
    match (&source.journal, &source.date) {
        (Some(journal), Some(date)) => parts.push(format!("{} ({})", journal, date)),
        (Some(journal), None) => parts.push(journal.clone()),
        (None, Some(date)) => parts.push(date.clone()),
        (None, None) => {}
    }
    if let Some(doi) = &source.doi {
        parts.push(format!("doi:{}", doi));
    }
    let parts: Vec<&str> = parts.iter().map(|p| p.trim_end_matches('.')).collect();
    format!("{}. PMID:{} {}", parts.join(". "), source.id, source.url)
}

// =============================================================================
// CITATION HANDLING
// =============================================================================

/// Paragraph citation counts for a report body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CitationCoverage {
    pub cited: usize,
    pub total: usize,
}

impl CitationCoverage {
    pub fn is_complete(&self) -> bool {
        self.cited == self.total
    }
}

/// Count non-empty, non-heading paragraphs and how many carry a citation
pub fn citation_coverage(body: &str) -> CitationCoverage {
    let paragraphs: Vec<&str> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| !p.lines().all(|line| line.trim_start().starts_with('#')))
        .collect();
    CitationCoverage {
        cited: paragraphs.iter().filter(|p| CITATION_GROUP.is_match(p)).count(),
        total: paragraphs.len(),
    }
}

/// Drop any references section the model wrote itself
fn strip_model_references(body: &str) -> &str {
    match MODEL_REFERENCES.find_iter(body).last() {
        Some(m) if body[m.end()..].lines().all(is_reference_line) => body[..m.start()].trim_end(),
        _ => body.trim_end(),
    }
}

/// Blank, a list item, a bracketed marker, or a bare link
fn is_reference_line(line: &str) -> bool {
    let line = line.trim();
    let lower = line.to_lowercase();
    line.is_empty()
        || line.starts_with(['-', '*', '•', '['])
        || line
            .split_once(['.', ')'])
            .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        || lower.contains("http")
        || lower.contains("doi:")
        || lower.contains("pmid")
}

/// Normalize citation groups to `[web1][bio2]` and drop tokens with no source
fn sanitize_citations(body: &str, table: &SourceTable) -> String {
    CITATION_GROUP
        .replace_all(body, |caps: &regex::Captures<'_>| {
            caps[1]
                .split([',', ';'])
                .map(|token| token.trim().to_lowercase())
                .filter(|token| table.contains(token))
                .map(|token| format!("[{}]", token))
                .collect::<String>()
        })
        .into_owned()
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReportDraft {
    /// Final report in markdown, citing sources inline
    #[serde(alias = "reportMarkdown")]
    pub report_markdown: String,
}

impl Recoverable for ReportDraft {
    const TARGET: &'static str = "report";

    fn is_valid(&self) -> bool {
        !self.report_markdown.trim().is_empty()
    }

    fn from_value(value: Value) -> Option<Self> {
        let draft = match value {
            Value::String(report_markdown) => Some(ReportDraft { report_markdown }),
            other => serde_json::from_value::<Self>(other).ok(),
        };
        draft.filter(Self::is_valid)
    }

    /// Free-form markdown is the report itself once wrapper artifacts are gone
    fn from_text(text: &str) -> Option<Self> {
        let report_markdown = strategies::strip_formatting_artifacts(text);
        (!report_markdown.is_empty()).then_some(ReportDraft { report_markdown })
    }
}

fn learnings_block(learnings: &[Learning]) -> String {
    learnings
        .iter()
        .map(|l| prompts::tagged("learning", &l.as_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn report_prompt(prompt: &str, learnings: &[Learning], table: &SourceTable, detail_level: u8) -> String {
    let (min_words, max_words) = budget::report_word_target(detail_level);
    format!(
        "Given the following prompt from the user, write a final report on the topic using the learnings from research. \
         Make it {verbosity}: aim for {min_words}-{max_words} words. Structure it with a title, an executive summary, \
         sections with headings covering every learning, and a conclusion.\n\
         Cite sources inline with their tokens in square brackets, for example [web1] or [bio1]. \
         Every paragraph must contain at least one citation token. Only use tokens from the source list. \
         Do not write a references section; it is added automatically.\n\n{}\n\n\
         Here are all the learnings from previous research:\n\n{}\n\n{}",
        prompts::tagged("prompt", prompt.trim()),
        prompts::tagged("learnings", &learnings_block(learnings)),
        prompts::tagged("sources", &table.prompt_listing()),
        verbosity = budget::verbosity_label(detail_level),
    )
}

/// Write the cited report. Fails when every recovery tier fails.
pub async fn write_report(
    model: &dyn LanguageModel,
    prompt: &str,
    learnings: &[Learning],
    visited_urls: &[String],
    biomedical_sources: &[BiomedicalSource],
    detail_level: u8,
    timeout: Duration,
) -> Result<String, ResearchError> {
    let table = SourceTable::build(visited_urls, biomedical_sources);
    let report_prompt = report_prompt(prompt, learnings, &table, detail_level);
    let options = GenerationOptions::new(timeout, budget::report_token_ceiling(detail_level))
        .with_system(prompts::system_prompt());

    let request = RecoveryRequest::new(&report_prompt, options).with_text_prompt(format!(
        "{}\n\nRespond with the report in markdown only.",
        report_prompt
    ));
    let draft = recovery::recover::<ReportDraft>(model, request).await?.into_value();

    let body = strategies::strip_formatting_artifacts(&draft.report_markdown);
    let body = sanitize_citations(strip_model_references(&body), &table);

    let coverage = citation_coverage(&body);
    if !coverage.is_complete() {
        warn!(
            cited = coverage.cited,
            paragraphs = coverage.total,
            "Some report paragraphs carry no citation"
        );
    }
    info!(
        sources = table.entries().len(),
        learnings = learnings.len(),
        "Report written"
    );

    Ok(format!("{}\n\n{}", body, table.references_section()))
}

// =============================================================================
// ANSWER
// =============================================================================

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnswerDraft {
    /// The final answer; short and direct, no extra text
    #[serde(alias = "exactAnswer")]
    pub exact_answer: String,
}

impl Recoverable for AnswerDraft {
    const TARGET: &'static str = "answer";

    fn is_valid(&self) -> bool {
        !self.exact_answer.trim().is_empty()
    }

    fn from_value(value: Value) -> Option<Self> {
        let draft = match value {
            Value::String(exact_answer) => Some(AnswerDraft { exact_answer }),
            other => serde_json::from_value::<Self>(other).ok(),
        };
        draft.filter(Self::is_valid)
    }

    fn from_text(text: &str) -> Option<Self> {
        let exact_answer = strategies::strip_formatting_artifacts(text);
        (!exact_answer.is_empty()).then_some(AnswerDraft { exact_answer })
    }
}

/// Concise answer with no references section
pub async fn write_answer(
    model: &dyn LanguageModel,
    prompt: &str,
    learnings: &[Learning],
    timeout: Duration,
) -> Result<String, ResearchError> {
    let answer_prompt = format!(
        "Given the following prompt from the user, write a final answer on the topic using the learnings from research. \
         Follow the format specified in the prompt. Do not include any text other than the answer. \
         Keep the answer as concise as possible: usually a few words, at most a sentence.\n\n{}\n\n\
         Here are all the learnings from research on the topic that you can use to help answer the prompt:\n\n{}",
        prompts::tagged("prompt", prompt.trim()),
        prompts::tagged("learnings", &learnings_block(learnings)),
    );
    let options = GenerationOptions::new(timeout, ANSWER_MAX_TOKENS).with_system(prompts::system_prompt());

    let draft = recovery::recover::<AnswerDraft>(model, RecoveryRequest::new(&answer_prompt, options))
        .await?
        .into_value();
    Ok(strategies::strip_formatting_artifacts(&draft.exact_answer))
}
