//! Learning extraction: retrieved documents → learnings + follow-up questions
//!
//! Documents are shown to the model as `S1..Sn`. Detailed learnings cite
//! those ids, which are resolved to real urls / `PMID:` ids here; ids the
//! model made up are dropped.

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::Learning;
use crate::budget::{Budget, DetailBand};
use crate::error::{LlmError, RecoveryError};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::prompts;
use crate::recovery::{self, strategies, Recoverable, RecoveryRequest};
use crate::search::RetrievedDocument;

static SOURCE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bS(\d{1,3})\b").expect("valid source-ref regex"));

/// Headings that start the follow-up part of a free-form reply
const FOLLOW_UP_MARKERS: [&str; 3] = ["follow-up", "follow up", "followup"];

/// Learnings and follow-ups from one branch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub learnings: Vec<Learning>,
    pub follow_up_questions: Vec<String>,
}

// =============================================================================
// SCHEMAS
// =============================================================================

/// Concise form, used below the detailed threshold
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SimpleLearnings {
    /// One self-contained, information-dense statement per entry
    pub learnings: Vec<String>,
    /// Questions worth researching next
    #[serde(default, alias = "followUpQuestions")]
    pub follow_up_questions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LearningDraft {
    pub title: String,
    /// Multi-paragraph content
    pub body: String,
    /// Ids of the sources used, such as "S1"
    #[serde(default, alias = "sourceIds", alias = "sources")]
    pub source_ids: Vec<String>,
    #[serde(default, alias = "keyPoints")]
    pub key_points: Vec<String>,
}

/// Titled form, used at and above the detailed threshold
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DetailedLearnings {
    pub learnings: Vec<LearningDraft>,
    #[serde(default, alias = "followUpQuestions")]
    pub follow_up_questions: Vec<String>,
}

impl Recoverable for SimpleLearnings {
    const TARGET: &'static str = "learnings";

    fn is_valid(&self) -> bool {
        self.learnings.iter().all(|l| !l.trim().is_empty())
    }

    /// Also accepts a bare array of statements
    fn from_value(value: Value) -> Option<Self> {
        let parsed = match value {
            Value::Array(items) => Some(SimpleLearnings {
                learnings: items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                follow_up_questions: Vec::new(),
            }),
            other => serde_json::from_value::<Self>(other).ok(),
        };
        parsed.filter(|p| !p.learnings.is_empty() && p.is_valid())
    }

    fn from_text(text: &str) -> Option<Self> {
        let (body, follow_ups) = split_follow_ups(text);
        let learnings = strategies::list_items(body);
        (!learnings.is_empty()).then(|| SimpleLearnings {
            learnings,
            follow_up_questions: strategies::list_items(follow_ups),
        })
    }
}

impl Recoverable for DetailedLearnings {
    const TARGET: &'static str = "detailed learnings";

    fn is_valid(&self) -> bool {
        !self.learnings.is_empty()
            && self
                .learnings
                .iter()
                .all(|l| !l.title.trim().is_empty() && !l.body.trim().is_empty())
    }

    /// Markdown sections become learnings; a plain list degrades to
    /// one-line learnings titled by their opening words
    fn from_text(text: &str) -> Option<Self> {
        let (body, follow_ups) = split_follow_ups(text);
        let sections = strategies::markdown_sections(body);

        let learnings: Vec<LearningDraft> = if sections.is_empty() {
            strategies::list_items(body)
                .into_iter()
                .map(|item| LearningDraft {
                    title: short_title(&item),
                    source_ids: source_refs(&item),
                    key_points: Vec::new(),
                    body: item,
                })
                .collect()
        } else {
            sections
                .into_iter()
                .filter(|(title, _)| !is_follow_up_heading(title))
                .filter(|(_, body)| !body.is_empty())
                .map(|(title, body)| LearningDraft {
                    source_ids: source_refs(&body),
                    key_points: strategies::list_items(&body),
                    title,
                    body,
                })
                .collect()
        };

        (!learnings.is_empty()).then(|| DetailedLearnings {
            learnings,
            follow_up_questions: strategies::list_items(follow_ups),
        })
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Distill `documents` into at most `budget.learning_count` learnings.
///
/// Output the model produced but nothing could be parsed from degrades to an
/// empty extraction. Fails only when no model call produced any text.
pub async fn extract_learnings(
    model: &dyn LanguageModel,
    query: &str,
    documents: &[RetrievedDocument],
    budget: &Budget,
    timeout: Duration,
) -> Result<Extraction, LlmError> {
    if documents.is_empty() {
        debug!(query = %query, "No documents to extract learnings from");
        return Ok(Extraction::default());
    }

    let prompt = extraction_prompt(query, documents, budget);
    let options =
        GenerationOptions::new(timeout, budget.extraction_tokens()).with_system(prompts::system_prompt());
    let source_ids: Vec<&str> = documents.iter().map(|d| d.source_id.as_str()).collect();

    let mut extraction = if budget.detailed_learnings() {
        let text_prompt = format!(
            "{}\n\nWrite each learning as a markdown section: a `## ` heading with its title, then the body \
             with bullet key points and the ids (S1, S2, ...) of the sources it uses. \
             End with a `## Follow-up questions` section listing one question per bullet.",
            prompt
        );
        let request = RecoveryRequest::new(&prompt, options).with_text_prompt(text_prompt);
        let drafts: DetailedLearnings = recover_or_empty(model, request).await?;
        Extraction {
            learnings: drafts
                .learnings
                .into_iter()
                .map(|draft| materialize(draft, &source_ids))
                .collect(),
            follow_up_questions: drafts.follow_up_questions,
        }
    } else {
        let text_prompt = format!(
            "{}\n\nList each learning as a numbered item. Then write a `Follow-up questions:` heading \
             and list one question per numbered item.",
            prompt
        );
        let request = RecoveryRequest::new(&prompt, options).with_text_prompt(text_prompt);
        let parsed: SimpleLearnings = recover_or_empty(model, request).await?;
        Extraction {
            learnings: parsed
                .learnings
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .map(Learning::Simple)
                .collect(),
            follow_up_questions: parsed.follow_up_questions,
        }
    };

    extraction.learnings.truncate(budget.learning_count);
    extraction.follow_up_questions = extraction
        .follow_up_questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(budget.learning_count)
        .collect();

    info!(
        query = %query,
        learnings = extraction.learnings.len(),
        follow_ups = extraction.follow_up_questions.len(),
        "Extracted learnings"
    );
    Ok(extraction)
}

/// Unparseable output becomes `T::default()`; an unreachable model is an error
async fn recover_or_empty<T: Recoverable + Default>(
    model: &dyn LanguageModel,
    request: RecoveryRequest<'_, T>,
) -> Result<T, LlmError> {
    match recovery::recover(model, request).await {
        Ok(recovered) => Ok(recovered.into_value()),
        Err(RecoveryError::Unavailable { source, .. }) => Err(source),
        Err(RecoveryError::Exhausted { last_error, .. }) => {
            warn!(target_type = T::TARGET, error = %last_error, "No learnings recovered from model output");
            Ok(T::default())
        }
    }
}

fn extraction_prompt(query: &str, documents: &[RetrievedDocument], budget: &Budget) -> String {
    let count = budget.learning_count;
    let style = match (budget.band, budget.detailed_learnings()) {
        (DetailBand::Low, _) => format!(
            "Return up to {count} learnings. Keep each one short: one or two {} sentences.",
            budget.verbosity
        ),
        (_, false) => format!(
            "Return up to {count} learnings. Make each one {} and information dense: \
             include exact entities, people, places, metrics, numbers and dates.",
            budget.verbosity
        ),
        (_, true) => format!(
            "Return up to {count} {} learnings. Give each a title and a multi-paragraph body that covers \
             the topic from several perspectives, a short list of key points, and the ids \
             (S1, S2, ...) of every source it draws on.",
            budget.verbosity
        ),
    };

    let contents = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[S{}] {}\n{}", i + 1, doc.url, doc.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Given the following contents from a search for the query {}, extract learnings from them. \
         {style} Make sure each learning is unique and not similar to the others. \
         Keep each learning under about {} tokens. \
         Also return up to {count} follow-up questions that would deepen the research.\n\n{}",
        prompts::tagged("query", query),
        budget.learning_tokens,
        prompts::tagged("contents", &contents)
    )
}

/// Resolve `S<n>` references against the branch's documents
fn materialize(draft: LearningDraft, source_ids: &[&str]) -> Learning {
    let mut resolved: Vec<String> = Vec::new();
    for reference in &draft.source_ids {
        let reference = reference.trim().trim_matches(|c| c == '[' || c == ']');
        let id = match SOURCE_REF.captures(reference) {
            Some(caps) if caps.get(0).map(|m| m.as_str().len()) == Some(reference.len()) => caps
                .get(1)
                .and_then(|n| n.as_str().parse::<usize>().ok())
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| source_ids.get(i).copied()),
            _ => source_ids.iter().copied().find(|id| *id == reference),
        };
        if let Some(id) = id {
            if !resolved.iter().any(|r| r == id) {
                resolved.push(id.to_string());
            }
        }
    }

    Learning::Detailed {
        title: draft.title.trim().to_string(),
        body: draft.body.trim().to_string(),
        source_ids: resolved,
        key_points: draft
            .key_points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
    }
}

fn split_follow_ups(text: &str) -> (&str, &str) {
    FOLLOW_UP_MARKERS
        .iter()
        .map(|marker| strategies::split_at_heading(text, marker))
        .find(|(_, after)| !after.is_empty())
        .unwrap_or((text, ""))
}

fn is_follow_up_heading(title: &str) -> bool {
    let title = title.to_lowercase();
    FOLLOW_UP_MARKERS.iter().any(|m| title.contains(m))
}

/// `S<n>` ids mentioned anywhere in a text
fn source_refs(text: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for caps in SOURCE_REF.captures_iter(text) {
        let id = format!("S{}", &caps[1]);
        if !refs.contains(&id) {
            refs.push(id);
        }
    }
    refs
}

fn short_title(item: &str) -> String {
    let words: Vec<&str> = item.split_whitespace().take(8).collect();
    let title = words.join(" ");
    title.trim_end_matches(['.', ',', ';', ':']).to_string()
}
