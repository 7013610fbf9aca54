//! Query planner: topic (+ prior learnings) → search queries with goals

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{Learning, PlannedQuery};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::prompts;
use crate::recovery::{self, strategies, Recoverable, RecoveryRequest};

/// Tokens allowed for a planning reply
const PLAN_MAX_TOKENS: u32 = 2_000;

/// Longest topic text used inside the templated fallback queries
const FALLBACK_TOPIC_CHARS: usize = 200;

/// Schema sent to the model
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryPlan {
    /// Unique search queries, each with its research goal
    pub queries: Vec<PlannedQuery>,
}

impl Recoverable for QueryPlan {
    const TARGET: &'static str = "query plan";

    fn is_valid(&self) -> bool {
        !self.queries.is_empty() && self.queries.iter().all(|q| !q.query.trim().is_empty())
    }

    /// Also accepts a bare array, of objects or of plain strings
    fn from_value(value: Value) -> Option<Self> {
        let items = match value {
            Value::Object(mut map) => map.remove("queries")?,
            other => other,
        };
        let Value::Array(items) = items else {
            return None;
        };
        let queries = items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(query) => Some(PlannedQuery::new(query, "")),
                other => serde_json::from_value::<PlannedQuery>(other).ok(),
            })
            .filter(|q| !q.query.trim().is_empty())
            .collect();
        Some(QueryPlan { queries }).filter(Self::is_valid)
    }

    /// `Query:` / `Research goal:` labeled pairs, else a plain list of queries
    fn from_text(text: &str) -> Option<Self> {
        let labeled = strategies::labeled_values(text, "query");
        let queries: Vec<PlannedQuery> = if labeled.is_empty() {
            strategies::list_items(text)
                .into_iter()
                .map(|query| PlannedQuery::new(query, ""))
                .collect()
        } else {
            let mut goals = strategies::labeled_values(text, "research goal").into_iter();
            labeled
                .into_iter()
                .map(|query| PlannedQuery::new(query, goals.next().unwrap_or_default()))
                .collect()
        };
        (!queries.is_empty()).then_some(QueryPlan { queries })
    }
}

/// Plan up to `max_count` queries for `topic`. Never returns an empty list.
pub async fn generate_queries(
    model: &dyn LanguageModel,
    topic: &str,
    prior_learnings: &[Learning],
    max_count: usize,
    timeout: Duration,
) -> Vec<PlannedQuery> {
    let max_count = max_count.max(1);
    let prompt = plan_prompt(topic, prior_learnings, max_count);
    let text_prompt = format!(
        "{}\n\nFor each query write one line `Query: <query>` followed by one line \
         `Research goal: <goal>`. Number the pairs.",
        prompt
    );
    let options = GenerationOptions::new(timeout, PLAN_MAX_TOKENS).with_system(prompts::system_prompt());

    let request = RecoveryRequest::new(&prompt, options)
        .with_text_prompt(text_prompt)
        .with_default(QueryPlan {
            queries: fallback_queries(topic, max_count),
        });

    let plan = match recovery::recover::<QueryPlan>(model, request).await {
        Ok(recovered) => recovered.into_value(),
        Err(_) => QueryPlan {
            queries: fallback_queries(topic, max_count),
        },
    };

    let queries = normalize(plan.queries, max_count);
    if queries.is_empty() {
        return fallback_queries(topic, max_count);
    }

    info!(count = queries.len(), max_count, "Planned research queries");
    for query in &queries {
        debug!(query = %query.query, goal = %query.research_goal, "Planned query");
    }
    queries
}

fn plan_prompt(topic: &str, prior_learnings: &[Learning], max_count: usize) -> String {
    let mut prompt = format!(
        "Given the following prompt from the user, generate a list of search engine queries to research the topic. \
         Return a maximum of {max_count} queries, but feel free to return less if the original prompt is clear. \
         Make sure each query is unique and not similar to each other. For every query add a research goal: \
         what the query should find, and how to advance the research once results are in, \
         with specific directions for further searches.\n\n{}",
        prompts::tagged("prompt", topic.trim())
    );

    if !prior_learnings.is_empty() {
        let learnings = prior_learnings
            .iter()
            .map(Learning::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!(
            "\n\nHere are some learnings from previous research, use them to generate more specific queries:\n{}",
            prompts::tagged("learnings", &learnings)
        ));
    }
    prompt
}

/// Trim, drop blanks and case-insensitive repeats, fill missing goals, cap the count
fn normalize(queries: Vec<PlannedQuery>, max_count: usize) -> Vec<PlannedQuery> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter_map(|q| {
            let query = q.query.trim().to_string();
            if query.is_empty() || !seen.insert(query.to_lowercase()) {
                return None;
            }
            let goal = q.research_goal.trim();
            let research_goal = if goal.is_empty() {
                format!("Find key facts and recent developments about: {}", query)
            } else {
                goal.to_string()
            };
            Some(PlannedQuery { query, research_goal })
        })
        .take(max_count)
        .collect()
}

/// Deterministic queries templated from the topic
pub fn fallback_queries(topic: &str, max_count: usize) -> Vec<PlannedQuery> {
    let subject = headline(topic);
    let templates: [(&str, &str); 5] = [
        ("{}", "Establish an overview of {} and the main sources on it."),
        ("{} latest research", "Find the most recent findings on {}."),
        ("{} key facts and statistics", "Collect concrete figures, dates and entities for {}."),
        ("{} challenges and open questions", "Identify unresolved problems and debates around {}."),
        ("{} expert analysis", "Gather expert opinion and contrasting perspectives on {}."),
    ];
    templates
        .iter()
        .take(max_count.max(1))
        .map(|(query, goal)| PlannedQuery::new(query.replace("{}", &subject), goal.replace("{}", &subject)))
        .collect()
}

/// First meaningful line of a topic, without the child-level preamble
fn headline(topic: &str) -> String {
    let line = topic
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("general research");
    let line = line.strip_prefix("Previous research goal:").unwrap_or(line).trim();
    crate::search::truncate_chars(line, FALLBACK_TOPIC_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::recovery::test_support::ScriptedModel;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_structured_plan_is_capped_and_deduplicated() {
        let model = ScriptedModel::new().structured(Ok(serde_json::json!({
            "queries": [
                {"query": "rust async", "research_goal": "g1"},
                {"query": "Rust Async", "research_goal": "dup"},
                {"query": "tokio scheduler", "researchGoal": "g2"},
                {"query": "  ", "research_goal": "blank"},
                {"query": "async-std status", "research_goal": "g3"}
            ]
        })));

        let queries = generate_queries(&model, "rust async", &[], 2, TIMEOUT).await;

        assert_eq!(
            queries,
            vec![
                PlannedQuery::new("rust async", "g1"),
                PlannedQuery::new("tokio scheduler", "g2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_prior_learnings_are_included_in_prompt() {
        let model = ScriptedModel::new().structured(Ok(serde_json::json!({"queries": ["a"]})));
        let learnings = vec![Learning::Simple("Tokio uses work stealing".to_string())];

        let queries = generate_queries(&model, "topic", &learnings, 3, TIMEOUT).await;

        assert_eq!(queries.len(), 1);
        assert!(queries[0].research_goal.starts_with("Find key facts"));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Tokio uses work stealing"));
        assert!(prompts[0].contains("maximum of 3 queries"));
    }

    #[tokio::test]
    async fn test_labeled_text_recovery() {
        let model = ScriptedModel::new()
            .structured(Err(LlmError::MalformedOutput { raw: "Here you go".to_string() }))
            .text(Ok("1. Query: crispr off-target effects\n   Research goal: quantify risk\n\
                      2. Query: base editing trials\n   Research goal: list trials"
                .to_string()));

        let queries = generate_queries(&model, "crispr", &[], 4, TIMEOUT).await;

        assert_eq!(
            queries,
            vec![
                PlannedQuery::new("crispr off-target effects", "quantify risk"),
                PlannedQuery::new("base editing trials", "list trials"),
            ]
        );
    }

    #[tokio::test]
    async fn test_total_failure_uses_templated_queries() {
        let model = ScriptedModel::new()
            .structured(Err(LlmError::Timeout(1)))
            .text(Ok("I'm sorry, I can't do that.".to_string()));

        let queries = generate_queries(&model, "quantum batteries", &[], 3, TIMEOUT).await;

        assert_eq!(queries, fallback_queries("quantum batteries", 3));
        assert_eq!(queries[0].query, "quantum batteries");
        assert_eq!(queries[1].query, "quantum batteries latest research");
    }

    #[test]
    fn test_fallback_is_never_empty() {
        assert_eq!(fallback_queries("x", 0).len(), 1);
        assert_eq!(fallback_queries("x", 10).len(), 5);
    }

    #[test]
    fn test_headline_strips_child_preamble() {
        let topic = "Previous research goal: compare runtimes\nFollow-up research directions:\nwhat about io_uring?";
        assert_eq!(headline(topic), "compare runtimes");
        assert_eq!(headline("\n\n"), "general research");
    }

    #[test]
    fn test_plan_from_plain_list() {
        let plan = QueryPlan::from_text("- first query\n- second query").unwrap();
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[1].query, "second query");
        assert!(QueryPlan::from_text("nothing here").is_none());
    }
}
