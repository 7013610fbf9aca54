//! Research data model
//!
//! Requests flow down the recursion, accumulators flow back up. Nothing here
//! is shared between concurrently running branches except through
//! [`ProgressSink`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::budget::{self, MAX_DETAIL, MIN_DETAIL};
use crate::error::ResearchError;
use crate::search::{BiomedicalSource, DomainFilter, Restrictiveness};

// =============================================================================
// REQUEST
// =============================================================================

/// One orchestration call. A child level receives a derived copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    /// Queries explored at this level
    pub breadth: usize,
    /// Levels remaining, this one included
    pub depth: usize,
    /// 1 to 10
    pub detail_level: u8,
    pub domains: DomainFilter,
    /// Query the biomedical collaborator alongside web search
    pub biomedical_enabled: bool,
    /// `None` defers to the configured default
    pub restrictiveness: Option<Restrictiveness>,
    pub use_controlled_vocabulary: bool,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            breadth: 4,
            depth: 2,
            detail_level: 5,
            domains: DomainFilter::default(),
            biomedical_enabled: true,
            restrictiveness: None,
            use_controlled_vocabulary: true,
        }
    }

    pub fn with_breadth(mut self, breadth: usize) -> Self {
        self.breadth = breadth;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_detail_level(mut self, detail_level: u8) -> Self {
        self.detail_level = detail_level;
        self
    }

    pub fn with_domains(mut self, domains: DomainFilter) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_biomedical(mut self, enabled: bool) -> Self {
        self.biomedical_enabled = enabled;
        self
    }

    pub fn with_restrictiveness(mut self, restrictiveness: Restrictiveness) -> Self {
        self.restrictiveness = Some(restrictiveness);
        self
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.topic.trim().is_empty() {
            return Err(ResearchError::InvalidRequest("topic is empty".to_string()));
        }
        if self.breadth == 0 {
            return Err(ResearchError::InvalidRequest("breadth must be at least 1".to_string()));
        }
        if !(MIN_DETAIL..=MAX_DETAIL).contains(&self.detail_level) {
            return Err(ResearchError::InvalidRequest(format!(
                "detail level must be between {} and {}, got {}",
                MIN_DETAIL, MAX_DETAIL, self.detail_level
            )));
        }
        Ok(())
    }

    /// Depth left once this level finishes; zero means no child level
    pub fn remaining_depth(&self) -> usize {
        self.depth.saturating_sub(1)
    }

    /// Request for the next level down: new topic, narrower breadth, one less depth
    pub fn child(&self, topic: String) -> Self {
        Self {
            topic,
            breadth: budget::child_breadth(self.breadth),
            depth: self.remaining_depth(),
            ..self.clone()
        }
    }
}

// =============================================================================
// PLANNED QUERY
// =============================================================================

/// A search query and what the branch should learn from it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PlannedQuery {
    /// Search engine query text
    pub query: String,
    /// Goal of the search and how to extend the research once results arrive
    #[serde(default, alias = "researchGoal")]
    pub research_goal: String,
}

impl PlannedQuery {
    pub fn new(query: impl Into<String>, research_goal: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            research_goal: research_goal.into(),
        }
    }
}

// =============================================================================
// LEARNING
// =============================================================================

/// A distilled, citable unit of information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Learning {
    Simple(String),
    Detailed {
        title: String,
        body: String,
        /// Urls or `PMID:` ids the learning draws on
        source_ids: Vec<String>,
        key_points: Vec<String>,
    },
}

impl Learning {
    /// Plain-text rendering used by planner and report prompts
    pub fn as_text(&self) -> String {
        match self {
            Learning::Simple(text) => text.clone(),
            Learning::Detailed {
                title,
                body,
                source_ids,
                key_points,
            } => {
                let mut text = format!("## {}\n\n{}", title, body.trim());
                if !key_points.is_empty() {
                    text.push_str("\n\nKey points:");
                    for point in key_points {
                        text.push_str(&format!("\n- {}", point));
                    }
                }
                if !source_ids.is_empty() {
                    text.push_str(&format!("\n\nSources: {}", source_ids.join(", ")));
                }
                text
            }
        }
    }

    pub fn source_ids(&self) -> &[String] {
        match self {
            Learning::Simple(_) => &[],
            Learning::Detailed { source_ids, .. } => source_ids,
        }
    }
}

// =============================================================================
// BRANCH RESULT & ACCUMULATOR
// =============================================================================

/// What a single branch found before any recursion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchResult {
    pub learnings: Vec<Learning>,
    pub visited_urls: Vec<String>,
    pub biomedical_sources: Vec<BiomedicalSource>,
    pub follow_up_questions: Vec<String>,
}

/// Running union of everything found, threaded through the recursion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResearchAccumulator {
    /// Ordered; unique after aggregation
    pub learnings: Vec<Learning>,
    /// Ordered-unique
    pub visited_urls: Vec<String>,
    /// Ordered-unique by PMID
    pub biomedical_sources: Vec<BiomedicalSource>,
}

impl ResearchAccumulator {
    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty() && self.visited_urls.is_empty() && self.biomedical_sources.is_empty()
    }

    /// Extend with one branch's findings. Learnings are appended as-is;
    /// urls and sources are deduplicated by identifier.
    pub fn absorb(&mut self, result: BranchResult) {
        self.learnings.extend(result.learnings);
        self.push_urls(result.visited_urls);
        self.push_sources(result.biomedical_sources);
    }

    /// Union with another accumulator, deduplicating learnings by value.
    /// Commutative as a set and idempotent.
    pub fn merge(&mut self, other: ResearchAccumulator) {
        let mut seen: HashSet<Learning> = self.learnings.iter().cloned().collect();
        for learning in other.learnings {
            if seen.insert(learning.clone()) {
                self.learnings.push(learning);
            }
        }
        self.push_urls(other.visited_urls);
        self.push_sources(other.biomedical_sources);
    }

    /// Drop repeated learnings, keeping first occurrences
    pub fn dedup_learnings(&mut self) {
        let mut seen = HashSet::new();
        self.learnings.retain(|learning| seen.insert(learning.clone()));
    }

    fn push_urls(&mut self, urls: Vec<String>) {
        let mut seen: HashSet<String> = self.visited_urls.iter().cloned().collect();
        for url in urls {
            if seen.insert(url.clone()) {
                self.visited_urls.push(url);
            }
        }
    }

    fn push_sources(&mut self, sources: Vec<BiomedicalSource>) {
        let mut seen: HashSet<String> = self.biomedical_sources.iter().map(|s| s.id.clone()).collect();
        for source in sources {
            if seen.insert(source.id.clone()) {
                self.biomedical_sources.push(source);
            }
        }
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Planning,
    FanningOut,
    Searching,
    Extracting,
    Recursing,
    Aggregating,
    Done,
}

/// Snapshot of one traversal level, handed to the observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    /// 0 to 100, relative to the current level
    pub percent: u8,
    pub current_query: Option<String>,
    pub completed_queries: usize,
    pub total_queries: usize,
    /// 1-based level being reported
    pub current_depth: usize,
    pub total_depth: usize,
    pub current_breadth: usize,
    pub total_breadth: usize,
}

impl Progress {
    pub fn new(current_depth: usize, total_depth: usize, current_breadth: usize, total_breadth: usize) -> Self {
        Self {
            stage: Stage::Initializing,
            percent: 0,
            current_query: None,
            completed_queries: 0,
            total_queries: 0,
            current_depth,
            total_depth,
            current_breadth,
            total_breadth,
        }
    }

    pub(crate) fn recompute_percent(&mut self) {
        self.percent = if self.stage == Stage::Done {
            100
        } else if self.total_queries == 0 {
            0
        } else {
            (self.completed_queries.min(self.total_queries) * 100 / self.total_queries) as u8
        };
    }
}

/// Receives progress snapshots; called from concurrently running branches
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}
