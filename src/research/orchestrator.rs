//! Recursive orchestrator
//!
//! One call to [`research_level`] drives one level of breadth:
//!
//! ```text
//! Initializing → Planning → FanningOut → (per branch: Searching → Extracting → [Recursing])
//!              → Aggregating → Done
//! ```
//!
//! Branches run as tokio tasks under a per-level semaphore, so peak
//! concurrency is `concurrency_limit × active levels`. A recursing branch
//! awaits its child level without holding up other tasks.

use futures::future::{BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::branch;
use super::feedback;
use super::planner;
use super::types::{Learning, Progress, ProgressSink, ResearchAccumulator, ResearchRequest, Stage};
use crate::budget;
use crate::config::Config;
use crate::error::ResearchError;
use crate::llm::LanguageModel;
use crate::report;
use crate::search::{BiomedicalSearch, BiomedicalSearchOptions, WebSearch, WebSearchOptions};

/// Collaborators and configuration shared by every level of one run
pub(crate) struct ResearchContext {
    pub model: Arc<dyn LanguageModel>,
    pub web: Arc<dyn WebSearch>,
    pub biomedical: Option<Arc<dyn BiomedicalSearch>>,
    pub config: Config,
    pub sink: Arc<dyn ProgressSink>,
    /// Depth of the top-level request, for progress reporting
    pub total_depth: usize,
    pub total_breadth: usize,
}

impl ResearchContext {
    pub fn web_options(&self, request: &ResearchRequest) -> WebSearchOptions {
        WebSearchOptions {
            timeout: self.config.search_timeout,
            max_results: self.config.max_search_results,
            want_markdown: true,
            domains: request.domains.clone(),
        }
    }

    pub fn biomedical_options(&self, request: &ResearchRequest) -> BiomedicalSearchOptions {
        BiomedicalSearchOptions {
            limit: self.config.pubmed_max_results,
            use_controlled_vocabulary: request.use_controlled_vocabulary,
            restrictiveness: crate::config::resolve_restrictiveness(
                request.restrictiveness,
                self.config.mesh_restrictiveness,
            ),
            timeout: self.config.search_timeout,
        }
    }

    /// Generation timeout scaled to the request's detail level
    pub fn generation_timeout(&self, detail_level: u8) -> Duration {
        budget::generation_timeout(self.config.generation_timeout, detail_level)
    }
}

// =============================================================================
// RESEARCHER
// =============================================================================

/// Entry point for research runs.
///
/// Holds the configuration and collaborators explicitly; nothing is looked
/// up from global state.
#[derive(Clone)]
pub struct Researcher {
    model: Arc<dyn LanguageModel>,
    web: Arc<dyn WebSearch>,
    biomedical: Option<Arc<dyn BiomedicalSearch>>,
    config: Config,
}

impl Researcher {
    pub fn new(config: Config, model: Arc<dyn LanguageModel>, web: Arc<dyn WebSearch>) -> Self {
        Self {
            model,
            web,
            biomedical: None,
            config,
        }
    }

    /// Add a biomedical collaborator, queried when a request enables it
    pub fn with_biomedical(mut self, biomedical: Arc<dyn BiomedicalSearch>) -> Self {
        self.biomedical = Some(biomedical);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full breadth/depth traversal for `request`.
    ///
    /// Branch failures only shrink the explored tree. The only errors are an
    /// invalid request and cancellation through `token`.
    pub async fn start_research<P>(
        &self,
        request: ResearchRequest,
        on_progress: P,
        token: CancellationToken,
    ) -> Result<ResearchAccumulator, ResearchError>
    where
        P: ProgressSink + 'static,
    {
        request.validate()?;

        let ctx = Arc::new(ResearchContext {
            model: Arc::clone(&self.model),
            web: Arc::clone(&self.web),
            biomedical: self.biomedical.clone(),
            config: self.config.clone(),
            sink: Arc::new(on_progress),
            total_depth: request.depth.max(1),
            total_breadth: request.breadth,
        });

        info!(
            topic = %request.topic,
            breadth = request.breadth,
            depth = request.depth,
            detail = request.detail_level,
            model = %self.model.name(),
            "Starting research"
        );

        let mut result = research_level(ctx, request, ResearchAccumulator::default(), token).await?;
        result.dedup_learnings();

        info!(
            learnings = result.learnings.len(),
            urls = result.visited_urls.len(),
            biomedical_sources = result.biomedical_sources.len(),
            "Research complete"
        );
        Ok(result)
    }

    /// Cited long-form report over a finished run
    pub async fn write_report(&self, prompt: &str, result: &ResearchAccumulator, detail_level: u8) -> Result<String, ResearchError> {
        report::write_report(
            self.model.as_ref(),
            prompt,
            &result.learnings,
            &result.visited_urls,
            &result.biomedical_sources,
            detail_level,
            budget::generation_timeout(self.config.generation_timeout, detail_level),
        )
        .await
    }

    /// Short direct answer over a finished run
    pub async fn write_answer(&self, prompt: &str, learnings: &[Learning], detail_level: u8) -> Result<String, ResearchError> {
        report::write_answer(
            self.model.as_ref(),
            prompt,
            learnings,
            budget::generation_timeout(self.config.generation_timeout, detail_level),
        )
        .await
    }

    /// Clarifying questions to ask before a run
    pub async fn generate_feedback(&self, topic: &str, max_questions: usize) -> Vec<String> {
        feedback::generate_feedback(self.model.as_ref(), topic, max_questions, self.config.generation_timeout).await
    }
}

// =============================================================================
// LEVEL PROGRESS
// =============================================================================

/// Progress for one level: one writer per level, branches report through it
#[derive(Clone)]
pub(crate) struct LevelProgress {
    state: Arc<Mutex<Progress>>,
    sink: Arc<dyn ProgressSink>,
}

impl LevelProgress {
    fn new(ctx: &ResearchContext, request: &ResearchRequest) -> Self {
        let current_depth = ctx.total_depth.saturating_sub(request.depth.max(1)) + 1;
        Self {
            state: Arc::new(Mutex::new(Progress::new(
                current_depth,
                ctx.total_depth,
                request.breadth,
                ctx.total_breadth,
            ))),
            sink: Arc::clone(&ctx.sink),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Progress)) {
        let snapshot = match self.state.lock() {
            Ok(mut progress) => {
                apply(&mut progress);
                progress.recompute_percent();
                progress.clone()
            }
            Err(_) => return,
        };
        self.sink.report(&snapshot);
    }

    pub fn stage(&self, stage: Stage) {
        self.update(|p| p.stage = stage);
    }

    fn planned(&self, total_queries: usize) {
        self.update(|p| {
            p.stage = Stage::FanningOut;
            p.total_queries = total_queries;
        });
    }

    pub fn branch_stage(&self, stage: Stage, query: &str) {
        self.update(|p| {
            p.stage = stage;
            p.current_query = Some(query.to_string());
        });
    }

    pub fn branch_finished(&self, query: &str) {
        self.update(|p| {
            p.completed_queries += 1;
            p.current_query = Some(query.to_string());
        });
    }
}

// =============================================================================
// ONE LEVEL
// =============================================================================

/// Plan, fan out and aggregate one level; branches may recurse back in here.
///
/// `accumulator` is what the parent knew when this level started. The
/// result is that accumulator extended with every branch's findings.
pub(crate) fn research_level(
    ctx: Arc<ResearchContext>,
    request: ResearchRequest,
    accumulator: ResearchAccumulator,
    token: CancellationToken,
) -> BoxFuture<'static, Result<ResearchAccumulator, ResearchError>> {
    async move {
        let progress = LevelProgress::new(&ctx, &request);
        progress.stage(Stage::Initializing);

        // Planning
        progress.stage(Stage::Planning);
        let timeout = ctx.generation_timeout(request.detail_level);
        let queries = tokio::select! {
            _ = token.cancelled() => return Err(ResearchError::Cancelled),
            queries = planner::generate_queries(
                ctx.model.as_ref(),
                &request.topic,
                &accumulator.learnings,
                request.breadth,
                timeout,
            ) => queries,
        };
        progress.planned(queries.len());

        info!(
            depth = request.depth,
            breadth = request.breadth,
            queries = queries.len(),
            "Fanning out research branches"
        );

        // FanningOut. Dropping the JoinSet aborts whatever is still running.
        let semaphore = Arc::new(Semaphore::new(ctx.config.concurrency_limit.max(1)));
        let mut tasks = JoinSet::new();

        for (index, query) in queries.into_iter().enumerate() {
            let ctx = Arc::clone(&ctx);
            let sem = Arc::clone(&semaphore);
            let request = request.clone();
            let accumulator = accumulator.clone();
            let progress = progress.clone();
            let token = token.clone();

            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (index, ResearchAccumulator::default());
                };
                let result = branch::execute(ctx, query, accumulator, request, progress, token).await;
                (index, result)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(ResearchError::Cancelled),
                next = tasks.join_next() => next,
            };
            match next {
                Some(Ok(indexed)) => results.push(indexed),
                Some(Err(e)) => warn!(error = %e, "Branch task failed to join, treating as empty"),
                None => break,
            }
        }
        if token.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        // Aggregating, in planned order
        progress.stage(Stage::Aggregating);
        results.sort_by_key(|(index, _)| *index);
        let mut merged = accumulator;
        for (_, branch_result) in results {
            merged.merge(branch_result);
        }

        debug!(
            depth = request.depth,
            learnings = merged.learnings.len(),
            urls = merged.visited_urls.len(),
            "Level aggregated"
        );
        progress.stage(Stage::Done);
        Ok(merged)
    }
    .boxed()
}
