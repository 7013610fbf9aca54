//! Branch executor: retrieve → extract → (optionally) recurse, for one query.
//!
//! Every failure inside a branch, whether from a search, the model or a
//! timeout, is logged and turned into an empty result so sibling branches
//! and the parent keep going.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extractor;
use super::orchestrator::{research_level, LevelProgress, ResearchContext};
use super::types::{BranchResult, PlannedQuery, ResearchAccumulator, ResearchRequest, Stage};
use crate::budget::Budget;
use crate::error::{BranchError, ResearchError, SearchError};
use crate::search::{BiomedicalSource, RetrievedDocument};

/// Run one branch to completion. Never fails; see the module docs.
pub(crate) async fn execute(
    ctx: Arc<ResearchContext>,
    query: PlannedQuery,
    accumulator: ResearchAccumulator,
    request: ResearchRequest,
    progress: LevelProgress,
    token: CancellationToken,
) -> ResearchAccumulator {
    let query_text = query.query.clone();

    let outcome = tokio::select! {
        _ = token.cancelled() => Err(BranchError::Cancelled),
        outcome = run(&ctx, query, accumulator, &request, &progress, &token) => outcome,
    };

    progress.branch_finished(&query_text);
    match outcome {
        Ok(result) => result,
        Err(BranchError::Cancelled) => {
            debug!(query = %query_text, "Branch cancelled");
            ResearchAccumulator::default()
        }
        Err(e) => {
            warn!(query = %query_text, error = %e, "Branch failed, contributing no results");
            ResearchAccumulator::default()
        }
    }
}

async fn run(
    ctx: &Arc<ResearchContext>,
    query: PlannedQuery,
    mut accumulator: ResearchAccumulator,
    request: &ResearchRequest,
    progress: &LevelProgress,
    token: &CancellationToken,
) -> Result<ResearchAccumulator, BranchError> {
    // Searching
    progress.branch_stage(Stage::Searching, &query.query);
    let (documents, biomedical_sources) = retrieve(ctx, &query.query, request).await?;

    // Extracting
    progress.branch_stage(Stage::Extracting, &query.query);
    let budget = Budget::new(request.detail_level, request.breadth);
    let extraction = extractor::extract_learnings(
        ctx.model.as_ref(),
        &query.query,
        &documents,
        &budget,
        ctx.generation_timeout(request.detail_level),
    )
    .await?;

    let own = BranchResult {
        learnings: extraction.learnings,
        visited_urls: documents
            .iter()
            .filter(|d| d.provenance == crate::search::Provenance::Web)
            .map(|d| d.url.clone())
            .collect(),
        biomedical_sources,
        follow_up_questions: extraction.follow_up_questions,
    };
    let next_topic = child_topic(&query.research_goal, &own.follow_up_questions);
    accumulator.absorb(own);

    if request.remaining_depth() == 0 {
        debug!(query = %query.query, "Reached maximum depth");
        return Ok(accumulator);
    }

    // Recursing
    progress.branch_stage(Stage::Recursing, &query.query);
    let child = request.child(next_topic);
    info!(
        query = %query.query,
        breadth = child.breadth,
        depth = child.depth,
        "Researching deeper"
    );

    research_level(Arc::clone(ctx), child, accumulator, token.clone())
        .await
        .map_err(|e| match e {
            ResearchError::Cancelled => BranchError::Cancelled,
            other => BranchError::Child(other.to_string()),
        })
}

/// Query both collaborators concurrently. Either one failing fails the branch.
async fn retrieve(
    ctx: &ResearchContext,
    query: &str,
    request: &ResearchRequest,
) -> Result<(Vec<RetrievedDocument>, Vec<BiomedicalSource>), BranchError> {
    let web_options = ctx.web_options(request);
    let web = async {
        tokio::time::timeout(web_options.timeout, ctx.web.search(query, &web_options))
            .await
            .map_err(|_| SearchError::Timeout)?
    };

    let biomedical = async {
        match (&ctx.biomedical, request.biomedical_enabled) {
            (Some(search), true) => {
                let options = ctx.biomedical_options(request);
                let result = tokio::time::timeout(options.timeout, search.search(query, &options))
                    .await
                    .map_err(|_| SearchError::Timeout)??;
                Ok::<_, SearchError>(result.sources)
            }
            _ => Ok(Vec::new()),
        }
    };

    let (pages, sources) = tokio::join!(web, biomedical);
    let (pages, sources) = (pages?, sources?);

    let mut seen = HashSet::new();
    let mut documents: Vec<RetrievedDocument> = pages
        .iter()
        .filter(|page| seen.insert(page.url.clone()))
        .map(RetrievedDocument::from_web)
        .collect();
    documents.extend(sources.iter().map(RetrievedDocument::from_biomedical));

    info!(
        query = %query,
        web = pages.len(),
        biomedical = sources.len(),
        "Retrieved documents"
    );
    Ok((documents, sources))
}

/// Topic for the next level: the goal plus where the follow-ups point
pub(crate) fn child_topic(research_goal: &str, follow_up_questions: &[String]) -> String {
    format!(
        "Previous research goal: {}\nFollow-up research directions:\n{}",
        research_goal.trim(),
        follow_up_questions.join("\n")
    )
}
