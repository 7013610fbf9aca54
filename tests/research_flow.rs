//! Integration tests for the research traversal
//!
//! These tests drive `Researcher` end to end with in-process stubs for the
//! model and search collaborators:
//! - breadth/depth fan-out and child breadth
//! - branch failure isolation and the concurrency cap
//! - cancellation
//! - report citations and references

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use deep_research::report::citation_coverage;
use deep_research::search::{
    BiomedicalSearchOptions, BiomedicalSearchResult, BiomedicalSource, WebPage, WebSearchOptions,
};
use deep_research::{
    BiomedicalSearch, Config, GenerationOptions, LanguageModel, Learning, LlmError, Progress,
    ResearchAccumulator, ResearchError, ResearchRequest, Researcher, SearchError, Stage, WebSearch,
};

// =============================================================================
// STUBS
// =============================================================================

/// Answers planning, extraction and report prompts with canned JSON
#[derive(Default)]
struct RoutingModel {
    plan_calls: AtomicUsize,
    learning_counter: AtomicUsize,
    /// The "maximum of N queries" value of every planning prompt, in call order
    plan_limits: Mutex<Vec<usize>>,
    report_markdown: Option<String>,
    /// Extraction calls time out instead of answering
    extraction_down: bool,
}

impl RoutingModel {
    fn with_report(markdown: &str) -> Self {
        Self {
            report_markdown: Some(markdown.to_string()),
            ..Self::default()
        }
    }

    fn plan(&self, prompt: &str) -> Value {
        let round = self.plan_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = requested_limit(prompt);
        self.plan_limits.lock().unwrap().push(limit);

        let queries: Vec<Value> = (0..limit)
            .map(|i| {
                json!({
                    "query": format!("aspect {} of round {}", i, round),
                    "research_goal": format!("Understand aspect {}", i),
                })
            })
            .collect();
        json!({ "queries": queries })
    }

    fn extract(&self) -> Value {
        let n = self.learning_counter.fetch_add(1, Ordering::SeqCst) + 1;
        json!({
            "learnings": [format!("Learning number {}", n)],
            "follow_up_questions": [format!("What follows from learning {}?", n)],
        })
    }
}

fn requested_limit(prompt: &str) -> usize {
    prompt
        .split("maximum of ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

#[async_trait]
impl LanguageModel for RoutingModel {
    async fn generate_structured(
        &self,
        prompt: &str,
        _schema: &Value,
        _options: &GenerationOptions,
    ) -> Result<Value, LlmError> {
        if prompt.contains("write a final report") {
            return match &self.report_markdown {
                Some(markdown) => Ok(json!({ "report_markdown": markdown })),
                None => Err(LlmError::Provider("no report scripted".to_string())),
            };
        }
        if prompt.contains("extract learnings") {
            if self.extraction_down {
                return Err(LlmError::Timeout(1));
            }
            return Ok(self.extract());
        }
        if prompt.contains("search engine queries") {
            return Ok(self.plan(prompt));
        }
        Err(LlmError::Provider("unexpected prompt".to_string()))
    }

    async fn generate_text(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String, LlmError> {
        Err(LlmError::Provider("text generation not scripted".to_string()))
    }

    fn name(&self) -> &str {
        "routing-stub"
    }
}

/// Two pages per query, one of them shared by every query; fails for queries containing `fail_on`
#[derive(Default)]
struct StubWeb {
    fail_on: Option<&'static str>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[async_trait]
impl WebSearch for StubWeb {
    async fn search(&self, query: &str, _options: &WebSearchOptions) -> Result<Vec<WebPage>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_on.is_some_and(|needle| query.contains(needle)) {
            return Err(SearchError::ServerError(503, "unavailable".to_string()));
        }
        Ok(vec![
            WebPage {
                url: page_url(query),
                content: format!("Everything about {}.", query),
            },
            WebPage {
                url: OVERVIEW_URL.to_string(),
                content: "A general overview.".to_string(),
            },
        ])
    }
}

const OVERVIEW_URL: &str = "https://example.com/overview";

fn page_url(query: &str) -> String {
    format!("https://example.com/{}", query.replace(' ', "-"))
}

/// Returns the same record for every query
struct StubPubMed;

#[async_trait]
impl BiomedicalSearch for StubPubMed {
    async fn search(
        &self,
        _query: &str,
        _options: &BiomedicalSearchOptions,
    ) -> Result<BiomedicalSearchResult, SearchError> {
        Ok(BiomedicalSearchResult {
            sources: vec![BiomedicalSource {
                id: "31415".to_string(),
                title: "A trial of things".to_string(),
                abstract_text: Some("Things helped.".to_string()),
                authors: vec!["Doe J".to_string()],
                journal: Some("BMJ".to_string()),
                date: Some("2023".to_string()),
                doi: None,
                url: "https://pubmed.ncbi.nlm.nih.gov/31415/".to_string(),
            }],
            total_count: 1,
        })
    }
}

fn researcher(model: Arc<RoutingModel>, web: Arc<StubWeb>) -> Researcher {
    researcher_with_limit(model, web, 4)
}

fn researcher_with_limit(model: Arc<RoutingModel>, web: Arc<StubWeb>, concurrency_limit: usize) -> Researcher {
    let config = Config {
        concurrency_limit,
        ..Config::default()
    };
    Researcher::new(config, model, web)
}

fn ignore_progress(_: &Progress) {}

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Depth 1 plans once and never recurses
#[tokio::test]
async fn test_single_level_fans_out_to_breadth() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let request = ResearchRequest::new("solid-state batteries").with_breadth(4).with_depth(1);

    let result = researcher(Arc::clone(&model), Arc::clone(&web))
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(model.plan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(web.calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.learnings.len(), 4);
    // Four distinct pages plus the shared overview, once
    assert_eq!(result.visited_urls.len(), 5);

    // Aggregation keeps planned order
    assert_eq!(result.visited_urls[0], page_url("aspect 0 of round 1"));
    assert_eq!(result.visited_urls[1], OVERVIEW_URL);
    assert_eq!(result.visited_urls[4], page_url("aspect 3 of round 1"));
}

/// Each top-level branch opens a child level with three-quarters the breadth
#[tokio::test]
async fn test_two_levels_narrow_child_breadth() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let request = ResearchRequest::new("solid-state batteries").with_breadth(4).with_depth(2);

    let result = researcher(Arc::clone(&model), Arc::clone(&web))
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    let limits = model.plan_limits.lock().unwrap().clone();
    assert_eq!(limits.len(), 5);
    assert_eq!(limits[0], 4);
    assert!(limits[1..].iter().all(|&limit| limit == 3));

    // 4 top-level branches plus 4 × 3 children, one learning and one distinct page each
    assert_eq!(web.calls.load(Ordering::SeqCst), 16);
    assert_eq!(result.learnings.len(), 16);
    assert_eq!(result.visited_urls.len(), 17);
}

#[tokio::test]
async fn test_failed_branch_keeps_siblings() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb {
        fail_on: Some("aspect 2 "),
        ..StubWeb::default()
    });
    let request = ResearchRequest::new("solid-state batteries").with_breadth(4).with_depth(1);

    let result = researcher(model, web)
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.learnings.len(), 3);
    assert_eq!(result.visited_urls.len(), 4);
    assert!(!result.visited_urls.contains(&page_url("aspect 2 of round 1")));
}

/// A branch whose model never answers contributes nothing and does not recurse
#[tokio::test]
async fn test_unreachable_model_empties_the_branch() {
    let model = Arc::new(RoutingModel {
        extraction_down: true,
        ..RoutingModel::default()
    });
    let web = Arc::new(StubWeb::default());
    let request = ResearchRequest::new("solid-state batteries").with_breadth(2).with_depth(2);

    let result = researcher(Arc::clone(&model), Arc::clone(&web))
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.learnings.is_empty());
    assert!(result.visited_urls.is_empty());
    assert_eq!(web.calls.load(Ordering::SeqCst), 2);
    assert_eq!(model.plan_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_branches_respect_concurrency_limit() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb {
        delay: Some(Duration::from_millis(30)),
        ..StubWeb::default()
    });
    let request = ResearchRequest::new("solid-state batteries").with_breadth(6).with_depth(1);

    let result = researcher_with_limit(model, Arc::clone(&web), 2)
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(web.calls.load(Ordering::SeqCst), 6);
    let peak = web.peak_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak of {} concurrent searches", peak);
    assert!(peak >= 1);
    assert_eq!(result.learnings.len(), 6);
}

#[tokio::test]
async fn test_biomedical_sources_are_deduplicated() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let request = ResearchRequest::new("statin therapy").with_breadth(3).with_depth(1);

    let result = researcher(model, web)
        .with_biomedical(Arc::new(StubPubMed))
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.biomedical_sources.len(), 1);
    assert_eq!(result.biomedical_sources[0].source_id(), "PMID:31415");
    // Biomedical records are not web visits
    assert_eq!(result.visited_urls.len(), 4);
}

#[tokio::test]
async fn test_biomedical_disabled_per_request() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let request = ResearchRequest::new("statin therapy")
        .with_breadth(2)
        .with_depth(1)
        .with_biomedical(false);

    let result = researcher(model, web)
        .with_biomedical(Arc::new(StubPubMed))
        .start_research(request, ignore_progress, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.biomedical_sources.is_empty());
    assert_eq!(result.learnings.len(), 2);
}

#[tokio::test]
async fn test_progress_reaches_done() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let events: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let request = ResearchRequest::new("solid-state batteries").with_breadth(2).with_depth(1);

    researcher(model, web)
        .start_research(
            request,
            move |progress: &Progress| sink.lock().unwrap().push(progress.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events.iter().any(|p| p.stage == Stage::Planning));
    assert!(events.iter().any(|p| p.stage == Stage::Extracting));

    let last = events.last().unwrap();
    assert_eq!(last.stage, Stage::Done);
    assert_eq!(last.completed_queries, 2);
    assert_eq!(last.total_queries, 2);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb {
        delay: Some(Duration::from_secs(10)),
        ..StubWeb::default()
    });
    let request = ResearchRequest::new("solid-state batteries").with_breadth(3).with_depth(2);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = researcher(model, web)
        .start_research(request, ignore_progress, token)
        .await;

    assert!(matches!(result, Err(ResearchError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());
    let researcher = researcher(Arc::clone(&model), web);

    let no_breadth = ResearchRequest::new("topic").with_breadth(0);
    let result = researcher
        .start_research(no_breadth, ignore_progress, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ResearchError::InvalidRequest(_))));

    let blank = ResearchRequest::new("   ");
    let result = researcher
        .start_research(blank, ignore_progress, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ResearchError::InvalidRequest(_))));

    assert_eq!(model.plan_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// REPORT
// =============================================================================

#[tokio::test]
async fn test_report_cites_only_known_sources() {
    let markdown = "# Batteries\n\n\
                    ## Summary\n\n\
                    Solid electrolytes resist dendrites [web1].\n\n\
                    ## Findings\n\n\
                    Costs remain high [web2, web7].\n\n\
                    Manufacturing is scaling slowly [web1][web2].\n\n\
                    ## References\n\n\
                    [web1] made up by the model";
    let model = Arc::new(RoutingModel::with_report(markdown));
    let web = Arc::new(StubWeb::default());

    let accumulator = ResearchAccumulator {
        learnings: vec![
            Learning::Simple("Dendrites are suppressed".to_string()),
            Learning::Simple("Costs are high".to_string()),
            Learning::Simple("Scaling is slow".to_string()),
        ],
        visited_urls: vec![
            "https://a.example/one".to_string(),
            "https://b.example/two".to_string(),
        ],
        biomedical_sources: Vec::new(),
    };

    let report = researcher(model, web)
        .write_report("State of solid-state batteries", &accumulator, 5)
        .await
        .unwrap();

    let (body, references) = report.split_once("## References").unwrap();
    assert!(!body.contains("made up by the model"));
    assert!(!body.contains("web7"));
    assert!(citation_coverage(body).is_complete());

    assert!(references.contains("[web1] https://a.example/one"));
    assert!(references.contains("[web2] https://b.example/two"));
    assert_eq!(references.matches("[web").count(), 2);
    assert!(!references.contains("[bio"));
}

#[tokio::test]
async fn test_report_failure_is_an_error() {
    let model = Arc::new(RoutingModel::default());
    let web = Arc::new(StubWeb::default());

    let result = researcher(model, web)
        .write_report("anything", &ResearchAccumulator::default(), 5)
        .await;

    assert!(matches!(result, Err(ResearchError::Report(_))));
}
