//! # Deep Research CLI
//!
//! Runs a recursive research session from the command line and prints a
//! cited markdown report (or a short answer).
//!
//! ## Quick Start
//! ```bash
//! export TAVILY_API_KEY=tvly-...
//! cargo run -- --breadth 3 --depth 2 "What limits solid-state battery adoption?"
//! ```

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deep_research::search::{DomainFilter, LlmMeshTranslator};
use deep_research::{
    Config, LanguageModel, Progress, PubMedSearch, ResearchError, ResearchRequest, Researcher, Restrictiveness,
    RigLanguageModel, TavilySearch,
};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "deep-research",
    version,
    about = "Recursive research agent: searches the web and PubMed, distills learnings, writes a cited report",
    long_about = r#"
Deep Research - recursive, cited research from the command line.

For the question you give it, it will:
  1. Plan several search queries (breadth)
  2. Search the web (Tavily) and optionally PubMed for each query
  3. Distill the results into learnings and follow-up questions
  4. Recurse into the follow-ups until the depth budget runs out
  5. Write a markdown report citing every source

PREREQUISITES:
  TAVILY_API_KEY must be set. The model provider is chosen with LLM_PROVIDER
  (ollama, openai, anthropic) and LLM_MODEL.

EXAMPLES:
  deep-research "How do mRNA vaccines trigger an immune response?"
  deep-research --breadth 2 --depth 1 --detail 3 --answer "Who won the 2022 Fields Medal?"
  deep-research --no-pubmed --include-domain rust-lang.org "Rust async cancellation"
"#
)]
struct Args {
    /// The research topic or question to investigate
    #[arg(value_name = "QUERY")]
    query: String,

    /// Queries explored per level
    #[arg(short = 'b', long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    breadth: u16,

    /// Recursion levels
    #[arg(short = 'd', long, default_value_t = 2)]
    depth: u16,

    /// Verbosity of learnings and report, 1 to 10
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    detail: u8,

    /// Model to use (overrides LLM_MODEL)
    #[arg(short = 'm', long, env = "LLM_MODEL")]
    model: Option<String>,

    /// Skip PubMed even when PUBMED_ENABLED is set
    #[arg(long)]
    no_pubmed: bool,

    /// How strictly PubMed queries are rewritten into MeSH terms
    #[arg(long, value_name = "broad|balanced|narrow")]
    restrictiveness: Option<Restrictiveness>,

    /// Only search these domains (repeatable)
    #[arg(long = "include-domain", value_name = "DOMAIN")]
    include_domains: Vec<String>,

    /// Never search these domains (repeatable)
    #[arg(long = "exclude-domain", value_name = "DOMAIN")]
    exclude_domains: Vec<String>,

    /// Print a short answer instead of a full report
    #[arg(long)]
    answer: bool,

    /// Ask clarifying questions before researching
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Also write the result to this file
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn to_request(&self, topic: String, pubmed_available: bool) -> ResearchRequest {
        let mut request = ResearchRequest::new(topic)
            .with_breadth(usize::from(self.breadth))
            .with_depth(usize::from(self.depth))
            .with_detail_level(self.detail)
            .with_biomedical(pubmed_available && !self.no_pubmed)
            .with_domains(DomainFilter {
                include: self.include_domains.clone(),
                exclude: self.exclude_domains.clone(),
            });
        if let Some(restrictiveness) = self.restrictiveness {
            request = request.with_restrictiveness(restrictiveness);
        }
        request
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration first, so a RUST_LOG in .env applies to logging
    let mut config = Config::from_env()?;
    init_logging(args.verbose, &config.log_level)?;

    if let Some(model) = &args.model {
        info!(model = %model, "Using model from command line");
        config.model = model.clone();
    }
    config.validate()?;

    let tavily_key = config
        .tavily_api_key
        .clone()
        .context("TAVILY_API_KEY is not set; web search is required")?;

    info!(
        provider = %config.provider,
        model = %config.model,
        concurrency = config.concurrency_limit,
        "Configuration loaded"
    );

    let model: Arc<dyn LanguageModel> = Arc::new(RigLanguageModel::new(&config));
    let web = Arc::new(TavilySearch::new(tavily_key));
    let mut researcher = Researcher::new(config.clone(), Arc::clone(&model), web);

    if config.pubmed_enabled && !args.no_pubmed {
        let translator = LlmMeshTranslator::new(Arc::clone(&model), config.generation_timeout);
        let pubmed = PubMedSearch::new()
            .with_api_key(config.ncbi_api_key.clone())
            .with_translator(Arc::new(translator));
        researcher = researcher.with_biomedical(Arc::new(pubmed));
    }

    let topic = if args.interactive {
        refine_topic(&researcher, &args.query).await?
    } else {
        args.query.clone()
    };

    // Ctrl-C cancels in-flight branches instead of waiting out their timeouts
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling research");
            signal_token.cancel();
        }
    });

    let request = args.to_request(topic.clone(), config.pubmed_enabled);
    let result = match researcher.start_research(request, log_progress, token).await {
        Ok(result) => result,
        Err(ResearchError::Cancelled) => {
            eprintln!("\nResearch cancelled.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        learnings = result.learnings.len(),
        sources = result.visited_urls.len() + result.biomedical_sources.len(),
        "Writing {}",
        if args.answer { "answer" } else { "report" }
    );

    let output = if args.answer {
        researcher.write_answer(&topic, &result.learnings, args.detail).await
    } else {
        researcher.write_report(&topic, &result, args.detail).await
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "Research failed");
            eprintln!("\nResearch failed: {}", e);
            if e.to_string().contains("connection refused") {
                eprintln!("\nTip: make sure the model provider is reachable (for Ollama: `ollama serve`).");
            }
            return Err(e.into());
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("{}", if args.answer { "ANSWER" } else { "RESEARCH REPORT" });
    println!("{}\n", "=".repeat(60));
    println!("{}", output);
    println!("\n{}", "=".repeat(60));

    if let Some(path) = &args.output {
        tokio::fs::write(path, &output)
            .await
            .with_context(|| format!("Failed to write output to {}", path.display()))?;
        info!(path = %path.display(), "Output written");
    }

    info!("Research completed successfully");
    Ok(())
}

// =============================================================================
// INTERACTIVE REFINEMENT
// =============================================================================
/// Ask the model's clarifying questions on stdin and fold the answers into the topic
async fn refine_topic(researcher: &Researcher, query: &str) -> Result<String> {
    let questions = researcher.generate_feedback(query, 3).await;
    if questions.is_empty() {
        return Ok(query.to_string());
    }

    println!("\nTo better understand your research needs, please answer these follow-up questions:");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut answers = Vec::with_capacity(questions.len());
    for question in &questions {
        println!("\n{}", question);
        let answer = lines
            .next_line()
            .await
            .context("Failed to read answer from stdin")?
            .unwrap_or_default();
        answers.push(answer.trim().to_string());
    }

    Ok(combine_feedback(query, &questions, &answers))
}

fn combine_feedback(query: &str, questions: &[String], answers: &[String]) -> String {
    let qa = questions
        .iter()
        .zip(answers)
        .map(|(q, a)| format!("Q: {}\nA: {}", q, a))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Initial Query: {}\nFollow-up Questions and Answers:\n{}", query, qa)
}

fn log_progress(progress: &Progress) {
    info!(
        stage = ?progress.stage,
        percent = progress.percent,
        depth = format!("{}/{}", progress.current_depth, progress.total_depth),
        queries = format!("{}/{}", progress.completed_queries, progress.total_queries),
        query = progress.current_query.as_deref().unwrap_or(""),
        "Progress"
    );
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
fn init_logging(verbose: bool, log_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
