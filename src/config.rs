//! # Configuration Module
//!
//! Loads the research agent's configuration from environment variables
//! (and a `.env` file when present). The resulting [`Config`] is passed
//! explicitly to every component that needs it; nothing reads the
//! environment after startup.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::search::Restrictiveness;

/// Upper bound for the base generation timeout
const MAX_GENERATION_TIMEOUT: Duration = Duration::from_secs(3_600);

// =============================================================================
// PROVIDER SELECTION
// =============================================================================
/// Which rig provider backs the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    /// Local models via Ollama
    #[default]
    Ollama,
    /// OpenAI (reads `OPENAI_API_KEY`)
    OpenAI,
    /// Anthropic (reads `ANTHROPIC_API_KEY`)
    Anthropic,
}

impl std::str::FromStr for LlmProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProviderKind::Ollama),
            "openai" => Ok(LlmProviderKind::OpenAI),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            other => anyhow::bail!("Unknown LLM provider: {}", other),
        }
    }
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderKind::Ollama => write!(f, "ollama"),
            LlmProviderKind::OpenAI => write!(f, "openai"),
            LlmProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the research agent.
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM provider backing generation
    pub provider: LlmProviderKind,

    /// Primary model name (e.g., "llama3.2", "gpt-4o")
    pub model: String,

    /// Models tried in order when the primary model call fails
    pub fallback_models: Vec<String>,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for LLM responses (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Tavily API key; web search is unavailable without it
    pub tavily_api_key: Option<String>,

    /// Maximum number of web results fetched per query
    pub max_search_results: usize,

    /// Maximum branches in flight at one traversal level
    pub concurrency_limit: usize,

    /// Timeout for a single search call
    pub search_timeout: Duration,

    /// Base timeout for a generation call, scaled up with detail level
    pub generation_timeout: Duration,

    /// Whether PubMed is searched alongside the web
    pub pubmed_enabled: bool,

    /// NCBI API key (raises the E-utilities rate limit)
    pub ncbi_api_key: Option<String>,

    /// Maximum PubMed records fetched per query
    pub pubmed_max_results: usize,

    /// Environment-level MeSH restrictiveness default.
    /// A restrictiveness set on the request always takes precedence.
    pub mesh_restrictiveness: Option<Restrictiveness>,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for Config {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Ollama,
            model: "llama3.2".to_string(),
            fallback_models: Vec::new(),
            ollama_host: "http://localhost:11434".to_string(),
            temperature: 0.7,
            tavily_api_key: None,
            max_search_results: 5,
            concurrency_limit: 2,
            search_timeout: Duration::from_secs(15),
            generation_timeout: Duration::from_secs(60),
            pubmed_enabled: true,
            ncbi_api_key: None,
            pubmed_max_results: 5,
            mesh_restrictiveness: None,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if it exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("LLM_PROVIDER") {
            config.provider = val.parse()?;
        }

        // LLM_MODEL wins over the older OLLAMA_MODEL name
        if let Ok(val) = env::var("LLM_MODEL").or_else(|_| env::var("OLLAMA_MODEL")) {
            config.model = val;
        }

        if let Ok(val) = env::var("LLM_FALLBACK_MODELS") {
            config.fallback_models = parse_list(&val);
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Ok(val) = env::var("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.7)")?;
        }

        config.tavily_api_key = env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(val) = env::var("MAX_SEARCH_RESULTS") {
            config.max_search_results = val
                .parse()
                .context("MAX_SEARCH_RESULTS must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("CONCURRENCY_LIMIT") {
            config.concurrency_limit = val
                .parse()
                .context("CONCURRENCY_LIMIT must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("SEARCH_TIMEOUT_SECS") {
            let secs: u64 = val
                .parse()
                .context("SEARCH_TIMEOUT_SECS must be a whole number of seconds")?;
            config.search_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = env::var("GENERATION_TIMEOUT_SECS") {
            let secs: u64 = val
                .parse()
                .context("GENERATION_TIMEOUT_SECS must be a whole number of seconds")?;
            config.generation_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = env::var("PUBMED_ENABLED") {
            config.pubmed_enabled = parse_bool(&val)
                .context("PUBMED_ENABLED must be true/false")?;
        }

        config.ncbi_api_key = env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(val) = env::var("PUBMED_MAX_RESULTS") {
            config.pubmed_max_results = val
                .parse()
                .context("PUBMED_MAX_RESULTS must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("MESH_RESTRICTIVENESS") {
            config.mesh_restrictiveness = Some(parse_restrictiveness(&val)?);
        }

        if let Ok(val) = env::var("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration before any research starts.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }

        if self.concurrency_limit == 0 {
            anyhow::bail!("CONCURRENCY_LIMIT must be at least 1");
        }

        if self.model.is_empty() {
            anyhow::bail!("LLM_MODEL cannot be empty");
        }

        if self.search_timeout.is_zero() || self.generation_timeout.is_zero() {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        if self.generation_timeout > MAX_GENERATION_TIMEOUT {
            anyhow::bail!(
                "GENERATION_TIMEOUT_SECS must be at most {}, got: {}",
                MAX_GENERATION_TIMEOUT.as_secs(),
                self.generation_timeout.as_secs()
            );
        }

        Ok(())
    }

    /// Primary model followed by the fallback chain, without duplicates
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain = vec![self.model.clone()];
        for model in &self.fallback_models {
            if !chain.contains(model) {
                chain.push(model.clone());
            }
        }
        chain
    }
}

/// Resolve the MeSH restrictiveness for one search.
///
/// Precedence: the request's own value, then the environment default,
/// then [`Restrictiveness::Balanced`].
pub fn resolve_restrictiveness(
    requested: Option<Restrictiveness>,
    env_default: Option<Restrictiveness>,
) -> Restrictiveness {
    requested.or(env_default).unwrap_or_default()
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_restrictiveness(val: &str) -> Result<Restrictiveness> {
    val.parse::<Restrictiveness>()
        .context("MESH_RESTRICTIVENESS must be broad, balanced or narrow")
}

fn parse_bool(val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}
