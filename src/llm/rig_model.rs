//! Rig-backed [`LanguageModel`]
//!
//! Builds a one-shot Rig agent per call (preamble, temperature, token
//! ceiling) and walks the configured model chain until one call succeeds.

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::{anthropic, ollama, openai};
use tracing::{debug, warn};

use super::{with_timeout, GenerationOptions, LanguageModel};
use crate::config::{Config, LlmProviderKind};
use crate::error::LlmError;
use crate::prompts;

/// Concrete Rig client per provider
enum Backend {
    Ollama(ollama::Client),
    OpenAI(openai::Client),
    Anthropic(anthropic::Client),
}

/// Language model driven through Rig providers
pub struct RigLanguageModel {
    backend: Backend,
    models: Vec<String>,
    temperature: f64,
    label: String,
}

impl RigLanguageModel {
    /// Build the provider client from the configuration.
    ///
    /// Provider credentials are read by Rig from the environment
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OLLAMA_API_BASE_URL`).
    pub fn new(config: &Config) -> Self {
        let backend = match config.provider {
            LlmProviderKind::Ollama => {
                std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
                Backend::Ollama(ollama::Client::from_env())
            }
            LlmProviderKind::OpenAI => Backend::OpenAI(openai::Client::from_env()),
            LlmProviderKind::Anthropic => Backend::Anthropic(anthropic::Client::from_env()),
        };

        debug!(
            provider = %config.provider,
            model = %config.model,
            fallbacks = config.fallback_models.len(),
            "Language model configured"
        );

        Self {
            backend,
            models: config.model_chain(),
            temperature: f64::from(config.temperature),
            label: format!("{}/{}", config.provider, config.model),
        }
    }

    /// One prompt against one model
    async fn prompt_once(
        &self,
        model: &str,
        preamble: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let max_tokens = u64::from(max_tokens);
        let result = match &self.backend {
            Backend::Ollama(client) => {
                client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
            Backend::OpenAI(client) => {
                client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
            Backend::Anthropic(client) => {
                client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
        };

        result.map_err(|e| LlmError::Provider(e.to_string()))
    }

    /// Try each model in the chain, each attempt bounded by the call timeout
    async fn prompt_chain(
        &self,
        preamble: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let mut last_error = LlmError::Provider("no model configured".to_string());

        for model in &self.models {
            match with_timeout(
                options.timeout,
                self.prompt_once(model, preamble, prompt, options.max_tokens),
            )
            .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(model = %model, error = %e, "Model call failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl LanguageModel for RigLanguageModel {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerationOptions,
    ) -> Result<serde_json::Value, LlmError> {
        let system = options.system.clone().unwrap_or_else(prompts::system_prompt);
        let preamble = prompts::with_json_schema(&system, schema);

        let raw = self.prompt_chain(&preamble, prompt, options).await?;
        serde_json::from_str(raw.trim()).map_err(|_| LlmError::MalformedOutput { raw })
    }

    async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let system = options.system.clone().unwrap_or_else(prompts::system_prompt);
        self.prompt_chain(&system, prompt, options).await
    }

    fn name(&self) -> &str {
        &self.label
    }
}
