//! Language-model service boundary
//!
//! The research pipeline only ever talks to a [`LanguageModel`]: one call
//! shape for schema-guided output and one for free text. The rig-backed
//! implementation lives in [`rig_model`]; tests plug in their own stubs.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::LlmError;

pub mod rig_model;

pub use rig_model::RigLanguageModel;

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Upper bound on the call's wall time
    pub timeout: Duration,
    /// Maximum tokens the model may produce
    pub max_tokens: u32,
    /// Optional system preamble
    pub system: Option<String>,
}

impl GenerationOptions {
    pub fn new(timeout: Duration, max_tokens: u32) -> Self {
        Self {
            timeout,
            max_tokens,
            system: None,
        }
    }

    /// Attach a system preamble
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Core language-model trait
///
/// Implementations must respect `options.timeout` and return
/// [`LlmError::MalformedOutput`] (with the raw reply) when a structured call
/// produced text that is not valid JSON, so that recovery can keep working
/// with what the model did say.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a JSON value conforming to `schema`
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerationOptions,
    ) -> Result<serde_json::Value, LlmError>;

    /// Generate free-form text
    async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError>;

    /// Model identifier for logging
    fn name(&self) -> &str;
}

/// Run a model future under a timeout, mapping expiry to [`LlmError::Timeout`]
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, LlmError>
where
    F: std::future::Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(timeout.as_secs())),
    }
}
