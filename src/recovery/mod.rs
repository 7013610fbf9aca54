//! Structured-response recovery
//!
//! The model's structured-output guarantee is probabilistic, so every
//! structured call goes through a descending chain of tiers:
//!
//! ```text
//! 1. SchemaGuided    generate_structured → validate
//! 2. FencedBlock     JSON inside a ``` block of the tier-1 reply
//! 3. Heuristic       generate_text → strict/fenced/embedded JSON → list & label parsing
//! 4. StaticFallback  caller-supplied default (or RecoveryError when there is none)
//! ```
//!
//! Types opt in by implementing [`Recoverable`], which supplies the schema
//! (through `schemars`), extra validation and the free-text heuristics.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{LlmError, RecoveryError};
use crate::llm::{GenerationOptions, LanguageModel};

pub mod strategies;

/// A type that can be recovered from unreliable model output
pub trait Recoverable: DeserializeOwned + JsonSchema + Send + Sized {
    /// Short name used in logs and errors
    const TARGET: &'static str;

    /// Checks the schema cannot express (e.g. non-empty lists)
    fn is_valid(&self) -> bool {
        true
    }

    /// Decode a parsed JSON value. Override to accept looser shapes.
    fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value::<Self>(value)
            .ok()
            .filter(Self::is_valid)
    }

    /// Reconstruct the value from free-form text
    fn from_text(text: &str) -> Option<Self>;
}

/// Which tier produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryTier {
    SchemaGuided,
    FencedBlock,
    Heuristic,
    StaticFallback,
}

/// A recovered value and the tier that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub tier: RecoveryTier,
}

impl<T> Recovered<T> {
    fn new(value: T, tier: RecoveryTier) -> Self {
        Self { value, tier }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// One structured call to recover
pub struct RecoveryRequest<'a, T> {
    /// Prompt for schema-guided generation
    pub prompt: &'a str,
    /// Prompt for the free-form fallback; defaults to `prompt`
    pub text_prompt: Option<String>,
    pub options: GenerationOptions,
    /// Tier-4 value; `None` makes exhaustion an error
    pub default: Option<T>,
}

impl<'a, T> RecoveryRequest<'a, T> {
    pub fn new(prompt: &'a str, options: GenerationOptions) -> Self {
        Self {
            prompt,
            text_prompt: None,
            options,
            default: None,
        }
    }

    pub fn with_text_prompt(mut self, text_prompt: impl Into<String>) -> Self {
        self.text_prompt = Some(text_prompt.into());
        self
    }

    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(default);
        self
    }
}

/// JSON schema for a recoverable type
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// Run the recovery chain for one structured call
pub async fn recover<T: Recoverable>(
    model: &dyn LanguageModel,
    request: RecoveryRequest<'_, T>,
) -> Result<Recovered<T>, RecoveryError> {
    let RecoveryRequest {
        prompt,
        text_prompt,
        options,
        default,
    } = request;
    let schema = schema_of::<T>();
    let last_error: String;
    // Set only while every call so far failed before producing any text
    let mut unavailable: Option<LlmError> = None;

    // Tier 1: schema-guided generation
    let raw = match model.generate_structured(prompt, &schema, &options).await {
        Ok(value) => {
            if let Some(parsed) = T::from_value(value.clone()) {
                debug!(target_type = T::TARGET, "Recovered at schema-guided tier");
                return Ok(Recovered::new(parsed, RecoveryTier::SchemaGuided));
            }
            Some(value_as_text(value))
        }
        Err(e) => {
            let raw = e.raw_output().map(str::to_string);
            if raw.is_none() {
                unavailable = Some(e);
            }
            raw
        }
    };

    // Tier 2: fenced block inside the tier-1 reply
    if let Some(parsed) = raw
        .as_deref()
        .and_then(strategies::fenced_block)
        .and_then(T::from_value)
    {
        info!(target_type = T::TARGET, "Recovered from fenced block");
        return Ok(Recovered::new(parsed, RecoveryTier::FencedBlock));
    }

    // Tier 3: free-form generation plus heuristics
    let text_prompt = text_prompt.as_deref().unwrap_or(prompt);
    match model.generate_text(text_prompt, &options).await {
        Ok(text) => {
            if let Some(recovered) = parse_free_text::<T>(&text) {
                info!(
                    target_type = T::TARGET,
                    tier = ?recovered.tier,
                    "Recovered from free-form text"
                );
                return Ok(recovered);
            }
            unavailable = None;
            last_error = "free-form output had no recognizable structure".to_string();
        }
        Err(e) => {
            last_error = e.to_string();
            if e.raw_output().is_some() {
                unavailable = None;
            } else if unavailable.is_some() {
                unavailable = Some(e);
            }
        }
    }

    // Tier 4: static fallback
    match (default, unavailable) {
        (Some(value), _) => {
            warn!(
                target_type = T::TARGET,
                error = %last_error,
                "All parsing tiers failed, using static fallback"
            );
            Ok(Recovered::new(value, RecoveryTier::StaticFallback))
        }
        (None, Some(e)) => Err(RecoveryError::Unavailable {
            target: T::TARGET.to_string(),
            source: e,
        }),
        (None, None) => Err(RecoveryError::Exhausted {
            target: T::TARGET.to_string(),
            last_error,
        }),
    }
}

/// Text-only part of the chain, ordered from most to least structured
pub fn parse_free_text<T: Recoverable>(text: &str) -> Option<Recovered<T>> {
    if let Some(parsed) = strategies::strict_json(text).and_then(T::from_value) {
        return Some(Recovered::new(parsed, RecoveryTier::Heuristic));
    }
    if let Some(parsed) = strategies::fenced_block(text).and_then(T::from_value) {
        return Some(Recovered::new(parsed, RecoveryTier::FencedBlock));
    }
    if let Some(parsed) = strategies::embedded_json(text).and_then(T::from_value) {
        return Some(Recovered::new(parsed, RecoveryTier::Heuristic));
    }
    T::from_text(text)
        .filter(T::is_valid)
        .map(|parsed| Recovered::new(parsed, RecoveryTier::Heuristic))
}

fn value_as_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
