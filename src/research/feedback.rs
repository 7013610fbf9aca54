//! Clarifying questions asked before research starts

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::llm::{GenerationOptions, LanguageModel};
use crate::prompts;
use crate::recovery::{self, strategies, Recoverable, RecoveryRequest};

const FEEDBACK_MAX_TOKENS: u32 = 1_000;

const GENERIC_QUESTIONS: [&str; 3] = [
    "What specific aspects of this topic matter most to you?",
    "Are you interested in a particular time period, region or population?",
    "What will the research be used for, and how deep should it go?",
];

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FeedbackQuestions {
    /// Follow-up questions that clarify the research direction
    pub questions: Vec<String>,
}

impl Recoverable for FeedbackQuestions {
    const TARGET: &'static str = "feedback questions";

    fn is_valid(&self) -> bool {
        !self.questions.is_empty() && self.questions.iter().all(|q| !q.trim().is_empty())
    }

    fn from_value(value: Value) -> Option<Self> {
        let parsed = match value {
            Value::Array(items) => Some(FeedbackQuestions {
                questions: items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            }),
            other => serde_json::from_value::<Self>(other).ok(),
        };
        parsed.filter(Self::is_valid)
    }

    /// List items, else any line that ends in a question mark
    fn from_text(text: &str) -> Option<Self> {
        let mut questions = strategies::list_items(text);
        if questions.is_empty() {
            questions = text
                .lines()
                .map(str::trim)
                .filter(|line| line.ends_with('?'))
                .map(str::to_string)
                .collect();
        }
        (!questions.is_empty()).then_some(FeedbackQuestions { questions })
    }
}

/// Up to `max_questions` clarifying questions for `topic`
pub async fn generate_feedback(
    model: &dyn LanguageModel,
    topic: &str,
    max_questions: usize,
    timeout: Duration,
) -> Vec<String> {
    if max_questions == 0 {
        return Vec::new();
    }

    let prompt = format!(
        "Given the following query from the user, ask some follow up questions to clarify the research direction. \
         Return a maximum of {max_questions} questions, but feel free to return less if the original query is clear.\n\n{}",
        prompts::tagged("query", topic.trim())
    );
    let options = GenerationOptions::new(timeout, FEEDBACK_MAX_TOKENS).with_system(prompts::system_prompt());
    let request = RecoveryRequest::new(&prompt, options)
        .with_text_prompt(format!("{}\n\nWrite each question as a numbered item.", prompt))
        .with_default(FeedbackQuestions {
            questions: GENERIC_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        });

    let questions: Vec<String> = match recovery::recover::<FeedbackQuestions>(model, request).await {
        Ok(recovered) => recovered.into_value().questions,
        Err(_) => GENERIC_QUESTIONS.iter().map(|q| q.to_string()).collect(),
    };

    let questions: Vec<String> = questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max_questions)
        .collect();
    info!(count = questions.len(), "Generated clarifying questions");
    questions
}
