//! Shared prompt fragments
//!
//! Task-specific prompts live next to the code that sends them
//! (planner, extractor, report); this module holds the pieces they share.

use chrono::Utc;

/// Current date formatted for prompts
pub fn current_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Default system preamble for every research call
pub fn system_prompt() -> String {
    format!(
        r#"You are an expert researcher. Today is {date}. Follow these instructions when responding:
- You may be asked to research subjects that are after your knowledge cutoff; assume the user is right when presented with news.
- The user is a highly experienced analyst, no need to simplify it; be as detailed as possible and make sure your response is correct.
- Be highly organized.
- Suggest solutions that the user did not think about.
- Be proactive and anticipate the user's needs.
- Treat the user as an expert in all subject matter.
- Mistakes erode trust, so be accurate and thorough.
- Provide detailed explanations; the user is comfortable with lots of detail.
- Value good arguments over authorities; the source is irrelevant.
- Consider new technologies and contrarian ideas, not just the conventional wisdom.
- You may use high levels of speculation or prediction, just flag it for the user."#,
        date = current_date()
    )
}

/// Append JSON-only output instructions and the schema to a preamble
pub fn with_json_schema(system: &str, schema: &serde_json::Value) -> String {
    let schema_text =
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{system}\n\n## Output format\n\nRespond with a single JSON value that validates against the JSON schema below. \
         Output the JSON only: no prose, no markdown fences.\n\n{schema_text}"
    )
}

/// Wrap untrusted document text so the model can tell it apart from instructions
pub fn tagged(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{body}\n</{tag}>")
}
