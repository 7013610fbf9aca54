//! Pure text-recovery strategies
//!
//! Each strategy looks at raw model text and either finds what it is
//! looking for or returns `None`. None of them call the model.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fenced-block regex")
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#{1,4}\s+(.+?)\s*#*\s*$").expect("valid heading regex")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d{1,3}[.)]|[-*•])\s+(.+?)\s*$").expect("valid list-item regex")
});

/// The whole text is one JSON value
pub fn strict_json(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Contents of the first fenced code block that parses as JSON
pub fn fenced_block(text: &str) -> Option<Value> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| serde_json::from_str(body.as_str().trim()).ok())
}

/// Unwrapped body of the first fenced block, parsed or not
pub fn fenced_text(text: &str) -> Option<String> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
        .filter(|body| !body.is_empty())
}

/// The widest `{...}` or `[...]` span embedded in surrounding prose
pub fn embedded_json(text: &str) -> Option<Value> {
    [('{', '}'), ('[', ']')].iter().find_map(|&(open, close)| {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    })
}

/// Items of a numbered or bulleted list, in order
pub fn list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_item(m.as_str()))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Values of every `Label: value` line, case-insensitive, list markers and bold allowed
pub fn labeled_values(text: &str, label: &str) -> Vec<String> {
    let pattern = format!(
        r"(?im)^\s*(?:\d{{1,3}}[.)]|[-*•])?\s*(?:\*\*|__)?{}(?:\*\*|__)?\s*:(?:\*\*|__)?\s*(.+?)\s*$",
        regex::escape(label)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_item(m.as_str()))
        .filter(|value| !value.is_empty())
        .collect()
}

/// `(heading, body)` pairs for every markdown heading, in order.
/// Text before the first heading is ignored.
pub fn markdown_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            let title = caps.get(1).map(|m| clean_item(m.as_str())).unwrap_or_default();
            sections.push((title, String::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    sections
        .into_iter()
        .map(|(title, body)| (title, body.trim().to_string()))
        .filter(|(title, _)| !title.is_empty())
        .collect()
}

/// Split text at the first line that mentions `marker` (case-insensitive).
/// Returns (before, after); `after` is empty when the marker never appears.
pub fn split_at_heading<'a>(text: &'a str, marker: &str) -> (&'a str, &'a str) {
    let marker = marker.to_lowercase();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.to_lowercase().contains(&marker) {
            return (&text[..offset], &text[offset + line.len()..]);
        }
        offset += line.len();
    }
    (text, "")
}

/// Strip wrapping fences, JSON string wrappers and escaped newlines
/// that models leave around prose
pub fn strip_formatting_artifacts(text: &str) -> String {
    let mut body = fenced_text(text)
        .filter(|inner| inner.len() * 2 >= text.trim().len())
        .unwrap_or_else(|| text.trim().to_string());

    if let Some(Value::Object(map)) = strict_json(&body) {
        if let Some(inner) = map.values().find_map(|v| v.as_str()) {
            body = inner.to_string();
        }
    } else if let Some(Value::String(inner)) = strict_json(&body) {
        body = inner;
    }

    if !body.contains('\n') && body.contains("\\n") {
        body = body.replace("\\n", "\n");
    }

    body.trim().to_string()
}

/// Trim list/emphasis decoration off a single item
fn clean_item(item: &str) -> String {
    item.trim()
        .trim_matches(|c| c == '*' || c == '_' || c == '"' || c == '`')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json() {
        assert_eq!(strict_json("  {\"a\": 1}\n"), Some(serde_json::json!({"a": 1})));
        assert_eq!(strict_json("Sure! {\"a\": 1}"), None);
    }

    #[test]
    fn test_fenced_block_with_language_tag() {
        let text = "Here is the result:\n```json\n{\"queries\": [\"a\"]}\n```\nHope it helps.";
        assert_eq!(fenced_block(text), Some(serde_json::json!({"queries": ["a"]})));
    }

    #[test]
    fn test_fenced_block_skips_unparseable_blocks() {
        let text = "```\nnot json\n```\nthen\n```\n[1, 2]\n```";
        assert_eq!(fenced_block(text), Some(serde_json::json!([1, 2])));
    }

    #[test]
    fn test_fenced_block_absent() {
        assert_eq!(fenced_block("{\"a\": 1}"), None);
    }

    #[test]
    fn test_embedded_json() {
        let text = "The answer is {\"a\": [1, 2]} as requested.";
        assert_eq!(embedded_json(text), Some(serde_json::json!({"a": [1, 2]})));

        let array = "Queries: [\"x\", \"y\"] done";
        assert_eq!(embedded_json(array), Some(serde_json::json!(["x", "y"])));

        assert_eq!(embedded_json("no json here"), None);
    }

    #[test]
    fn test_list_items() {
        let text = "Intro line\n1. First item\n2) **Second item**\n- third\n* fourth\nnot an item";
        assert_eq!(
            list_items(text),
            vec!["First item", "Second item", "third", "fourth"]
        );
    }

    #[test]
    fn test_labeled_values() {
        let text = "1. Query: rust async runtimes\n   Research goal: compare executors\n\
                    2. **Query**: tokio internals\n   **Research Goal:** scheduler design";
        assert_eq!(
            labeled_values(text, "query"),
            vec!["rust async runtimes", "tokio internals"]
        );
        assert_eq!(
            labeled_values(text, "research goal"),
            vec!["compare executors", "scheduler design"]
        );
    }

    #[test]
    fn test_markdown_sections() {
        let text = "preamble\n## First finding\nBody one.\n- point\n\n### **Second** ##\nBody two.\n";
        let sections = markdown_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], ("First finding".to_string(), "Body one.\n- point".to_string()));
        assert_eq!(sections[1], ("Second".to_string(), "Body two.".to_string()));
        assert!(markdown_sections("no headings").is_empty());
    }

    #[test]
    fn test_split_at_heading() {
        let text = "1. a\n2. b\n## Follow-up questions\n1. c\n";
        let (before, after) = split_at_heading(text, "follow-up");
        assert_eq!(before, "1. a\n2. b\n");
        assert_eq!(after, "1. c\n");

        let (before, after) = split_at_heading("only text", "follow-up");
        assert_eq!(before, "only text");
        assert_eq!(after, "");
    }

    #[test]
    fn test_strip_formatting_artifacts() {
        assert_eq!(
            strip_formatting_artifacts("```markdown\n# Title\n\nBody [web1]\n```"),
            "# Title\n\nBody [web1]"
        );
        assert_eq!(
            strip_formatting_artifacts("{\"reportMarkdown\": \"# T\\n\\nBody\"}"),
            "# T\n\nBody"
        );
        assert_eq!(strip_formatting_artifacts("# T\\n\\nBody"), "# T\n\nBody");
        assert_eq!(strip_formatting_artifacts("  plain  "), "plain");
    }
}
