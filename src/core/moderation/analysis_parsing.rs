// Defensive parsing for loosely-typed external responses.
//
// External services are treated as untrusted: anything that does not parse
// yields an explicit fallback value rather than an error.

use super::moderation_models::{Issue, IssueField, Severity};
use serde_json::Value;

/// Relevance score used whenever semantic analysis is unavailable.
pub const FALLBACK_RELEVANCE_SCORE: u32 = 70;

/// Most suggested tags surfaced from the model.
pub const MAX_SUGGESTED_TAGS: usize = 5;

/// Result of a parse-or-fallback step.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Fallback(T),
}

impl<T> ParseOutcome<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            ParseOutcome::Parsed(value) | ParseOutcome::Fallback(value) => value,
        }
    }
}

/// Semantic findings extracted from the text-analysis model.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticAnalysis {
    pub relevance_score: u32,
    pub suggested_tags: Vec<String>,
    pub issues: Vec<Issue>,
    pub summary: Option<String>,
}

impl SemanticAnalysis {
    pub fn fallback() -> Self {
        Self {
            relevance_score: FALLBACK_RELEVANCE_SCORE,
            suggested_tags: Vec::new(),
            issues: Vec::new(),
            summary: None,
        }
    }
}

/// Locate the JSON object embedded in free-form model output.
///
/// Tries the widest span first (first `{` to last `}`), then the first
/// balanced brace-delimited block.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some(value);
        }
    }

    let block = first_balanced_block(&text[start..])?;
    match serde_json::from_str::<Value>(block) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Shortest prefix of `text` (which starts with `{`) whose braces balance.
/// Braces inside JSON string literals are ignored.
fn first_balanced_block(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the model's reply into semantic findings, or fall back.
pub fn parse_semantic_analysis(text: &str) -> ParseOutcome<SemanticAnalysis> {
    let Some(value) = extract_json_block(text) else {
        return ParseOutcome::Fallback(SemanticAnalysis::fallback());
    };

    let relevance_score = value
        .get("relevanceScore")
        .and_then(Value::as_f64)
        .map(|score| score.round().clamp(0.0, 100.0) as u32)
        .unwrap_or(FALLBACK_RELEVANCE_SCORE);

    let suggested_tags = value
        .get("suggestedTags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .take(MAX_SUGGESTED_TAGS)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|issues| issues.iter().filter_map(parse_semantic_issue).collect())
        .unwrap_or_default();

    let summary = value
        .get("analysis")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    ParseOutcome::Parsed(SemanticAnalysis {
        relevance_score,
        suggested_tags,
        issues,
        summary,
    })
}

fn parse_semantic_issue(value: &Value) -> Option<Issue> {
    let description = value.get("description")?.as_str()?.trim();
    if description.is_empty() {
        return None;
    }

    let severity = Severity::parse_lenient(value.get("severity").and_then(Value::as_str));
    let field = IssueField::parse_lenient(value.get("field").and_then(Value::as_str));
    Some(Issue::content(severity, field, description))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_json_surrounded_by_prose() {
        let text = "Here is the analysis:\n```json\n{\"relevanceScore\": 85}\n```\nThanks!";
        let value = extract_json_block(text).unwrap();
        assert_eq!(value["relevanceScore"], 85);
    }

    #[test]
    fn test_falls_back_to_first_balanced_block() {
        // The wide span is invalid because of the trailing brace in prose
        let text = r#"{"relevanceScore": 40, "analysis": "ok {fine}"} and then } stray"#;
        let value = extract_json_block(text).unwrap();
        assert_eq!(value["relevanceScore"], 40);
        assert_eq!(value["analysis"], "ok {fine}");
    }

    #[test]
    fn test_no_block_yields_none() {
        assert!(extract_json_block("no json here").is_none());
        assert!(extract_json_block("} backwards {").is_none());
        assert!(extract_json_block("{ broken").is_none());
    }

    #[test]
    fn test_parse_full_reply() {
        let reply = r#"
        {
          "relevanceScore": 92.4,
          "suggestedTags": ["áo", " thời trang ", "", "nam", "cotton", "mùa hè", "thừa"],
          "issues": [
            {"severity": "medium", "description": "Mô tả không khớp", "field": "description"},
            {"severity": "weird", "description": "Something odd"},
            {"severity": "high"}
          ],
          "analysis": "Sản phẩm phù hợp"
        }"#;

        let outcome = parse_semantic_analysis(reply);
        assert!(!outcome.is_fallback());
        let analysis = outcome.into_inner();

        assert_eq!(analysis.relevance_score, 92);
        assert_eq!(analysis.suggested_tags.len(), MAX_SUGGESTED_TAGS);
        assert_eq!(analysis.suggested_tags[1], "thời trang");
        assert_eq!(analysis.issues.len(), 2);
        assert_eq!(analysis.issues[0].severity, Severity::Medium);
        assert_eq!(analysis.issues[0].field, Some(IssueField::Description));
        assert_eq!(analysis.issues[1].severity, Severity::Low);
        assert_eq!(analysis.issues[1].field, Some(IssueField::Content));
        assert_eq!(analysis.summary.as_deref(), Some("Sản phẩm phù hợp"));
    }

    #[test]
    fn test_missing_score_uses_fallback_value() {
        let analysis = parse_semantic_analysis(r#"{"relevanceScore": "high"}"#).into_inner();
        assert_eq!(analysis.relevance_score, FALLBACK_RELEVANCE_SCORE);

        let clamped = parse_semantic_analysis(r#"{"relevanceScore": 250}"#).into_inner();
        assert_eq!(clamped.relevance_score, 100);
    }

    #[test]
    fn test_unparseable_reply_is_fallback() {
        let outcome = parse_semantic_analysis("I cannot help with that.");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_inner(), SemanticAnalysis::fallback());
    }
}
