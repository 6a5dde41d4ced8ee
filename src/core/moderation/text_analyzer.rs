// Text analyzer - rule checks plus an optional semantic pass over listing text.
//
// The semantic call is enrichment only: timeouts, provider errors and
// unparseable replies all degrade to fixed defaults.

use super::analysis_parsing::{parse_semantic_analysis, ParseOutcome, SemanticAnalysis};
use super::moderation_config::PolicyLists;
use super::moderation_models::{Issue, IssueField, Severity, TextAnalysis};
use super::rule_matcher::RuleMatcher;
use super::scoring::clamp_score;
use crate::core::ai::{AiConfig, AiMessage, AiProvider};
use std::sync::Arc;
use std::time::Duration;

/// Prices above this are suspicious regardless of currency unit.
const MAX_REASONABLE_PRICE: f64 = 100_000_000.0;
const MIN_TITLE_CHARS: usize = 5;
const MIN_DESCRIPTION_CHARS: usize = 20;
/// Products with fewer tags than this get model-suggested tags.
const SUGGEST_TAGS_BELOW: usize = 3;

const SYSTEM_PROMPT: &str = "You are a content moderator for an online student marketplace. \
Evaluate product listings for relevance and policy violations. \
Always answer with a single JSON object and nothing else.";

/// Listing text handed to the analyzer.
#[derive(Debug, Clone, Copy)]
pub struct ListingText<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub tags: &'a [String],
    pub price: f64,
}

pub struct TextAnalyzer<P: AiProvider> {
    provider: P,
    ai_config: AiConfig,
    policy: Arc<PolicyLists>,
    timeout: Duration,
}

impl<P: AiProvider> TextAnalyzer<P> {
    pub fn new(provider: P, ai_config: AiConfig, policy: Arc<PolicyLists>, timeout: Duration) -> Self {
        Self {
            provider,
            ai_config,
            policy,
            timeout,
        }
    }

    pub async fn analyze(&self, listing: ListingText<'_>) -> TextAnalysis {
        let mut issues = self.rule_issues(&listing);
        let category_banned = RuleMatcher::new(&self.policy)
            .banned_category(listing.category)
            .is_some();

        let outcome = self.semantic_analysis(&listing).await;
        let used_fallback = outcome.is_fallback();
        let semantic = outcome.into_inner();

        let suggested_tags = if listing.tags.len() < SUGGEST_TAGS_BELOW {
            semantic.suggested_tags
        } else {
            Vec::new()
        };
        issues.extend(semantic.issues);

        let score = content_score(semantic.relevance_score, &listing, &issues);

        TextAnalysis {
            score,
            issues,
            suggested_tags,
            relevance_score: semantic.relevance_score,
            category_banned,
            used_fallback,
            semantic_summary: semantic.summary,
        }
    }

    /// Deterministic checks: deny-lists, price bounds, length heuristics.
    fn rule_issues(&self, listing: &ListingText<'_>) -> Vec<Issue> {
        let matcher = RuleMatcher::new(&self.policy);
        let blob = RuleMatcher::text_blob(listing.title, listing.description, listing.tags);
        let matches = matcher.check(&blob, listing.category);

        let mut issues = Vec::new();

        for keyword in &matches.keywords {
            issues.push(Issue::content(
                Severity::High,
                keyword_field(keyword, listing),
                format!("Content contains banned keyword: {}", keyword),
            ));
        }

        if matches.banned_category.is_some() {
            issues.push(Issue::content(
                Severity::High,
                IssueField::Category,
                format!("Product category is not allowed: {}", listing.category),
            ));
        }

        let price = listing.price;
        if !price.is_finite() || price <= 0.0 {
            issues.push(Issue::content(
                Severity::Medium,
                IssueField::Price,
                format!("Invalid price: {}", price),
            ));
        } else if price > MAX_REASONABLE_PRICE {
            issues.push(Issue::content(
                Severity::Medium,
                IssueField::Price,
                format!("Price seems too high: {}", price),
            ));
        }

        if listing.title.chars().count() < MIN_TITLE_CHARS {
            issues.push(Issue::content(
                Severity::Low,
                IssueField::Title,
                "Title is too short",
            ));
        }

        if listing.description.chars().count() < MIN_DESCRIPTION_CHARS {
            issues.push(Issue::content(
                Severity::Low,
                IssueField::Description,
                "Description is too short",
            ));
        }

        issues
    }

    async fn semantic_analysis(&self, listing: &ListingText<'_>) -> ParseOutcome<SemanticAnalysis> {
        let messages = vec![
            AiMessage::system(SYSTEM_PROMPT),
            AiMessage::user(build_prompt(listing)),
        ];

        let call = self.provider.chat_complete(&messages, &self.ai_config);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Text analysis failed, using fallback relevance");
                return ParseOutcome::Fallback(SemanticAnalysis::fallback());
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Text analysis timed out, using fallback relevance"
                );
                return ParseOutcome::Fallback(SemanticAnalysis::fallback());
            }
        };

        tracing::debug!(
            "Text analysis reply received: {} chars",
            response.content.len()
        );

        let outcome = parse_semantic_analysis(&response.content);
        if outcome.is_fallback() {
            tracing::warn!("Text analysis reply had no usable JSON block, using fallback relevance");
        }
        outcome
    }
}

/// Where a keyword hit lives: title, then description, then tags.
fn keyword_field(keyword: &str, listing: &ListingText<'_>) -> IssueField {
    if listing.title.to_lowercase().contains(keyword) {
        IssueField::Title
    } else if listing.description.to_lowercase().contains(keyword) {
        IssueField::Description
    } else if listing
        .tags
        .iter()
        .any(|tag| tag.to_lowercase().contains(keyword))
    {
        IssueField::Tags
    } else {
        IssueField::Content
    }
}

fn build_prompt(listing: &ListingText<'_>) -> String {
    format!(
        r#"Analyze the following product listing and assess whether it is appropriate:

Title: {}
Description: {}
Category: {}
Tags: {}

Evaluate:
1. How well the title, description and category match each other (score 0-100)
2. Any inappropriate, prohibited or fraudulent content
3. Suggest 3-5 relevant tags if the seller has not provided enough

Return the result as JSON with this structure:
{{
  "relevanceScore": 85,
  "suggestedTags": ["tag1", "tag2", "tag3"],
  "issues": [
    {{"severity": "high/medium/low", "description": "Issue description", "field": "title/description/tags"}}
  ],
  "analysis": "Overall assessment"
}}"#,
        listing.title,
        listing.description,
        listing.category,
        listing.tags.join(", ")
    )
}

fn content_penalty(severity: Severity) -> i64 {
    match severity {
        Severity::High => 30,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

/// Content score: relevance adjusted by listing completeness and issues.
pub fn content_score(relevance_score: u32, listing: &ListingText<'_>, issues: &[Issue]) -> u32 {
    let mut score = relevance_score as i64;

    let title_len = listing.title.chars().count();
    if title_len < 5 {
        score -= 10;
    } else if title_len < 10 {
        score -= 5;
    } else if title_len > 50 {
        score -= 5;
    }

    let description_len = listing.description.chars().count();
    if description_len < 20 {
        score -= 15;
    } else if description_len < 50 {
        score -= 10;
    } else if description_len > 100 {
        score += 5;
    }

    let tag_count = listing.tags.len();
    if tag_count == 0 {
        score -= 10;
    } else if tag_count < 3 {
        score -= 5;
    } else if tag_count >= 5 {
        score += 5;
    }

    score -= issues
        .iter()
        .map(|issue| content_penalty(issue.severity))
        .sum::<i64>();

    clamp_score(score)
}
