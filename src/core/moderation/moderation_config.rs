// Moderation configuration - deny-lists and tuning knobs passed into the service.
//
// Deny-lists are plain data with a version tag so they can be swapped from a
// policy file without touching the scoring code.

use super::moderation_service::ModerationError;
use crate::core::ai::AiConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Versioned deny-lists used by the rule matcher and the image label check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyLists {
    pub version: String,
    pub banned_keywords: Vec<String>,
    pub banned_categories: Vec<String>,
}

impl PolicyLists {
    /// Parse a policy document. Entries are trimmed and blank ones dropped.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let policy: PolicyLists = serde_json::from_str(json)?;
        Ok(policy.normalized())
    }

    /// Lower-case and trim every entry, dropping blanks.
    pub fn normalized(self) -> Self {
        fn clean(items: Vec<String>) -> Vec<String> {
            items
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        }

        Self {
            version: self.version,
            banned_keywords: clean(self.banned_keywords),
            banned_categories: clean(self.banned_categories),
        }
    }
}

impl Default for PolicyLists {
    fn default() -> Self {
        let keywords = [
            "vũ khí",
            "súng",
            "dao",
            "ma túy",
            "cần sa",
            "cocaine",
            "heroin",
            "khỏa thân",
            "khiêu dâm",
            "cờ bạc",
            "viagra",
            "thuốc lá điện tử",
        ];
        let categories = ["vũ khí", "chất kích thích", "thuốc lá", "đồ 18+", "cờ bạc"];

        Self {
            version: "2024-01".to_string(),
            banned_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            banned_categories: categories.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Configuration for the moderation service and its queue worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub policy: PolicyLists,
    /// Model settings for the text-analysis call
    pub ai: AiConfig,
    /// Upper bound for one text-analysis call (seconds)
    pub text_timeout_secs: u64,
    /// Upper bound for one image-analysis call (seconds)
    pub image_timeout_secs: u64,
    /// Image-analysis calls allowed in flight at once, across all entries
    pub max_concurrent_images: usize,
    /// Queue entries processed at once
    pub max_concurrent_entries: usize,
    /// Seconds between queue polls
    pub poll_interval_secs: u64,
    /// Entries fetched per poll
    pub queue_batch_size: usize,
    /// Seconds a claimed entry may stay in `processing` before it is queued again
    pub claim_lease_secs: u64,
}

/// Parse an optional override, keeping `default` when it is missing or invalid.
fn parse_or<T: FromStr + Copy>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            default
        }),
    }
}

impl ModerationConfig {
    /// Defaults with overrides applied from `lookup` (normally the process
    /// environment). The policy is not touched here, see `load_policy_file`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut ai = defaults.ai.clone();
        if let Some(model) = lookup("GEMINI_MODEL").filter(|m| !m.trim().is_empty()) {
            ai.model = model.trim().to_string();
        }

        Self {
            policy: defaults.policy,
            ai,
            text_timeout_secs: parse_or(
                "TEXT_ANALYSIS_TIMEOUT_SECS",
                lookup("TEXT_ANALYSIS_TIMEOUT_SECS"),
                defaults.text_timeout_secs,
            ),
            image_timeout_secs: parse_or(
                "IMAGE_ANALYSIS_TIMEOUT_SECS",
                lookup("IMAGE_ANALYSIS_TIMEOUT_SECS"),
                defaults.image_timeout_secs,
            ),
            max_concurrent_images: parse_or(
                "MAX_CONCURRENT_IMAGES",
                lookup("MAX_CONCURRENT_IMAGES"),
                defaults.max_concurrent_images,
            )
            .max(1),
            max_concurrent_entries: parse_or(
                "MAX_CONCURRENT_ENTRIES",
                lookup("MAX_CONCURRENT_ENTRIES"),
                defaults.max_concurrent_entries,
            )
            .max(1),
            poll_interval_secs: parse_or(
                "QUEUE_POLL_INTERVAL_SECS",
                lookup("QUEUE_POLL_INTERVAL_SECS"),
                defaults.poll_interval_secs,
            ),
            queue_batch_size: parse_or(
                "QUEUE_BATCH_SIZE",
                lookup("QUEUE_BATCH_SIZE"),
                defaults.queue_batch_size,
            )
            .max(1),
            claim_lease_secs: parse_or(
                "QUEUE_CLAIM_LEASE_SECS",
                lookup("QUEUE_CLAIM_LEASE_SECS"),
                defaults.claim_lease_secs,
            )
            .max(1),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_secs(self.text_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            policy: PolicyLists::default(),
            ai: AiConfig::default(),
            text_timeout_secs: 15,
            image_timeout_secs: 20,
            max_concurrent_images: 4,
            max_concurrent_entries: 8,
            poll_interval_secs: 5,
            queue_batch_size: 25,
            claim_lease_secs: 600,
        }
    }
}

/// Read a policy document from disk.
pub async fn load_policy_file(path: &str) -> Result<PolicyLists, ModerationError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ModerationError::ConfigError(format!("cannot read policy file {}: {}", path, e)))?;
    PolicyLists::from_json(&content)
        .map_err(|e| ModerationError::ConfigError(format!("invalid policy file {}: {}", path, e)))
}
