// Moderation domain models - data structures for the listing moderation pipeline.
//
// These are pure domain types with no storage or HTTP dependencies.
// The infra layer maps them to rows and API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// PRODUCTS
// ============================================================================

/// Visibility state of a marketplace listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    PendingReview,
    Rejected,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::PendingReview => "pending_review",
            ProductStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(ProductStatus::Available),
            "pending_review" => Some(ProductStatus::PendingReview),
            "rejected" => Some(ProductStatus::Rejected),
            _ => None,
        }
    }
}

/// Summary of the last moderation decision, stored on the product itself.
///
/// On the failure path only `error` and `error_timestamp` are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_timestamp: Option<DateTime<Utc>>,
}

impl ModerationInfo {
    pub fn from_result(moderation_id: &str, result: &ModerationResult) -> Self {
        Self {
            moderation_id: Some(moderation_id.to_string()),
            moderation_score: Some(result.total_score),
            moderation_timestamp: Some(result.created_at),
            rejection_reason: result.rejection_reason.clone(),
            ..Default::default()
        }
    }

    pub fn from_error(message: &str, at: DateTime<Utc>) -> Self {
        Self {
            error: Some(message.to_string()),
            error_timestamp: Some(at),
            ..Default::default()
        }
    }
}

/// A marketplace listing. Moderation only ever writes `status` and
/// `moderation_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub price: f64,
    pub images: Vec<String>,
    pub status: ProductStatus,
    pub moderation_info: Option<ModerationInfo>,
}

// ============================================================================
// QUEUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(QueueStatus::Queued),
            "processing" => Some(QueueStatus::Processing),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }
}

/// A pending unit of moderation work, keyed by product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub product_id: String,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when a worker moves the entry to `processing`.
    pub claimed_at: Option<DateTime<Utc>>,
    pub error_timestamp: Option<DateTime<Utc>>,
}

impl QueueEntry {
    #[cfg(test)]
    pub fn queued(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            status: QueueStatus::Queued,
            error: None,
            created_at: Utc::now(),
            claimed_at: None,
            error_timestamp: None,
        }
    }
}

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Unknown or missing severities count as `Low`.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("high") => Severity::High,
            Some("medium") => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Content,
    Image,
}

/// Which part of the listing text an issue points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueField {
    Title,
    Description,
    Tags,
    Category,
    Price,
    Content,
}

impl IssueField {
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("title") => IssueField::Title,
            Some("description") => IssueField::Description,
            Some("tags") | Some("tag") => IssueField::Tags,
            Some("category") => IssueField::Category,
            Some("price") => IssueField::Price,
            _ => IssueField::Content,
        }
    }
}

/// A single detected policy concern. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<IssueField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_index: Option<usize>,
}

impl Issue {
    pub fn content(severity: Severity, field: IssueField, description: impl Into<String>) -> Self {
        Self {
            issue_type: IssueType::Content,
            severity,
            description: description.into(),
            field: Some(field),
            image_index: None,
        }
    }

    pub fn image(severity: Severity, image_index: Option<usize>, description: impl Into<String>) -> Self {
        Self {
            issue_type: IssueType::Image,
            severity,
            description: description.into(),
            field: None,
            image_index,
        }
    }
}

// ============================================================================
// ANALYSES
// ============================================================================

/// Output of the text analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnalysis {
    pub score: u32,
    pub issues: Vec<Issue>,
    pub suggested_tags: Vec<String>,
    pub relevance_score: u32,
    pub category_banned: bool,
    /// `true` when the semantic enrichment was unavailable and defaults were used.
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Medium,
    High,
}

/// Per-image outcome of the image analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerImageResult {
    pub image_index: usize,
    pub score: u32,
    pub issues: Vec<Issue>,
    pub objects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<ImageQuality>,
    /// `true` when the image-analysis call failed and the neutral score was used.
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

/// Output of the image analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub score: u32,
    pub issues: Vec<Issue>,
    pub results: Vec<PerImageResult>,
}

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Approved,
    Rejected,
    InReview,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
            ModerationStatus::InReview => "in_review",
        }
    }

    #[cfg(test)]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approved" => Some(ModerationStatus::Approved),
            "rejected" => Some(ModerationStatus::Rejected),
            "in_review" => Some(ModerationStatus::InReview),
            _ => None,
        }
    }

    /// The product visibility that goes with each decision.
    pub fn product_status(&self) -> ProductStatus {
        match self {
            ModerationStatus::Approved => ProductStatus::Available,
            ModerationStatus::Rejected => ProductStatus::Rejected,
            ModerationStatus::InReview => ProductStatus::PendingReview,
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResult {
    pub product_id: String,
    pub status: ModerationStatus,
    pub content_score: u32,
    pub image_score: u32,
    pub compliance_score: u32,
    pub total_score: u32,
    pub issues: Vec<Issue>,
    pub suggested_tags: Vec<String>,
    pub rejection_reason: Option<String>,
    pub content_analysis: TextAnalysis,
    pub image_analysis: ImageAnalysis,
    pub created_at: DateTime<Utc>,
}

/// A persisted result together with the id the store generated for it.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredModerationResult {
    pub id: String,
    pub result: ModerationResult,
}

/// What happened to a single queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    /// A result was stored, the product updated and the entry removed.
    Completed {
        moderation_id: String,
        status: ModerationStatus,
        total_score: u32,
    },
    /// Another worker already claimed the entry.
    Skipped,
    /// The product no longer exists; the entry is left for manual cleanup.
    ProductMissing,
    /// The pipeline failed; the entry is kept with an error marker.
    Failed { error: String },
}
