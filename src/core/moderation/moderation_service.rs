// Moderation service - orchestrates one queue entry end to end.
//
// This service handles:
// - Claiming a queue entry (queued -> processing)
// - Running text and image analysis concurrently
// - Scoring and deciding
// - Persisting the result and product status together
// - Recording failures on the product and the queue entry
// - Returning entries whose claim has gone stale to the queue
//
// NO database or HTTP dependencies here - storage and analysis services are ports.

use super::image_analyzer::{ImageAnalyzer, ImageAnnotator};
use super::moderation_config::ModerationConfig;
use super::moderation_models::{ModerationOutcome, ModerationResult, Product, QueueEntry};
#[cfg(test)]
use super::moderation_models::StoredModerationResult;
use super::scoring;
use super::text_analyzer::{ListingText, TextAnalyzer};
use crate::core::ai::AiProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Document store holding products, the moderation queue and results.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, ModerationError>;

    /// Oldest queued entries first.
    async fn pending_entries(&self, limit: usize) -> Result<Vec<QueueEntry>, ModerationError>;

    /// Move an entry from `queued` to `processing` and stamp the claim time.
    /// Returns `false` if the entry was not in `queued` state (someone else has it).
    async fn claim_entry(&self, product_id: &str) -> Result<bool, ModerationError>;

    /// Store a new result and point the product at it, atomically.
    /// Returns the generated result id.
    async fn record_decision(&self, result: &ModerationResult) -> Result<String, ModerationError>;

    /// Push the product to `pending_review` with an error note.
    async fn mark_product_errored(
        &self,
        product_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError>;

    /// Remove an entry that is still `processing`. An entry that was queued
    /// again in the meantime is left for the next poll.
    async fn delete_entry(&self, product_id: &str) -> Result<(), ModerationError>;

    /// Flag a `processing` entry with `error` status and the failure message.
    async fn mark_entry_failed(
        &self,
        product_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError>;

    /// Put `processing` entries claimed before `claimed_before` back to `queued`.
    /// Returns how many entries were released.
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, ModerationError>;

    /// Every stored result for a product, newest first.
    #[cfg(test)]
    async fn results_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<StoredModerationResult>, ModerationError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationService<S: ModerationStore, P: AiProvider, V: ImageAnnotator> {
    store: S,
    text: TextAnalyzer<P>,
    images: ImageAnalyzer<V>,
}

impl<S: ModerationStore, P: AiProvider, V: ImageAnnotator> ModerationService<S, P, V> {
    pub fn new(store: S, ai_provider: P, annotator: V, config: &ModerationConfig) -> Self {
        let policy = Arc::new(config.policy.clone());
        Self {
            store,
            text: TextAnalyzer::new(
                ai_provider,
                config.ai.clone(),
                Arc::clone(&policy),
                config.text_timeout(),
            ),
            images: ImageAnalyzer::new(
                annotator,
                policy,
                config.image_timeout(),
                config.max_concurrent_images,
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub async fn pending_entries(&self, limit: usize) -> Result<Vec<QueueEntry>, ModerationError> {
        self.store.pending_entries(limit).await
    }

    /// Release claims older than `lease`, e.g. left behind by a crashed worker.
    pub async fn requeue_stale(&self, lease: Duration) -> Result<usize, ModerationError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| ModerationError::ConfigError(format!("claim lease out of range: {}", e)))?;
        self.store.requeue_stale(Utc::now() - lease).await
    }

    /// Evaluate a product without touching storage.
    ///
    /// Text and image analysis run concurrently. Holding the external
    /// responses fixed, the scores and decision are the same every run.
    pub async fn evaluate(&self, product: &Product) -> ModerationResult {
        let listing = ListingText {
            title: &product.title,
            description: &product.description,
            category: &product.category,
            tags: &product.tags,
            price: product.price,
        };

        let (content, images) =
            tokio::join!(self.text.analyze(listing), self.images.analyze(&product.images));

        let mut issues = content.issues.clone();
        issues.extend(images.issues.iter().cloned());

        let verdict = scoring::score(
            content.score,
            images.score,
            content.category_banned,
            &issues,
        );

        ModerationResult {
            product_id: product.id.clone(),
            status: verdict.status,
            content_score: content.score,
            image_score: images.score,
            compliance_score: verdict.compliance_score,
            total_score: verdict.total_score,
            issues,
            suggested_tags: content.suggested_tags.clone(),
            rejection_reason: verdict.rejection_reason,
            content_analysis: content,
            image_analysis: images,
            created_at: Utc::now(),
        }
    }

    /// Process one queue entry. Never returns an error: failures are
    /// recorded on the product and the entry instead.
    pub async fn process_entry(&self, entry: &QueueEntry) -> ModerationOutcome {
        let product_id = entry.product_id.as_str();

        match self.store.claim_entry(product_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(product_id, "Queue entry already claimed, skipping");
                return ModerationOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(product_id, error = %e, "Failed to claim queue entry");
                return ModerationOutcome::Skipped;
            }
        }

        tracing::info!(product_id, "Starting product moderation");

        let product = match self.store.get_product(product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                let message = ModerationError::ProductNotFound(product_id.to_string()).to_string();
                tracing::error!(product_id, "Product not found, parking queue entry");
                if let Err(e) = self.store.mark_entry_failed(product_id, &message, Utc::now()).await {
                    tracing::error!(product_id, error = %e, "Failed to mark queue entry as errored");
                }
                return ModerationOutcome::ProductMissing;
            }
            Err(e) => return self.record_failure(product_id, &e.to_string()).await,
        };

        let result = self.evaluate(&product).await;

        let moderation_id = match self.store.record_decision(&result).await {
            Ok(id) => id,
            Err(e) => return self.record_failure(product_id, &e.to_string()).await,
        };

        if let Err(e) = self.store.delete_entry(product_id).await {
            // Decision is already stored; the entry is released once its claim goes stale
            tracing::error!(product_id, error = %e, "Failed to delete queue entry");
        }

        tracing::info!(
            product_id,
            moderation_id = %moderation_id,
            status = %result.status,
            total_score = result.total_score,
            "Product moderation completed"
        );

        ModerationOutcome::Completed {
            moderation_id,
            status: result.status,
            total_score: result.total_score,
        }
    }

    /// Record a pipeline failure on the product and its entry.
    /// Secondary failures are only logged.
    pub async fn record_failure(&self, product_id: &str, message: &str) -> ModerationOutcome {
        let now = Utc::now();
        tracing::error!(product_id, error = %message, "Product moderation failed");

        if let Err(e) = self
            .store
            .mark_product_errored(product_id, message, now)
            .await
        {
            tracing::error!(product_id, error = %e, "Failed to flag product for manual review");
        }

        if let Err(e) = self.store.mark_entry_failed(product_id, message, now).await {
            tracing::error!(product_id, error = %e, "Failed to mark queue entry as errored");
        }

        ModerationOutcome::Failed {
            error: message.to_string(),
        }
    }
}
