// Image analyzer - per-image safety scoring over an image-analysis service.
//
// Images are annotated concurrently, bounded by a semaphore shared by every
// caller of the same analyzer. A failed or slow image never aborts the batch.

use super::moderation_config::PolicyLists;
use super::moderation_models::{ImageAnalysis, ImageQuality, Issue, PerImageResult, Severity};
use super::rule_matcher::RuleMatcher;
use super::scoring::clamp_score;
use async_trait::async_trait;
use futures::future::join_all;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// Penalty ladder for a single image. Policy constants, tune as needed.
const ADULT_PENALTY: i64 = 50;
const VIOLENCE_PENALTY: i64 = 40;
const RACY_PENALTY: i64 = 30;
const BANNED_LABEL_PENALTY: i64 = 50;

/// Score given to an image whose analysis failed.
const NEUTRAL_IMAGE_SCORE: u32 = 60;

// ============================================================================
// PORT
// ============================================================================

/// Likelihood rating for a safe-search category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Likelihood {
    #[default]
    Unknown,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

impl Likelihood {
    /// Parse a rating name. Anything unrecognised is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "VERY_UNLIKELY" => Likelihood::VeryUnlikely,
            "UNLIKELY" => Likelihood::Unlikely,
            "POSSIBLE" => Likelihood::Possible,
            "LIKELY" => Likelihood::Likely,
            "VERY_LIKELY" => Likelihood::VeryLikely,
            _ => Likelihood::Unknown,
        }
    }

    pub fn is_likely(&self) -> bool {
        matches!(self, Likelihood::Likely | Likelihood::VeryLikely)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafeSearch {
    pub adult: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
}

/// What the image-analysis service reported for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageAnnotation {
    pub labels: Vec<String>,
    pub safe_search: Option<SafeSearch>,
    /// Whether the service returned image properties (colors, etc).
    pub has_properties: bool,
    /// Names of localized objects.
    pub objects: Vec<String>,
    pub raw: serde_json::Value,
}

/// Port for the image-analysis service.
///
/// Implementations request label detection, safe-search ratings, image
/// properties and object localization for a single image reference.
#[async_trait]
pub trait ImageAnnotator: Send + Sync {
    async fn annotate(&self, image_ref: &str)
        -> Result<ImageAnnotation, Box<dyn Error + Send + Sync>>;
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct ImageAnalyzer<V: ImageAnnotator> {
    annotator: V,
    policy: Arc<PolicyLists>,
    timeout: Duration,
    limiter: Semaphore,
}

impl<V: ImageAnnotator> ImageAnalyzer<V> {
    pub fn new(
        annotator: V,
        policy: Arc<PolicyLists>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            annotator,
            policy,
            timeout,
            limiter: Semaphore::new(max_concurrent.max(1)),
        }
    }

    pub async fn analyze(&self, image_refs: &[String]) -> ImageAnalysis {
        if image_refs.is_empty() {
            return ImageAnalysis {
                score: 0,
                issues: vec![Issue::image(Severity::High, None, "No images provided")],
                results: Vec::new(),
            };
        }

        let mut issues = Vec::new();
        if image_refs.len() < 2 {
            issues.push(Issue::image(
                Severity::Low,
                None,
                "Consider providing more images to increase buyer trust",
            ));
        }

        // join_all keeps input order, so results line up with image indexes
        let results: Vec<PerImageResult> = join_all(
            image_refs
                .iter()
                .enumerate()
                .map(|(index, image_ref)| self.analyze_one(index, image_ref)),
        )
        .await;

        for result in &results {
            issues.extend(result.issues.iter().cloned());
        }

        let total: u32 = results.iter().map(|r| r.score).sum();
        let score = (total as f64 / results.len() as f64).round() as u32;

        ImageAnalysis {
            score,
            issues,
            results,
        }
    }

    async fn analyze_one(&self, index: usize, image_ref: &str) -> PerImageResult {
        // The semaphore is never closed, so acquire only fails in theory
        let _permit = self.limiter.acquire().await.ok();

        match tokio::time::timeout(self.timeout, self.annotator.annotate(image_ref)).await {
            Ok(Ok(annotation)) => self.score_annotation(index, annotation),
            Ok(Err(e)) => {
                tracing::warn!(image_index = index, error = %e, "Image analysis failed");
                failed_image(index)
            }
            Err(_) => {
                tracing::warn!(
                    image_index = index,
                    timeout_secs = self.timeout.as_secs(),
                    "Image analysis timed out"
                );
                failed_image(index)
            }
        }
    }

    fn score_annotation(&self, index: usize, annotation: ImageAnnotation) -> PerImageResult {
        let mut issues = Vec::new();
        let mut score: i64 = 100;

        if let Some(safe) = annotation.safe_search {
            if safe.adult.is_likely() {
                issues.push(Issue::image(
                    Severity::High,
                    Some(index),
                    "Image may contain adult content",
                ));
                score -= ADULT_PENALTY;
            }
            if safe.violence.is_likely() {
                issues.push(Issue::image(
                    Severity::High,
                    Some(index),
                    "Image may contain violent content",
                ));
                score -= VIOLENCE_PENALTY;
            }
            if safe.racy.is_likely() {
                issues.push(Issue::image(
                    Severity::Medium,
                    Some(index),
                    "Image may contain racy content",
                ));
                score -= RACY_PENALTY;
            }
        }

        let matcher = RuleMatcher::new(&self.policy);
        for label in &annotation.labels {
            if matcher.first_keyword_in_label(label).is_some() {
                issues.push(Issue::image(
                    Severity::High,
                    Some(index),
                    format!("Image may contain a prohibited item: {}", label),
                ));
                score -= BANNED_LABEL_PENALTY;
            }
        }

        let quality = if annotation.has_properties {
            ImageQuality::High
        } else {
            ImageQuality::Medium
        };

        let mut objects = annotation.labels;
        objects.extend(annotation.objects);

        PerImageResult {
            image_index: index,
            score: clamp_score(score),
            issues,
            objects,
            quality: Some(quality),
            failed: false,
            raw_response: Some(annotation.raw),
        }
    }
}

fn failed_image(index: usize) -> PerImageResult {
    PerImageResult {
        image_index: index,
        score: NEUTRAL_IMAGE_SCORE,
        issues: vec![Issue::image(
            Severity::Medium,
            Some(index),
            "Could not analyze this image",
        )],
        objects: Vec::new(),
        quality: None,
        failed: true,
        raw_response: None,
    }
}
