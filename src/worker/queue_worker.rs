// Queue worker - polls the moderation queue and fans entries out to the
// moderation service.
//
// Each poll takes up to `queue_batch_size` queued entries (oldest first) and
// processes them concurrently, at most `max_concurrent_entries` at a time.
// Before each poll, claims older than the lease are returned to the queue.
// A failed poll is logged and retried on the next tick.

use crate::core::ai::AiProvider;
use crate::core::moderation::{
    ImageAnnotator, ModerationConfig, ModerationError, ModerationOutcome, ModerationService,
    ModerationStore,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Per-poll tally, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &ModerationOutcome) {
        match outcome {
            ModerationOutcome::Completed { .. } => self.completed += 1,
            ModerationOutcome::Skipped => self.skipped += 1,
            ModerationOutcome::ProductMissing => self.missing += 1,
            ModerationOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.missing + self.failed
    }
}

pub struct QueueWorker<S, P, V>
where
    S: ModerationStore + 'static,
    P: AiProvider + 'static,
    V: ImageAnnotator + 'static,
{
    service: Arc<ModerationService<S, P, V>>,
    limiter: Arc<Semaphore>,
    batch_size: usize,
    poll_interval: Duration,
    claim_lease: Duration,
}

impl<S, P, V> QueueWorker<S, P, V>
where
    S: ModerationStore + 'static,
    P: AiProvider + 'static,
    V: ImageAnnotator + 'static,
{
    pub fn new(service: Arc<ModerationService<S, P, V>>, config: &ModerationConfig) -> Self {
        Self {
            service,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_entries.max(1))),
            batch_size: config.queue_batch_size.max(1),
            poll_interval: config.poll_interval(),
            claim_lease: config.claim_lease(),
        }
    }

    /// Process one batch of queued entries and wait for all of them.
    pub async fn run_once(&self) -> Result<BatchSummary, ModerationError> {
        match self.service.requeue_stale(self.claim_lease).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Returned stale claims to the queue"),
            Err(e) => tracing::warn!(error = %e, "Failed to release stale claims"),
        }

        let entries = self.service.pending_entries(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(BatchSummary::default());
        }

        tracing::debug!(count = entries.len(), "Dispatching queued entries");

        let (product_ids, handles): (Vec<String>, Vec<_>) = entries
            .into_iter()
            .map(|entry| {
                let service = Arc::clone(&self.service);
                let limiter = Arc::clone(&self.limiter);
                let product_id = entry.product_id.clone();
                let handle = tokio::spawn(async move {
                    // Only fails if the semaphore is closed, which never happens here
                    let Ok(_permit) = limiter.acquire_owned().await else {
                        return ModerationOutcome::Skipped;
                    };
                    service.process_entry(&entry).await
                });
                (product_id, handle)
            })
            .unzip();

        let mut summary = BatchSummary::default();
        for (product_id, joined) in product_ids.iter().zip(join_all(handles).await) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(product_id = %product_id, error = %e, "Moderation task panicked");
                    self.service
                        .record_failure(product_id, &format!("Moderation task aborted: {}", e))
                        .await
                }
            };
            summary.record(&outcome);
        }

        tracing::info!(
            completed = summary.completed,
            skipped = summary.skipped,
            missing = summary.missing,
            failed = summary.failed,
            "Moderation batch finished"
        );
        Ok(summary)
    }

    /// Whether to poll again without sleeping: only after a full batch that
    /// made progress. A batch of skips or failures waits out the interval.
    fn should_poll_immediately(&self, summary: &BatchSummary) -> bool {
        summary.completed > 0 && summary.total() >= self.batch_size
    }

    /// Poll forever. A full, productive batch is followed immediately by the next poll.
    pub async fn run(&self) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Moderation worker started"
        );

        loop {
            match self.run_once().await {
                Ok(summary) if self.should_poll_immediately(&summary) => continue,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Queue poll failed"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::{AiConfig, AiMessage, AiProviderResponse};
    use crate::core::moderation::moderation_service::tests::{
        knife_product, shirt_product, test_config, CleanAnnotator, DownProvider, MockStore,
    };
    use crate::core::moderation::{ImageAnnotation, ProductStatus, QueueStatus};
    use chrono::Utc;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Annotator that records how many calls overlap.
    struct CountingAnnotator {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl CountingAnnotator {
        fn new(max_in_flight: Arc<AtomicUsize>) -> Self {
            Self {
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight,
            }
        }
    }

    #[async_trait]
    impl ImageAnnotator for CountingAnnotator {
        async fn annotate(
            &self,
            _image_ref: &str,
        ) -> Result<ImageAnnotation, Box<dyn Error + Send + Sync>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ImageAnnotation {
                labels: vec!["Clothing".to_string()],
                has_properties: true,
                ..Default::default()
            })
        }
    }

    /// Provider that answers with a fixed, well-formed review.
    struct HappyProvider;

    #[async_trait]
    impl AiProvider for HappyProvider {
        async fn chat_complete(
            &self,
            _messages: &[AiMessage],
            _config: &AiConfig,
        ) -> Result<AiProviderResponse, Box<dyn Error + Send + Sync>> {
            Ok(AiProviderResponse {
                content: r#"{"relevanceScore": 90, "suggestedTags": [], "issues": []}"#.to_string(),
            })
        }
    }

    fn config(max_entries: usize, batch: usize) -> ModerationConfig {
        ModerationConfig {
            max_concurrent_entries: max_entries,
            max_concurrent_images: 16,
            queue_batch_size: batch,
            ..test_config()
        }
    }

    fn seeded_store(count: usize) -> MockStore {
        let store = MockStore::new();
        for i in 0..count {
            let mut product = shirt_product(&format!("p{}", i));
            product.images.truncate(1);
            store.seed(product);
        }
        store
    }

    #[tokio::test]
    async fn test_run_once_processes_every_queued_entry() {
        let store = seeded_store(3);
        store.seed(knife_product("bad"));
        let config = config(4, 25);
        let service = Arc::new(ModerationService::new(
            store,
            DownProvider { hang: false },
            CleanAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        let summary = worker.run_once().await.unwrap();

        assert_eq!(summary.completed, 4);
        assert_eq!(summary.total(), 4);
        assert!(service.store().queue.is_empty());
        assert_eq!(service.store().results.len(), 4);
        let bad = service.store().products.get("bad").unwrap().clone();
        assert_eq!(bad.status, ProductStatus::Rejected);

        // Nothing left to do
        assert_eq!(worker.run_once().await.unwrap(), BatchSummary::default());
    }

    /// Runs four single-image entries and returns the peak image-call overlap.
    async fn peak_overlap(max_entries: usize) -> usize {
        let peak = Arc::new(AtomicUsize::new(0));
        let config = config(max_entries, 25);
        let service = Arc::new(ModerationService::new(
            seeded_store(4),
            HappyProvider,
            CountingAnnotator::new(Arc::clone(&peak)),
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.completed, 4);
        assert_eq!(service.store().results.len(), 4);

        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_single_entry_limit_serializes_work() {
        assert_eq!(peak_overlap(1).await, 1);
    }

    #[tokio::test]
    async fn test_entry_limit_allows_parallel_work() {
        let peak = peak_overlap(4).await;
        assert!(peak > 1 && peak <= 4, "peak overlap was {}", peak);
    }

    #[tokio::test]
    async fn test_batch_size_limits_one_poll() {
        let config = config(8, 2);
        let service = Arc::new(ModerationService::new(
            seeded_store(5),
            HappyProvider,
            CleanAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        assert_eq!(worker.run_once().await.unwrap().completed, 2);
        assert_eq!(service.store().queue.len(), 3);
        assert_eq!(worker.run_once().await.unwrap().completed, 2);
        assert_eq!(worker.run_once().await.unwrap().completed, 1);
        assert!(service.store().queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_entries_stay_queued_with_error() {
        let store = seeded_store(2);
        store.fail_record.store(true, Ordering::SeqCst);
        let config = config(2, 25);
        let service = Arc::new(ModerationService::new(
            store,
            HappyProvider,
            CleanAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        let summary = worker.run_once().await.unwrap();

        assert_eq!(summary.failed, 2);
        for entry in service.store().queue.iter() {
            assert_eq!(entry.status, QueueStatus::Error);
        }
        // Errored entries are not picked up again
        assert_eq!(worker.run_once().await.unwrap().total(), 0);
    }

    /// Annotator that panics, standing in for any bug inside a moderation task.
    struct PanickingAnnotator;

    #[async_trait]
    impl ImageAnnotator for PanickingAnnotator {
        async fn annotate(
            &self,
            image_ref: &str,
        ) -> Result<ImageAnnotation, Box<dyn Error + Send + Sync>> {
            panic!("annotator crashed on {}", image_ref);
        }
    }

    #[tokio::test]
    async fn test_panicked_task_fails_its_entry() {
        let config = config(2, 25);
        let service = Arc::new(ModerationService::new(
            seeded_store(1),
            HappyProvider,
            PanickingAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        let summary = worker.run_once().await.unwrap();

        assert_eq!(summary.failed, 1);
        let entry = service.store().queue.get("p0").unwrap().clone();
        assert_eq!(entry.status, QueueStatus::Error);
        assert!(entry.error.unwrap().contains("Moderation task aborted"));
        let product = service.store().products.get("p0").unwrap().clone();
        assert_eq!(product.status, ProductStatus::PendingReview);
        assert!(product.moderation_info.unwrap().error.is_some());

        // Not stuck in processing, and not retried in a loop either
        assert_eq!(worker.run_once().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_stale_claim_is_picked_up_again() {
        let store = seeded_store(2);
        assert!(store.claim_entry("p0").await.unwrap());
        store.queue.get_mut("p0").unwrap().claimed_at =
            Some(Utc::now() - chrono::Duration::hours(1));
        assert!(store.claim_entry("p1").await.unwrap());
        let config = config(2, 25);
        let service = Arc::new(ModerationService::new(
            store,
            HappyProvider,
            CleanAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(Arc::clone(&service), &config);

        let summary = worker.run_once().await.unwrap();

        // Only the abandoned claim is redone; the live one is left to its owner
        assert_eq!(summary.completed, 1);
        assert!(service.store().queue.get("p0").is_none());
        assert_eq!(
            service.store().queue.get("p1").unwrap().status,
            QueueStatus::Processing
        );
    }

    #[test]
    fn test_only_productive_full_batches_skip_the_sleep() {
        let config = config(2, 2);
        let service = Arc::new(ModerationService::new(
            MockStore::new(),
            HappyProvider,
            CleanAnnotator,
            &config,
        ));
        let worker = QueueWorker::new(service, &config);

        let stalled = BatchSummary {
            skipped: 2,
            ..Default::default()
        };
        let failing = BatchSummary {
            failed: 2,
            ..Default::default()
        };
        let productive = BatchSummary {
            completed: 1,
            skipped: 1,
            ..Default::default()
        };
        let partial = BatchSummary {
            completed: 1,
            ..Default::default()
        };

        assert!(!worker.should_poll_immediately(&stalled));
        assert!(!worker.should_poll_immediately(&failing));
        assert!(worker.should_poll_immediately(&productive));
        assert!(!worker.should_poll_immediately(&partial));
    }
}
