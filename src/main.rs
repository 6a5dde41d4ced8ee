// Entry point of the listing moderation worker.
//
// **Architecture Overview:**
// - `core/` = Business logic (scoring, analyzers, orchestration, ports)
// - `infra/` = Implementations of core traits (SQLite, Gemini, Cloud Vision)
// - `worker/` = Queue consumer that feeds entries to the moderation service
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Run the queue worker until shutdown

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "worker/worker_layer.rs"]
mod worker;

use crate::core::moderation::{load_policy_file, ModerationConfig, ModerationService};
use crate::infra::ai::GeminiClient;
use crate::infra::moderation::SqliteModerationStore;
use crate::infra::vision::{
    LocalImageRoot, ServiceAccountAuth, VisionClient, CLOUD_VISION_SCOPE,
    DEFAULT_MAX_LOCAL_IMAGE_BYTES,
};
use crate::worker::QueueWorker;
use std::sync::Arc;

const DEFAULT_DATABASE_URL: &str = "data/marketplace.db";

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

async fn load_config() -> anyhow::Result<ModerationConfig> {
    let mut config = ModerationConfig::from_env();

    if let Some(path) = non_empty_env("MODERATION_POLICY_FILE") {
        config.policy = load_policy_file(&path).await?;
        tracing::info!(
            path = %path,
            version = %config.policy.version,
            "Loaded moderation policy"
        );
    }

    Ok(config)
}

/// Local image references stay disabled unless `VISION_LOCAL_IMAGE_ROOT` is set.
fn local_image_root() -> anyhow::Result<Option<LocalImageRoot>> {
    let Some(dir) = non_empty_env("VISION_LOCAL_IMAGE_ROOT") else {
        return Ok(None);
    };

    let max_bytes = match non_empty_env("VISION_MAX_LOCAL_IMAGE_BYTES") {
        None => DEFAULT_MAX_LOCAL_IMAGE_BYTES,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "Ignoring unparseable VISION_MAX_LOCAL_IMAGE_BYTES");
            DEFAULT_MAX_LOCAL_IMAGE_BYTES
        }),
    };

    let root = LocalImageRoot::new(&dir, max_bytes)
        .map_err(|e| anyhow::anyhow!("Invalid VISION_LOCAL_IMAGE_ROOT '{}': {}", dir, e))?;
    tracing::info!(root = %root.dir().display(), max_bytes, "Local image references enabled");
    Ok(Some(root))
}

async fn build_vision_client(config: &ModerationConfig) -> anyhow::Result<VisionClient> {
    let client = build_authenticated_vision_client(config).await?;
    Ok(match local_image_root()? {
        Some(root) => client.with_local_images(root),
        None => client,
    })
}

/// API key wins; otherwise a service account; otherwise an unauthenticated
/// client whose calls all fail (every image then gets the neutral score).
async fn build_authenticated_vision_client(
    config: &ModerationConfig,
) -> anyhow::Result<VisionClient> {
    if let Some(key) = non_empty_env("VISION_API_KEY") {
        return Ok(VisionClient::with_api_key(key, config.image_timeout()));
    }

    if non_empty_env("GOOGLE_SERVICE_ACCOUNT_KEY").is_some()
        || non_empty_env("GOOGLE_SERVICE_ACCOUNT_JSON").is_some()
    {
        let auth = ServiceAccountAuth::from_env(CLOUD_VISION_SCOPE)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load service account: {}", e))?;
        tracing::info!(account = %auth.client_email(), "Using service account for Cloud Vision");
        return Ok(VisionClient::with_service_account(auth, config.image_timeout()));
    }

    tracing::warn!("No Cloud Vision credentials configured, image analysis will fall back");
    Ok(VisionClient::with_api_key(String::new(), config.image_timeout()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = load_config().await?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let database_url =
        non_empty_env("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let store = SqliteModerationStore::connect(&database_url).await?;
    tracing::info!(database = %database_url, "Moderation store ready");

    let gemini_key = non_empty_env("GEMINI_API_KEY").unwrap_or_else(|| {
        tracing::warn!("GEMINI_API_KEY is not set, text analysis will use rule checks only");
        String::new()
    });
    let ai_client = GeminiClient::new(gemini_key, config.text_timeout());

    let vision_client = build_vision_client(&config).await?;

    let service = Arc::new(ModerationService::new(
        store,
        ai_client,
        vision_client,
        &config,
    ));
    let worker = QueueWorker::new(service, &config);

    tokio::select! {
        _ = worker.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown requested, stopping moderation worker");
        }
    }

    Ok(())
}
