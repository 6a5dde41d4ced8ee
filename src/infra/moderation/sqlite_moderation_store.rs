// SQLite-backed document store for the moderation pipeline.
//
// Tables:
// - products: Marketplace listings (moderation only writes status + moderation_info)
// - moderation_queue: Pending work, one row per product
// - moderation_results: Append-only decision history

use crate::core::moderation::{
    ModerationError, ModerationInfo, ModerationResult, ModerationStore, Product, ProductStatus,
    QueueEntry, QueueStatus,
};
#[cfg(test)]
use crate::core::moderation::{ModerationStatus, StoredModerationResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// Length of generated document ids.
const DOCUMENT_ID_LEN: usize = 20;

/// Random alphanumeric id, the same shape document databases hand out.
pub fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LEN)
        .map(char::from)
        .collect()
}

fn storage_err(e: impl std::fmt::Display) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

/// Fixed-width UTC timestamps, so text comparison in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                price REAL NOT NULL DEFAULT 0,
                images TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending_review',
                moderation_info TEXT,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_queue (
                product_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'queued',
                error TEXT,
                created_at TEXT NOT NULL,
                claimed_at TEXT,
                error_timestamp TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_results (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                status TEXT NOT NULL,
                content_score INTEGER NOT NULL,
                image_score INTEGER NOT NULL,
                compliance_score INTEGER NOT NULL,
                total_score INTEGER NOT NULL,
                issues TEXT NOT NULL DEFAULT '[]',
                suggested_tags TEXT NOT NULL DEFAULT '[]',
                rejection_reason TEXT,
                content_analysis TEXT NOT NULL,
                image_analysis TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_moderation_results_product
                ON moderation_results(product_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Insert or replace a product record.
    #[cfg(test)]
    pub async fn insert_product(&self, product: &Product) -> Result<(), ModerationError> {
        let tags = serde_json::to_string(&product.tags).map_err(storage_err)?;
        let images = serde_json::to_string(&product.images).map_err(storage_err)?;
        let info = product
            .moderation_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO products (id, title, description, category, tags, price, images, status, moderation_info, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                category = excluded.category,
                tags = excluded.tags,
                price = excluded.price,
                images = excluded.images,
                status = excluded.status,
                moderation_info = excluded.moderation_info,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.title)
        .bind(&product.description)
        .bind(&product.category)
        .bind(tags)
        .bind(product.price)
        .bind(images)
        .bind(product.status.as_str())
        .bind(info)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Queue a product for (re-)evaluation. An existing entry is reset to `queued`.
    #[cfg(test)]
    pub async fn enqueue(&self, product_id: &str) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_queue (product_id, status, error, created_at, claimed_at, error_timestamp)
            VALUES (?, 'queued', NULL, ?, NULL, NULL)
            ON CONFLICT(product_id) DO UPDATE SET
                status = 'queued',
                error = NULL,
                claimed_at = NULL,
                error_timestamp = NULL
            "#,
        )
        .bind(product_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Look up a single queue entry.
    #[cfg(test)]
    pub async fn get_entry(&self, product_id: &str) -> Result<Option<QueueEntry>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_queue WHERE product_id = ?")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(row_to_entry).transpose()
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, ModerationError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn pending_entries(&self, limit: usize) -> Result<Vec<QueueEntry>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM moderation_queue
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn claim_entry(&self, product_id: &str) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            "UPDATE moderation_queue SET status = 'processing', claimed_at = ? WHERE product_id = ? AND status = 'queued'",
        )
        .bind(timestamp(Utc::now()))
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_decision(&self, result: &ModerationResult) -> Result<String, ModerationError> {
        let id = generate_document_id();
        let info = ModerationInfo::from_result(&id, result);

        let issues = serde_json::to_string(&result.issues).map_err(storage_err)?;
        let suggested_tags = serde_json::to_string(&result.suggested_tags).map_err(storage_err)?;
        let content_analysis =
            serde_json::to_string(&result.content_analysis).map_err(storage_err)?;
        let image_analysis = serde_json::to_string(&result.image_analysis).map_err(storage_err)?;
        let info_json = serde_json::to_string(&info).map_err(storage_err)?;

        // Result and product status land together or not at all
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO moderation_results (
                id, product_id, status, content_score, image_score, compliance_score,
                total_score, issues, suggested_tags, rejection_reason,
                content_analysis, image_analysis, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&result.product_id)
        .bind(result.status.as_str())
        .bind(result.content_score as i64)
        .bind(result.image_score as i64)
        .bind(result.compliance_score as i64)
        .bind(result.total_score as i64)
        .bind(issues)
        .bind(suggested_tags)
        .bind(result.rejection_reason.as_deref())
        .bind(content_analysis)
        .bind(image_analysis)
        .bind(timestamp(result.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        let updated = sqlx::query(
            "UPDATE products SET status = ?, moderation_info = ?, updated_at = ? WHERE id = ?",
        )
        .bind(result.status.product_status().as_str())
        .bind(info_json)
        .bind(timestamp(Utc::now()))
        .bind(&result.product_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls back the result insert
            return Err(ModerationError::ProductNotFound(result.product_id.clone()));
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(id)
    }

    async fn mark_product_errored(
        &self,
        product_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError> {
        let info = serde_json::to_string(&ModerationInfo::from_error(message, at))
            .map_err(storage_err)?;

        sqlx::query(
            "UPDATE products SET status = ?, moderation_info = ?, updated_at = ? WHERE id = ?",
        )
        .bind(ProductStatus::PendingReview.as_str())
        .bind(info)
        .bind(timestamp(at))
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_entry(&self, product_id: &str) -> Result<(), ModerationError> {
        sqlx::query("DELETE FROM moderation_queue WHERE product_id = ? AND status = 'processing'")
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_entry_failed(
        &self,
        product_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            UPDATE moderation_queue SET status = ?, error = ?, error_timestamp = ?
            WHERE product_id = ? AND status = 'processing'
            "#,
        )
        .bind(QueueStatus::Error.as_str())
        .bind(message)
        .bind(timestamp(at))
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_queue SET status = 'queued', claimed_at = NULL
            WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at < ?)
            "#,
        )
        .bind(timestamp(claimed_before))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() as usize)
    }

    #[cfg(test)]
    async fn results_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<StoredModerationResult>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM moderation_results
            WHERE product_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_result).collect()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(storage_err)
}

/// Decode a JSON text column, failing on malformed content.
fn json_column<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T, ModerationError> {
    let raw: String = row.try_get(column).map_err(storage_err)?;
    serde_json::from_str(&raw)
        .map_err(|e| storage_err(format!("malformed {} column: {}", column, e)))
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, ModerationError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let info_json: Option<String> = row.try_get("moderation_info").map_err(storage_err)?;

    Ok(Product {
        id: row.try_get("id").map_err(storage_err)?,
        title: row.try_get("title").map_err(storage_err)?,
        description: row.try_get("description").map_err(storage_err)?,
        category: row.try_get("category").map_err(storage_err)?,
        tags: json_column(row, "tags")?,
        price: row.try_get("price").map_err(storage_err)?,
        images: json_column(row, "images")?,
        status: ProductStatus::parse(&status)
            .ok_or_else(|| storage_err(format!("unknown product status '{}'", status)))?,
        moderation_info: info_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| storage_err(format!("malformed moderation_info column: {}", e)))?,
    })
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry, ModerationError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let claimed_at: Option<String> = row.try_get("claimed_at").map_err(storage_err)?;
    let error_timestamp: Option<String> = row.try_get("error_timestamp").map_err(storage_err)?;

    Ok(QueueEntry {
        product_id: row.try_get("product_id").map_err(storage_err)?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| storage_err(format!("unknown queue status '{}'", status)))?,
        error: row.try_get("error").map_err(storage_err)?,
        created_at: parse_timestamp(&created_at)?,
        claimed_at: claimed_at.as_deref().map(parse_timestamp).transpose()?,
        error_timestamp: error_timestamp.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[cfg(test)]
fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<StoredModerationResult, ModerationError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let score = |column: &str| -> Result<u32, ModerationError> {
        let value: i64 = row.try_get(column).map_err(storage_err)?;
        u32::try_from(value).map_err(storage_err)
    };

    Ok(StoredModerationResult {
        id: row.try_get("id").map_err(storage_err)?,
        result: ModerationResult {
            product_id: row.try_get("product_id").map_err(storage_err)?,
            status: ModerationStatus::parse(&status)
                .ok_or_else(|| storage_err(format!("unknown moderation status '{}'", status)))?,
            content_score: score("content_score")?,
            image_score: score("image_score")?,
            compliance_score: score("compliance_score")?,
            total_score: score("total_score")?,
            issues: json_column(row, "issues")?,
            suggested_tags: json_column(row, "suggested_tags")?,
            rejection_reason: row.try_get("rejection_reason").map_err(storage_err)?,
            content_analysis: json_column(row, "content_analysis")?,
            image_analysis: json_column(row, "image_analysis")?,
            created_at: parse_timestamp(&created_at)?,
        },
    })
}
