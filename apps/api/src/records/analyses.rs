//! Persistence for analysis records and their per-product premium results.
//!
//! Every state transition is a conditional UPDATE; the returned bool says
//! whether this caller performed it. Premium results live one row per
//! (analysis, product), so concurrent product writes never overlap.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::analysis::results::{FreeOutcome, ProductOutcome};
use crate::catalog::ProductId;
use crate::errors::AppError;
use crate::models::analysis::{
    AnalysisRecord, AnalysisRow, GenerationStatus, PaymentStatus, PremiumResult,
    PremiumResultRow, PremiumStatus,
};

pub struct NewAnalysis<'a> {
    pub id: Uuid,
    pub file_name: &'a str,
    pub source_text: &'a str,
    pub job_posting: Option<&'a str>,
}

pub async fn insert_analysis(
    pool: &SqlitePool,
    new: NewAnalysis<'_>,
    now: DateTime<Utc>,
) -> Result<AnalysisRecord, AppError> {
    sqlx::query(
        r#"
        INSERT INTO analyses
            (id, file_name, source_text, job_posting, requested_products,
             payment_status, generation_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, '[]', 'unpaid', 'not_started', ?, ?)
        "#,
    )
    .bind(new.id.to_string())
    .bind(new.file_name)
    .bind(new.source_text)
    .bind(new.job_posting)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_analysis(pool, new.id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("analysis {} vanished after insert", new.id)))
}

pub async fn get_analysis(pool: &SqlitePool, id: Uuid) -> Result<Option<AnalysisRecord>, AppError> {
    let row = sqlx::query_as::<_, AnalysisRow>("SELECT * FROM analyses WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(AnalysisRecord::try_from).transpose()?)
}

/// Loads a record or fails with NotFound.
pub async fn require_analysis(pool: &SqlitePool, id: Uuid) -> Result<AnalysisRecord, AppError> {
    get_analysis(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Analysis {id} not found")))
}

/// Sets the free result once; later calls are no-ops.
pub async fn set_free_result(
    pool: &SqlitePool,
    id: Uuid,
    outcome: &FreeOutcome,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE analyses SET free_result = ?, updated_at = ? WHERE id = ? AND free_result IS NULL",
    )
    .bind(Json(outcome))
    .bind(now)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Records what the user intends to buy. Only allowed while unpaid.
pub async fn set_requested_products(
    pool: &SqlitePool,
    id: Uuid,
    products: &[ProductId],
    job_posting: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE analyses
        SET requested_products = ?, job_posting = COALESCE(?, job_posting), updated_at = ?
        WHERE id = ? AND payment_status = 'unpaid'
        "#,
    )
    .bind(Json(products))
    .bind(job_posting)
    .bind(now)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `unpaid → paid`, pinning the product set that was actually paid for.
pub async fn mark_paid(
    pool: &SqlitePool,
    id: Uuid,
    products: &[ProductId],
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE analyses
        SET payment_status = 'paid', requested_products = ?, updated_at = ?
        WHERE id = ? AND payment_status = 'unpaid'
        "#,
    )
    .bind(Json(products))
    .bind(now)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `unpaid → failed`.
pub async fn mark_payment_failed(
    pool: &SqlitePool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE analyses SET payment_status = ?, updated_at = ? WHERE id = ? AND payment_status = ?",
    )
    .bind(PaymentStatus::Failed.as_str())
    .bind(now)
    .bind(id.to_string())
    .bind(PaymentStatus::Unpaid.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_generation_status(
    pool: &SqlitePool,
    id: Uuid,
    status: GenerationStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE analyses SET generation_status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Claims a product for generation: inserts a `pending` row, or flips a
/// `failed` row back to `pending`. A `pending` row untouched since
/// `stale_before` is treated as abandoned and reclaimed. Returns false when
/// the product is ready or still owned by a live generation.
pub async fn claim_product(
    pool: &SqlitePool,
    id: Uuid,
    product: ProductId,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO premium_results (analysis_id, product, status, outcome, created_at, updated_at)
        VALUES (?, ?, 'pending', NULL, ?, ?)
        ON CONFLICT (analysis_id, product) DO UPDATE
            SET status = 'pending', outcome = NULL, updated_at = excluded.updated_at
            WHERE premium_results.status = 'failed'
               OR (premium_results.status = 'pending'
                   AND julianday(premium_results.updated_at) < julianday(?))
        "#,
    )
    .bind(id.to_string())
    .bind(product.as_str())
    .bind(now)
    .bind(now)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Stores one product's outcome. Touches only that product's row.
pub async fn store_product_outcome(
    pool: &SqlitePool,
    id: Uuid,
    product: ProductId,
    outcome: &ProductOutcome,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let status = if outcome.is_ok() {
        PremiumStatus::Ready
    } else {
        PremiumStatus::Failed
    };
    sqlx::query(
        r#"
        UPDATE premium_results
        SET status = ?, outcome = ?, updated_at = ?
        WHERE analysis_id = ? AND product = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(Json(outcome))
    .bind(now)
    .bind(id.to_string())
    .bind(product.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_premium_results(
    pool: &SqlitePool,
    id: Uuid,
) -> Result<Vec<PremiumResult>, AppError> {
    let rows = sqlx::query_as::<_, PremiumResultRow>(
        "SELECT * FROM premium_results WHERE analysis_id = ? ORDER BY created_at, product",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    let mut results = rows
        .into_iter()
        .map(PremiumResult::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    results.sort_by_key(|r| r.product);
    Ok(results)
}
