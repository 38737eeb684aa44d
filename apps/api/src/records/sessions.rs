use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::catalog::{ProductId, ProductOrBundle, Region};
use crate::errors::AppError;
use crate::models::payment::{PaymentSession, PaymentSessionRow};

pub struct NewSession<'a> {
    pub id: &'a str,
    pub analysis_id: Uuid,
    pub product_or_bundle: ProductOrBundle,
    pub products: &'a [ProductId],
    pub amount: i64,
    pub currency: &'a str,
    pub region: Region,
    pub promo_code: Option<&'a str>,
    pub checkout_url: Option<&'a str>,
    pub provider: &'a str,
}

/// Writes a session with `status = created`.
pub async fn insert_session(
    pool: &SqlitePool,
    new: NewSession<'_>,
    now: DateTime<Utc>,
) -> Result<PaymentSession, AppError> {
    sqlx::query(
        r#"
        INSERT INTO payment_sessions
            (id, analysis_id, product_or_bundle, products, amount, currency, region,
             promo_code, status, checkout_url, provider, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'created', ?, ?, ?)
        "#,
    )
    .bind(new.id)
    .bind(new.analysis_id.to_string())
    .bind(new.product_or_bundle.as_str())
    .bind(Json(new.products))
    .bind(new.amount)
    .bind(new.currency)
    .bind(new.region.as_str())
    .bind(new.promo_code)
    .bind(new.checkout_url)
    .bind(new.provider)
    .bind(now)
    .execute(pool)
    .await?;

    get_session(pool, new.id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("session {} vanished after insert", new.id)))
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> Result<Option<PaymentSession>, AppError> {
    let row = sqlx::query_as::<_, PaymentSessionRow>("SELECT * FROM payment_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(PaymentSession::try_from).transpose()?)
}

/// An open checkout for the same purchase, if the user already started one.
pub async fn find_open_session(
    pool: &SqlitePool,
    analysis_id: Uuid,
    item: ProductOrBundle,
    amount: i64,
    currency: &str,
) -> Result<Option<PaymentSession>, AppError> {
    let row = sqlx::query_as::<_, PaymentSessionRow>(
        r#"
        SELECT * FROM payment_sessions
        WHERE analysis_id = ? AND product_or_bundle = ? AND amount = ? AND currency = ?
          AND status = 'created'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(analysis_id.to_string())
    .bind(item.as_str())
    .bind(amount)
    .bind(currency)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(PaymentSession::try_from).transpose()?)
}

/// `created → completed`. False if the session was not open.
pub async fn complete_session(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE payment_sessions SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'created'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `created → cancelled`. False if the session was not open.
pub async fn cancel_session(pool: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE payment_sessions SET status = 'cancelled' WHERE id = ? AND status = 'created'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Whether another session of the same analysis already completed.
pub async fn other_completed_session(
    pool: &SqlitePool,
    analysis_id: Uuid,
    id: &str,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payment_sessions WHERE analysis_id = ? AND id != ? AND status = 'completed'",
    )
    .bind(analysis_id.to_string())
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::payment::SessionStatus;
    use crate::records::analyses::{insert_analysis, NewAnalysis};

    async fn seed_session(pool: &SqlitePool, id: &str) -> PaymentSession {
        let analysis = insert_analysis(
            pool,
            NewAnalysis {
                id: Uuid::new_v4(),
                file_name: "cv.pdf",
                source_text: "text",
                job_posting: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        insert_session(
            pool,
            NewSession {
                id,
                analysis_id: analysis.id,
                product_or_bundle: ProductOrBundle::Product(ProductId::ResumeAnalysis),
                products: &[ProductId::ResumeAnalysis],
                amount: 1000,
                currency: "usd",
                region: Region::Us,
                promo_code: None,
                checkout_url: Some("https://checkout.test/cs_1"),
                provider: "mock",
            },
            Utc::now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_completion_happens_once() {
        let pool = test_pool().await;
        let session = seed_session(&pool, "cs_test_1").await;
        assert_eq!(session.status, SessionStatus::Created);

        assert!(complete_session(&pool, "cs_test_1", Utc::now()).await.unwrap());
        assert!(!complete_session(&pool, "cs_test_1", Utc::now()).await.unwrap());
        assert!(!cancel_session(&pool, "cs_test_1").await.unwrap());

        let reloaded = get_session(&pool, "cs_test_1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Completed);
        assert!(reloaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_open_session_lookup_matches_purchase() {
        let pool = test_pool().await;
        let session = seed_session(&pool, "cs_test_2").await;
        let item = ProductOrBundle::Product(ProductId::ResumeAnalysis);

        let found = find_open_session(&pool, session.analysis_id, item, 1000, "usd")
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some("cs_test_2".to_string()));

        let other_amount = find_open_session(&pool, session.analysis_id, item, 500, "usd")
            .await
            .unwrap();
        assert!(other_amount.is_none());

        cancel_session(&pool, "cs_test_2").await.unwrap();
        let after_cancel = find_open_session(&pool, session.analysis_id, item, 1000, "usd")
            .await
            .unwrap();
        assert!(after_cancel.is_none());
    }
}
