//! Promotional codes: validation, discount arithmetic and redemption tracking.
//!
//! Usage limits: `max_uses` caps uses across all analyses, and each analysis
//! can use a given code at most once. A use is reserved when checkout starts,
//! which is where the cap is enforced, and becomes a redemption when payment
//! is confirmed. An expired or failed checkout hands its reservation back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::pricing::Price;
use crate::catalog::ProductOrBundle;
use crate::errors::AppError;
use crate::models::promo::{DiscountType, PromoCode, PromoCodeRow};

/// Result of applying a code to a base price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountedPrice {
    pub code: String,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub currency: &'static str,
}

/// Request body for creating a code.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub currency: Option<String>,
    pub applies_to: Option<ProductOrBundle>,
    pub max_uses: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Applies a discount to `base`. The result is always within `[0, base]`.
pub fn apply_discount(discount_type: DiscountType, value: i64, base: i64) -> i64 {
    let base = base.max(0);
    let reduced = match discount_type {
        DiscountType::Percentage => {
            let pct = value.clamp(0, 100);
            base - base * pct / 100
        }
        DiscountType::Fixed => base.saturating_sub(value.max(0)),
    };
    reduced.clamp(0, base)
}

pub async fn get_promo_code(pool: &SqlitePool, code: &str) -> Result<Option<PromoCode>, AppError> {
    let row = sqlx::query_as::<_, PromoCodeRow>("SELECT * FROM promo_codes WHERE code = ?")
        .bind(normalize_code(code))
        .fetch_optional(pool)
        .await?;
    Ok(row.map(PromoCode::try_from).transpose()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UseStatus {
    Reserved,
    Redeemed,
}

async fn use_status(
    pool: &SqlitePool,
    code: &str,
    analysis_id: Uuid,
) -> Result<Option<UseStatus>, AppError> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM promo_redemptions WHERE code = ? AND analysis_id = ?",
    )
    .bind(code)
    .bind(analysis_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(status.map(|s| match s.as_str() {
        "redeemed" => UseStatus::Redeemed,
        _ => UseStatus::Reserved,
    }))
}

/// Checks a code against an item and base price and returns the discounted price.
///
/// Rejections (all `Validation`): unknown, inactive, not yet valid, expired,
/// usage limit reached, restricted to another item, fixed amount in another
/// currency, already redeemed by this analysis.
pub async fn validate_code(
    pool: &SqlitePool,
    code: &str,
    item: ProductOrBundle,
    base: Price,
    analysis_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DiscountedPrice, AppError> {
    let promo = get_promo_code(pool, code)
        .await?
        .ok_or_else(|| AppError::Validation("Promo code is not valid".to_string()))?;

    if !promo.is_active {
        return Err(AppError::Validation("Promo code is no longer active".to_string()));
    }
    if promo.valid_from.is_some_and(|from| now < from) {
        return Err(AppError::Validation("Promo code is not valid yet".to_string()));
    }
    if promo.valid_until.is_some_and(|until| now > until) {
        return Err(AppError::Validation("Promo code has expired".to_string()));
    }
    let held = match use_status(pool, &promo.code, analysis_id).await? {
        Some(UseStatus::Redeemed) => {
            return Err(AppError::Validation(
                "Promo code was already used for this resume".to_string(),
            ))
        }
        Some(UseStatus::Reserved) => true,
        None => false,
    };
    if !held && promo.max_uses.is_some_and(|max| promo.current_uses >= max) {
        return Err(AppError::Validation(
            "Promo code has reached its usage limit".to_string(),
        ));
    }
    if promo.applies_to.is_some_and(|target| target != item) {
        return Err(AppError::Validation(format!(
            "Promo code does not apply to {item}"
        )));
    }
    if promo.discount_type == DiscountType::Fixed
        && promo
            .currency
            .as_deref()
            .is_some_and(|c| !c.eq_ignore_ascii_case(base.currency))
    {
        return Err(AppError::Validation(
            "Promo code is not valid in this region".to_string(),
        ));
    }
    let final_amount = apply_discount(promo.discount_type, promo.discount_value, base.amount);
    Ok(DiscountedPrice {
        code: promo.code,
        base_amount: base.amount,
        discount_amount: base.amount - final_amount,
        final_amount,
        currency: base.currency,
    })
}

/// Takes one use of `code` for an analysis before checkout starts.
///
/// The counter only moves while it is under `max_uses`, so concurrent
/// checkouts cannot overshoot the cap. An analysis that already holds a
/// reservation keeps it without taking a second use.
pub async fn reserve_use(
    pool: &SqlitePool,
    code: &str,
    analysis_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let code = normalize_code(code);
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO promo_redemptions (code, analysis_id, status, reserved_at)
        VALUES (?, ?, 'reserved', ?)
        ON CONFLICT (code, analysis_id) DO NOTHING
        "#,
    )
    .bind(&code)
    .bind(analysis_id.to_string())
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !inserted {
        let status: String = sqlx::query_scalar(
            "SELECT status FROM promo_redemptions WHERE code = ? AND analysis_id = ?",
        )
        .bind(&code)
        .bind(analysis_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        if status == "redeemed" {
            return Err(AppError::Validation(
                "Promo code was already used for this resume".to_string(),
            ));
        }
        return Ok(());
    }

    let taken = sqlx::query(
        r#"
        UPDATE promo_codes SET current_uses = current_uses + 1
        WHERE code = ? AND (max_uses IS NULL OR current_uses < max_uses)
        "#,
    )
    .bind(&code)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;
    if !taken {
        // Dropping the transaction discards the reservation row.
        return Err(AppError::Validation(
            "Promo code has reached its usage limit".to_string(),
        ));
    }

    tx.commit().await?;
    info!(code = %code, analysis_id = %analysis_id, "Promo code use reserved");
    Ok(())
}

/// Turns the analysis' reservation into a redemption. Repeating it changes nothing.
///
/// A confirmed payment always counts: if the reservation is gone the use is
/// recorded anyway, even when that takes the code past `max_uses`.
pub async fn redeem_use(
    pool: &SqlitePool,
    code: &str,
    analysis_id: Uuid,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let code = normalize_code(code);
    let redeemed = sqlx::query(
        r#"
        UPDATE promo_redemptions SET status = 'redeemed', session_id = ?, redeemed_at = ?
        WHERE code = ? AND analysis_id = ? AND status = 'reserved'
        "#,
    )
    .bind(session_id)
    .bind(now)
    .bind(&code)
    .bind(analysis_id.to_string())
    .execute(pool)
    .await?
    .rows_affected()
        == 1;
    if redeemed {
        info!(code = %code, analysis_id = %analysis_id, "Promo code redeemed");
        return Ok(true);
    }

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO promo_redemptions (code, analysis_id, status, session_id, reserved_at, redeemed_at)
        VALUES (?, ?, 'redeemed', ?, ?, ?)
        ON CONFLICT (code, analysis_id) DO NOTHING
        "#,
    )
    .bind(&code)
    .bind(analysis_id.to_string())
    .bind(session_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;
    if inserted {
        sqlx::query("UPDATE promo_codes SET current_uses = current_uses + 1 WHERE code = ?")
            .bind(&code)
            .execute(&mut *tx)
            .await?;
        warn!(code = %code, analysis_id = %analysis_id, session_id, "Promo code redeemed without a reservation");
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Gives back a reserved use once no open checkout of the analysis carries the code.
pub async fn release_use(pool: &SqlitePool, code: &str, analysis_id: Uuid) -> Result<bool, AppError> {
    let code = normalize_code(code);
    let mut tx = pool.begin().await?;
    let released = sqlx::query(
        r#"
        DELETE FROM promo_redemptions
        WHERE code = ? AND analysis_id = ? AND status = 'reserved'
          AND NOT EXISTS (
              SELECT 1 FROM payment_sessions
              WHERE analysis_id = promo_redemptions.analysis_id
                AND promo_code = promo_redemptions.code
                AND status = 'created'
          )
        "#,
    )
    .bind(&code)
    .bind(analysis_id.to_string())
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;
    if released {
        sqlx::query(
            "UPDATE promo_codes SET current_uses = MAX(current_uses - 1, 0) WHERE code = ?",
        )
        .bind(&code)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    if released {
        info!(code = %code, analysis_id = %analysis_id, "Promo code reservation released");
    }
    Ok(released)
}

pub async fn create_promo_code(
    pool: &SqlitePool,
    new: NewPromoCode,
    now: DateTime<Utc>,
) -> Result<PromoCode, AppError> {
    let code = normalize_code(&new.code);
    if code.is_empty() || code.len() > 64 {
        return Err(AppError::Validation(
            "code must be 1-64 characters".to_string(),
        ));
    }
    if new.discount_value < 0 {
        return Err(AppError::Validation(
            "discount_value cannot be negative".to_string(),
        ));
    }
    if new.discount_type == DiscountType::Percentage && new.discount_value > 100 {
        return Err(AppError::Validation(
            "percentage discounts cannot exceed 100".to_string(),
        ));
    }
    if new.discount_type == DiscountType::Fixed && new.currency.is_none() {
        return Err(AppError::Validation(
            "fixed discounts need a currency".to_string(),
        ));
    }
    if get_promo_code(pool, &code).await?.is_some() {
        return Err(AppError::Conflict(format!("Promo code {code} already exists")));
    }

    sqlx::query(
        r#"
        INSERT INTO promo_codes
            (code, discount_type, discount_value, currency, applies_to, max_uses,
             current_uses, valid_from, valid_until, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?)
        "#,
    )
    .bind(&code)
    .bind(new.discount_type.as_str())
    .bind(new.discount_value)
    .bind(new.currency.map(|c| c.to_ascii_lowercase()))
    .bind(new.applies_to.map(|item| item.as_str()))
    .bind(new.max_uses)
    .bind(new.valid_from)
    .bind(new.valid_until)
    .bind(now)
    .execute(pool)
    .await?;

    info!(code = %code, "Promo code created");
    get_promo_code(pool, &code)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("promo code {code} vanished after insert")))
}
