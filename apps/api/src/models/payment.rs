use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::catalog::{ProductId, ProductOrBundle, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(SessionStatus::Created),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentSessionRow {
    pub id: String,
    pub analysis_id: String,
    pub product_or_bundle: String,
    pub products: Json<Vec<ProductId>>,
    pub amount: i64,
    pub currency: String,
    pub region: String,
    pub promo_code: Option<String>,
    pub status: String,
    pub checkout_url: Option<String>,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One checkout attempt for an analysis.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub id: String,
    pub analysis_id: Uuid,
    pub product_or_bundle: ProductOrBundle,
    /// The expansion of `product_or_bundle` at creation time.
    pub products: Vec<ProductId>,
    pub amount: i64,
    pub currency: String,
    pub region: Region,
    pub promo_code: Option<String>,
    pub status: SessionStatus,
    pub checkout_url: Option<String>,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentSessionRow> for PaymentSession {
    type Error = anyhow::Error;

    fn try_from(row: PaymentSessionRow) -> Result<Self, Self::Error> {
        Ok(PaymentSession {
            analysis_id: Uuid::parse_str(&row.analysis_id)
                .with_context(|| format!("bad analysis id on session {}", row.id))?,
            product_or_bundle: ProductOrBundle::parse(&row.product_or_bundle)
                .ok_or_else(|| anyhow!("bad product_or_bundle '{}'", row.product_or_bundle))?,
            products: row.products.0,
            amount: row.amount,
            currency: row.currency,
            region: Region::parse(&row.region)
                .ok_or_else(|| anyhow!("bad region '{}'", row.region))?,
            promo_code: row.promo_code,
            status: SessionStatus::parse(&row.status)
                .ok_or_else(|| anyhow!("bad session status '{}'", row.status))?,
            checkout_url: row.checkout_url,
            provider: row.provider,
            created_at: row.created_at,
            completed_at: row.completed_at,
            id: row.id,
        })
    }
}
