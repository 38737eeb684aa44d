use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::catalog::ProductOrBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is whole percentage points, 0..=100.
    Percentage,
    /// `discount_value` is minor units of `currency`.
    Fixed,
}

impl DiscountType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "percentage" => Some(DiscountType::Percentage),
            "fixed" => Some(DiscountType::Fixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PromoCodeRow {
    pub code: String,
    pub discount_type: String,
    pub discount_value: i64,
    pub currency: Option<String>,
    pub applies_to: Option<String>,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub currency: Option<String>,
    /// Restricts the code to one product or bundle.
    pub applies_to: Option<ProductOrBundle>,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PromoCodeRow> for PromoCode {
    type Error = anyhow::Error;

    fn try_from(row: PromoCodeRow) -> Result<Self, Self::Error> {
        let applies_to = match row.applies_to.as_deref() {
            Some(raw) => Some(
                ProductOrBundle::parse(raw)
                    .ok_or_else(|| anyhow!("bad applies_to '{raw}' on code {}", row.code))?,
            ),
            None => None,
        };
        Ok(PromoCode {
            discount_type: DiscountType::parse(&row.discount_type)
                .ok_or_else(|| anyhow!("bad discount_type '{}'", row.discount_type))?,
            discount_value: row.discount_value,
            currency: row.currency,
            applies_to,
            max_uses: row.max_uses,
            current_uses: row.current_uses,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            is_active: row.is_active,
            created_at: row.created_at,
            code: row.code,
        })
    }
}
