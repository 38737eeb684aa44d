use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::analysis::results::{FreeOutcome, ProductOutcome};
use crate::catalog::ProductId;

/// Payment state of an analysis. Moves `unpaid → paid` or `unpaid → failed`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Aggregate state of premium generation for an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    NotStarted,
    InProgress,
    Complete,
    Partial,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::NotStarted => "not_started",
            GenerationStatus::InProgress => "in_progress",
            GenerationStatus::Complete => "complete",
            GenerationStatus::Partial => "partial",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(GenerationStatus::NotStarted),
            "in_progress" => Some(GenerationStatus::InProgress),
            "complete" => Some(GenerationStatus::Complete),
            "partial" => Some(GenerationStatus::Partial),
            "failed" => Some(GenerationStatus::Failed),
            _ => None,
        }
    }

    /// Folds per-product results into the overall status.
    pub fn from_counts(ready: usize, failed: usize, pending: usize) -> Self {
        if pending > 0 {
            GenerationStatus::InProgress
        } else if ready == 0 && failed == 0 {
            GenerationStatus::NotStarted
        } else if failed == 0 {
            GenerationStatus::Complete
        } else if ready == 0 {
            GenerationStatus::Failed
        } else {
            GenerationStatus::Partial
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: String,
    pub file_name: String,
    pub source_text: String,
    pub job_posting: Option<String>,
    pub free_result: Option<Json<FreeOutcome>>,
    pub requested_products: Json<Vec<ProductId>>,
    pub payment_status: String,
    pub generation_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One uploaded resume and everything derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub file_name: String,
    #[serde(skip)]
    pub source_text: String,
    pub job_posting: Option<String>,
    pub free_result: Option<FreeOutcome>,
    pub requested_products: Vec<ProductId>,
    pub payment_status: PaymentStatus,
    pub generation_status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for AnalysisRecord {
    type Error = anyhow::Error;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(AnalysisRecord {
            id: Uuid::parse_str(&row.id).with_context(|| format!("bad analysis id '{}'", row.id))?,
            file_name: row.file_name,
            source_text: row.source_text,
            job_posting: row.job_posting,
            free_result: row.free_result.map(|j| j.0),
            requested_products: row.requested_products.0,
            payment_status: PaymentStatus::parse(&row.payment_status)
                .ok_or_else(|| anyhow!("bad payment_status '{}'", row.payment_status))?,
            generation_status: GenerationStatus::parse(&row.generation_status)
                .ok_or_else(|| anyhow!("bad generation_status '{}'", row.generation_status))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Per-product generation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumStatus {
    Pending,
    Ready,
    Failed,
}

impl PremiumStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PremiumStatus::Pending => "pending",
            PremiumStatus::Ready => "ready",
            PremiumStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PremiumStatus::Pending),
            "ready" => Some(PremiumStatus::Ready),
            "failed" => Some(PremiumStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PremiumResultRow {
    pub analysis_id: String,
    pub product: String,
    pub status: String,
    pub outcome: Option<Json<ProductOutcome>>,
    pub updated_at: DateTime<Utc>,
}

/// One product's entry in an analysis' premium results.
#[derive(Debug, Clone, Serialize)]
pub struct PremiumResult {
    pub product: ProductId,
    pub status: PremiumStatus,
    pub outcome: Option<ProductOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PremiumResultRow> for PremiumResult {
    type Error = anyhow::Error;

    fn try_from(row: PremiumResultRow) -> Result<Self, Self::Error> {
        Ok(PremiumResult {
            product: ProductId::parse(&row.product)
                .ok_or_else(|| anyhow!("bad product '{}' for {}", row.product, row.analysis_id))?,
            status: PremiumStatus::parse(&row.status)
                .ok_or_else(|| anyhow!("bad premium status '{}'", row.status))?,
            outcome: row.outcome.map(|j| j.0),
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_status_folding() {
        assert_eq!(GenerationStatus::from_counts(3, 0, 0), GenerationStatus::Complete);
        assert_eq!(GenerationStatus::from_counts(2, 1, 0), GenerationStatus::Partial);
        assert_eq!(GenerationStatus::from_counts(0, 2, 0), GenerationStatus::Failed);
        assert_eq!(GenerationStatus::from_counts(1, 1, 1), GenerationStatus::InProgress);
        assert_eq!(GenerationStatus::from_counts(0, 0, 0), GenerationStatus::NotStarted);
    }
}
