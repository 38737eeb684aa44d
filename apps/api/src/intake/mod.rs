//! Resume intake: extraction, record creation and the free critique.

pub mod extract;
pub mod handlers;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::analyzer::ResumeAnalyzer;
use crate::analysis::results::{AnalysisOutcome, FreeOutcome, OutcomeErrorKind};
use crate::errors::AppError;
use crate::records::analyses::{insert_analysis, set_free_result, NewAnalysis};

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis_id: Uuid,
    pub file_name: String,
    pub free_result: FreeOutcome,
    pub created_at: DateTime<Utc>,
}

/// Creates the analysis record, then asks for the free critique.
///
/// The record exists even when the model call fails, so the caller can
/// still see it; `free_result` stays empty in that case.
pub async fn analyze_resume(
    db: &SqlitePool,
    analyzer: &dyn ResumeAnalyzer,
    llm_timeout: Duration,
    file_name: &str,
    resume_text: &str,
    job_posting: Option<&str>,
) -> Result<AnalyzeResponse, AppError> {
    let record = insert_analysis(
        db,
        NewAnalysis {
            id: Uuid::new_v4(),
            file_name,
            source_text: resume_text,
            job_posting,
        },
        Utc::now(),
    )
    .await?;
    info!(analysis_id = %record.id, chars = resume_text.len(), "Analysis created");

    let outcome = match tokio::time::timeout(llm_timeout, analyzer.free_critique(resume_text)).await {
        Ok(outcome) => outcome,
        Err(_) => AnalysisOutcome::failed(OutcomeErrorKind::Timeout, "Free critique timed out"),
    };

    match outcome.error_kind() {
        Some(kind @ (OutcomeErrorKind::Upstream | OutcomeErrorKind::Timeout)) => {
            warn!(analysis_id = %record.id, ?kind, "Free critique unavailable");
            return Err(AppError::Llm(format!(
                "free critique for {} failed: {kind:?}",
                record.id
            )));
        }
        Some(kind) => warn!(analysis_id = %record.id, ?kind, "Storing failed free critique"),
        None => {}
    }

    set_free_result(db, record.id, &outcome, Utc::now()).await?;
    Ok(AnalyzeResponse {
        analysis_id: record.id,
        file_name: record.file_name,
        free_result: outcome,
        created_at: record.created_at,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::analysis::results::{FreeCritique, ProductOutcome};
    use crate::catalog::ProductId;
    use crate::db::test_pool;
    use crate::models::analysis::PaymentStatus;
    use crate::records::analyses::require_analysis;

    struct FixedAnalyzer(FreeOutcome);

    #[async_trait]
    impl ResumeAnalyzer for FixedAnalyzer {
        async fn free_critique(&self, _resume_text: &str) -> FreeOutcome {
            self.0.clone()
        }

        async fn premium(
            &self,
            _product: ProductId,
            _resume_text: &str,
            _job_posting: Option<&str>,
        ) -> ProductOutcome {
            AnalysisOutcome::failed(OutcomeErrorKind::Upstream, "unused")
        }
    }

    fn critique() -> FreeOutcome {
        AnalysisOutcome::Ok {
            result: FreeCritique {
                overall_score: 64,
                summary: "Clear layout, weak impact statements".to_string(),
                top_issues: vec!["No metrics".to_string()],
                strengths: vec!["Concise".to_string()],
            },
        }
    }

    #[tokio::test]
    async fn test_free_critique_is_stored() {
        let pool = test_pool().await;
        let analyzer = FixedAnalyzer(critique());
        let response = analyze_resume(
            &pool,
            &analyzer,
            Duration::from_secs(5),
            "cv.pdf",
            "Jane Doe",
            Some("Rust role"),
        )
        .await
        .unwrap();

        let record = require_analysis(&pool, response.analysis_id).await.unwrap();
        assert_eq!(record.free_result, Some(critique()));
        assert_eq!(record.payment_status, PaymentStatus::Unpaid);
        assert_eq!(record.job_posting.as_deref(), Some("Rust role"));
    }

    #[tokio::test]
    async fn test_upstream_failure_leaves_free_result_empty() {
        let pool = test_pool().await;
        let analyzer = FixedAnalyzer(AnalysisOutcome::failed(OutcomeErrorKind::Upstream, "down"));
        let err = analyze_resume(&pool, &analyzer, Duration::from_secs(5), "cv.pdf", "Jane", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));

        let stored: Option<String> = sqlx::query_scalar("SELECT free_result FROM analyses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_malformed_answer_is_kept_as_tagged_error() {
        let pool = test_pool().await;
        let malformed: FreeOutcome = AnalysisOutcome::Error {
            kind: OutcomeErrorKind::MalformedOutput,
            message: "missing overall_score".to_string(),
            raw: Some("{\"summary\":\"ok\"}".to_string()),
        };
        let analyzer = FixedAnalyzer(malformed.clone());
        let response = analyze_resume(&pool, &analyzer, Duration::from_secs(5), "cv.txt", "Jane", None)
            .await
            .unwrap();
        assert_eq!(response.free_result, malformed);

        let record = require_analysis(&pool, response.analysis_id).await.unwrap();
        assert_eq!(record.free_result, Some(malformed));
    }
}
