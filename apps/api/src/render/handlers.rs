use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::payments::pipeline::{GenerationReport, ResultsView};
use crate::render::export::{export, ExportFormat};
use crate::render::html::render_results_html;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub product_or_bundle: Option<String>,
}

/// GET /results/:analysis_id?product_or_bundle=
pub async fn handle_get_results(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsView>, AppError> {
    let view = state
        .pipeline()
        .get_results(analysis_id, query.product_or_bundle.as_deref())
        .await?;
    Ok(Json(view))
}

/// GET /results/:analysis_id/view
pub async fn handle_results_page(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Result<Html<String>, AppError> {
    let view = state
        .pipeline()
        .get_results(analysis_id, query.product_or_bundle.as_deref())
        .await?;
    Ok(Html(render_results_html(&view)))
}

/// POST /results/:analysis_id/retry
pub async fn handle_retry(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> Result<Json<GenerationReport>, AppError> {
    let report = state.pipeline().retry_generation(analysis_id).await?;
    Ok(Json(report))
}

/// GET /export/:analysis_id/:format
pub async fn handle_export(
    State(state): State<AppState>,
    Path((analysis_id, format)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let format = ExportFormat::parse(&format)
        .ok_or_else(|| AppError::Validation(format!("Unsupported export format '{format}'")))?;
    let view = state.pipeline().get_results(analysis_id, None).await?;

    // Rendering is CPU bound; keep it off the async workers.
    let bytes = tokio::task::spawn_blocking(move || export(&view, format))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| {
            error!(%analysis_id, "Export failed: {e}");
            AppError::Internal(e.into())
        })?;

    let disposition = format!(
        "attachment; filename=\"resume-review-{analysis_id}.{}\"",
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
