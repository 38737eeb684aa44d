use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use tracing::warn;

use crate::errors::AppError;
use crate::intake::extract::{extract_text, DocumentKind};
use crate::intake::{analyze_resume, AnalyzeResponse};
use crate::payments::pipeline::normalize_job_posting;
use crate::state::AppState;

struct Upload {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    AppError::Validation(format!("Invalid upload: {e}"))
}

/// POST /analyze
///
/// Multipart fields: `resume` (file, required) and `job_posting` (text, optional).
pub async fn handle_analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalyzeResponse>), AppError> {
    let mut upload: Option<Upload> = None;
    let mut job_posting: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("resume") => {
                let file_name = field.file_name().unwrap_or("resume").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(bad_multipart)?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    data,
                });
            }
            Some("job_posting") => job_posting = Some(field.text().await.map_err(bad_multipart)?),
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("Missing 'resume' file".to_string()))?;
    if upload.data.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    if upload.data.len() > state.config.max_upload_bytes {
        return Err(AppError::Validation(format!(
            "File is larger than {} bytes",
            state.config.max_upload_bytes
        )));
    }
    let kind = DocumentKind::detect(&upload.file_name, upload.content_type.as_deref()).ok_or_else(|| {
        AppError::Validation("Unsupported file type; upload a PDF, DOCX or text file".to_string())
    })?;
    let job_posting = normalize_job_posting(job_posting.as_deref())?;

    let text = extract_text(kind, upload.data).await.map_err(|e| {
        warn!(file_name = %upload.file_name, "Text extraction failed: {e}");
        AppError::UnprocessableEntity(e.to_string())
    })?;

    let response = analyze_resume(
        &state.db,
        state.analyzer.as_ref(),
        state.config.llm_timeout,
        &upload.file_name,
        &text,
        job_posting.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}
