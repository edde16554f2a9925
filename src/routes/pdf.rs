//! PDF conversion endpoints
//!
//! `POST /v1/pdf` renders inline HTML from form fields (multipart or
//! urlencoded); `GET /v1/pdf` fetches and renders a remote URL. Both share
//! one pipeline: validate, probe the cache, render, enforce the output size
//! cap, write the cache back, respond with the PDF as an attachment.

use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Form;

use crate::chrome::{is_session_interrupted, ChromeError};
use crate::error::AppError;
use crate::params::{self, RenderParams};
use crate::state::AppState;
use crate::{fingerprint, cache::PdfCache};

/// POST handler: inline HTML conversion.
pub async fn convert_html(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, AppError> {
    let request_id = request_id(req.headers());
    let fields = read_form_fields(req).await?;
    let params = params::from_html_form(&fields, state.config())?;
    generate_response(&state, params, request_id).await
}

/// GET handler: URL conversion.
pub async fn convert_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let request_id = request_id(&headers);
    let params = params::from_url_query(&query, state.config())?;
    generate_response(&state, params, request_id).await
}

/// Shared cache-render-cache pipeline behind validation.
async fn generate_response(
    state: &AppState,
    params: RenderParams,
    request_id: String,
) -> Result<Response, AppError> {
    let cache_key = fingerprint::cache_key(&params);
    let cache = enabled_cache(state);

    if let Some(cache) = cache {
        if let Some(cached) = cache.get(&cache_key).await {
            return Ok(pdf_response(&params.filename, cached));
        }
    }

    let pdf = state
        .pdf()
        .generate(&params)
        .await
        .map_err(map_render_error)?;

    if pdf.len() > state.config().limits.max_pdf_bytes {
        return Err(AppError::PayloadTooLarge("PDF exceeds allowed size".to_string()));
    }

    if let Some(cache) = cache {
        cache.set(&cache_key, &pdf).await;
    }

    tracing::info!(filename = %params.filename, request_id = %request_id, "PDF generated");
    Ok(pdf_response(&params.filename, pdf))
}

/// The cache handle, only when caching is both configured and connected.
fn enabled_cache(state: &AppState) -> Option<&PdfCache> {
    if state.config().cache.enabled {
        state.cache()
    } else {
        None
    }
}

/// Map render-layer failures to HTTP, logging the raw cause. Timeouts answer
/// 408; a session interruption that survived the transparent retry answers
/// 503; anything else is a sanitized 500.
fn map_render_error(err: ChromeError) -> AppError {
    match err {
        err @ (ChromeError::AcquireTimeout | ChromeError::RenderTimeout) => {
            tracing::error!(error = %err, "PDF generation timeout");
            AppError::RenderTimeout
        }
        err if is_session_interrupted(&err) => {
            tracing::error!(error = %err, "Chrome session interrupted");
            AppError::SessionInterrupted
        }
        err => {
            tracing::error!(error = %err, "PDF generation failed");
            AppError::Internal("PDF generation failed".to_string())
        }
    }
}

fn pdf_response(filename: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Collect text fields from either a multipart or urlencoded form body.
async fn read_form_fields(req: Request) -> Result<HashMap<String, String>, AppError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|err| AppError::Validation(format!("Invalid form: {err}")))?;

        let mut fields = HashMap::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::Validation(format!("Invalid form: {err}")))?
        {
            let Some(name) = field.name().map(ToString::to_string) else {
                continue;
            };
            let value = field
                .text()
                .await
                .map_err(|err| AppError::Validation(format!("Invalid form: {err}")))?;
            fields.insert(name, value);
        }
        Ok(fields)
    } else {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(req, &())
            .await
            .map_err(|err| AppError::Validation(format!("Invalid form: {err}")))?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_errors_map_to_expected_statuses() {
        use axum::http::StatusCode;

        assert_eq!(
            map_render_error(ChromeError::AcquireTimeout).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            map_render_error(ChromeError::RenderTimeout).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            map_render_error(ChromeError::Cancelled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            map_render_error(ChromeError::Launch("target closed".to_string())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            map_render_error(ChromeError::Launch("spawn failed".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn pdf_response_sets_attachment_headers() {
        let response = pdf_response("report.pdf", vec![1, 2, 3]);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION.as_str()],
            "attachment; filename=report.pdf"
        );
    }
}
