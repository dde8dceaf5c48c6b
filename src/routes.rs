//! HTTP handlers
//!
//! Each task route turns its request body into a [`TaskRequest`], hands it to
//! the gateway, and shapes the [`TaskOutput`] into the route's response.

use crate::app::App;
use crate::models::{
    DocumentSolveInput, ImageInput, Payload, ScreenshotInput, TaskKind, TaskOutput, TaskRequest,
    VoiceInput, DEFAULT_MAX_TOKENS, DEFAULT_QUESTION, DEFAULT_TEMPERATURE,
};
use crate::{Error, Result};
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

const SERVICE_NAME: &str = "nanobot-worker";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON body extractor whose rejections use the crate error envelope.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> Error {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return Error::PayloadTooLarge(rejection.body_text());
    }
    Error::Validation(rejection.body_text())
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return Error::PayloadTooLarge(e.body_text());
    }
    Error::Validation(e.body_text())
}

pub async fn root() -> Json<Value> {
    let endpoints: serde_json::Map<String, Value> = TaskKind::ALL
        .iter()
        .map(|kind| {
            (
                kind.name().to_string(),
                json!({ "method": "POST", "path": kind.route() }),
            )
        })
        .chain([
            (
                "health".to_string(),
                json!({ "method": "GET", "path": "/health" }),
            ),
            (
                "cleanup".to_string(),
                json!({ "method": "POST", "path": "/cleanup" }),
            ),
        ])
        .collect();

    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "description": "Task gateway for document solving, screenshots, image generation and voiceovers",
        "health": "/health",
        "endpoints": endpoints,
    }))
}

pub async fn health() -> Json<Value> {
    let mut endpoints = vec!["/", "/health"];
    endpoints.extend(TaskKind::ALL.iter().map(|kind| kind.route()));
    endpoints.push("/cleanup");

    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": VERSION,
        "endpoints": endpoints,
    }))
}

pub async fn cleanup(State(app): State<Arc<App>>) -> Json<Value> {
    let report = app.guard().reclaim_blocking().await;
    tracing::info!(
        "Manual cleanup (trimmed: {}, memory_mb: {:?})",
        report.trimmed,
        report.resident_mb()
    );

    Json(json!({
        "status": "success",
        "memory_mb": report.resident_mb(),
        "message": "Memory cleanup completed",
    }))
}

pub async fn not_found(uri: Uri) -> Error {
    Error::NotFound(uri.path().to_string())
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> Error {
    Error::MethodNotAllowed(format!("{} {}", method, uri.path()))
}

pub async fn solve_pdf(
    State(app): State<Arc<App>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>> {
    let mut multipart = multipart.map_err(|e| Error::Validation(e.body_text()))?;

    let mut file: Option<(Vec<u8>, Option<String>)> = None;
    let mut question = None;
    let mut max_tokens = None;
    let mut temperature = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().map(|ct| ct.to_ascii_lowercase());
                let mut limit = app.guard().upload_limit();
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    limit.accept(chunk.len())?;
                    bytes.extend_from_slice(&chunk);
                }
                file = Some((bytes, content_type));
            }
            "question" => question = Some(text_field(field).await?),
            "max_tokens" => max_tokens = Some(parse_field::<u32>("max_tokens", field).await?),
            "temperature" => temperature = Some(parse_field::<f32>("temperature", field).await?),
            other => tracing::debug!("Ignoring unexpected form field '{}'", other),
        }
    }

    let (bytes, content_type) =
        file.ok_or_else(|| Error::Validation("Missing required form field 'file'".to_string()))?;

    let input = DocumentSolveInput {
        file: bytes,
        content_type,
        question: question
            .filter(|q: &String| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUESTION.to_string()),
        max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: temperature.unwrap_or(DEFAULT_TEMPERATURE),
    };

    let output = app
        .gateway()
        .dispatch(TaskRequest::DocumentSolve(input))
        .await?;

    let solution = match output.payload {
        Payload::Text(text) => text,
        Payload::Binary { .. } => {
            return Err(Error::Internal(
                "document solve produced a binary payload".to_string(),
            ))
        }
    };

    Ok(Json(json!({
        "status": "success",
        "solution": solution,
        "model": output.model,
        "tokens_used": output.tokens_used,
    })))
}

async fn text_field(field: Field<'_>) -> Result<String> {
    field.text().await.map_err(multipart_error)
}

async fn parse_field<T>(name: &str, field: Field<'_>) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = text_field(field).await?;
    raw.trim()
        .parse()
        .map_err(|e| Error::Validation(format!("Invalid {} '{}': {}", name, raw.trim(), e)))
}

pub async fn screenshot(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    ValidatedJson(input): ValidatedJson<ScreenshotInput>,
) -> Result<Response> {
    let output = app
        .gateway()
        .dispatch(TaskRequest::Screenshot(input))
        .await?;
    media_response(output, "screenshot", "screenshot", wants_json(&headers))
}

pub async fn generate_image(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    ValidatedJson(input): ValidatedJson<ImageInput>,
) -> Result<Response> {
    let output = app
        .gateway()
        .dispatch(TaskRequest::ImageGenerate(input))
        .await?;
    media_response(output, "image", "generated_image", wants_json(&headers))
}

pub async fn voiceover(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    ValidatedJson(input): ValidatedJson<VoiceInput>,
) -> Result<Response> {
    let output = app
        .gateway()
        .dispatch(TaskRequest::VoiceSynthesize(input))
        .await?;
    media_response(output, "audio", "voiceover", wants_json(&headers))
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false)
}

/// Raw bytes with a download filename, or the base64 JSON envelope.
fn media_response(output: TaskOutput, field: &str, stem: &str, as_json: bool) -> Result<Response> {
    let (bytes, format) = match output.payload {
        Payload::Binary { bytes, format } => (bytes, format),
        Payload::Text(_) => {
            return Err(Error::Internal(format!(
                "{} route produced a text payload",
                stem
            )))
        }
    };

    if as_json {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let mut body = serde_json::Map::new();
        body.insert("status".to_string(), json!("success"));
        body.insert(field.to_string(), json!(encoded));
        body.insert("format".to_string(), json!(format.as_str()));
        return Ok(Json(Value::Object(body)).into_response());
    }

    let disposition = format!("attachment; filename={}.{}", stem, format.extension());
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| Error::Internal(format!("Invalid content disposition: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaFormat;
    use pretty_assertions::assert_eq;

    fn png_output() -> TaskOutput {
        TaskOutput::binary(crate::providers::mock::TINY_PNG.to_vec(), MediaFormat::Png)
    }

    #[test]
    fn test_binary_response_headers() {
        let response = media_response(png_output(), "image", "generated_image", false).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=generated_image.png"
        );
    }

    #[tokio::test]
    async fn test_json_response_carries_base64_and_format() {
        use base64::Engine as _;

        let response = media_response(png_output(), "image", "generated_image", true).unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["status"], "success");
        assert_eq!(body["format"], "png");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(body["image"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, crate::providers::mock::TINY_PNG.to_vec());
    }

    #[test]
    fn test_text_payload_on_media_route_is_internal() {
        let output = TaskOutput::text("not media".to_string());
        let err = media_response(output, "audio", "voiceover", false).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_accept_header_selects_json() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers));
    }

    #[tokio::test]
    async fn test_health_is_stable() {
        let Json(first) = health().await;
        let Json(second) = health().await;
        assert_eq!(first, second);
        assert_eq!(first["status"], "healthy");
    }

    #[tokio::test]
    async fn test_root_lists_task_endpoints() {
        let Json(body) = root().await;
        assert_eq!(body["endpoints"]["voiceover"]["path"], "/voiceover");
        assert_eq!(body["endpoints"]["solve_pdf"]["method"], "POST");
    }
}
