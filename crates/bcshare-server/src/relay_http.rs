use crate::AppState;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use storage::RelayError;
use tokio_util::io::ReaderStream;

/// Relay errors as HTTP responses.
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError(e)
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError(RelayError::Validation(format!("bad multipart body: {e}")))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError(RelayError::Validation(format!("bad request body: {}", e.body_text())))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            RelayError::AccessDenied => (StatusCode::FORBIDDEN, self.0.to_string()),
            RelayError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RelayError::NotFoundOrExpired => (StatusCode::NOT_FOUND, self.0.to_string()),
            RelayError::Storage(e) => {
                tracing::error!("Relay storage failure: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct CodeRequest {
    #[serde(default)]
    code: String,
}

#[derive(Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    code: String,
    originalname: Option<String>,
    size: Option<u64>,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn lightning_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "chunkSize": state.relay.upload_chunk_size() }))
}

pub async fn validate_code(
    State(state): State<AppState>,
    req: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req?;
    Ok(Json(json!({ "valid": state.relay.validate_code(&req.code) })))
}

pub async fn upload_init(
    State(state): State<AppState>,
    req: Result<Json<InitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req?;
    // A wrong code is refused before missing fields are reported.
    if !state.relay.validate_code(&req.code) {
        return Err(RelayError::AccessDenied.into());
    }
    let name = req.originalname.ok_or_else(|| missing("originalname"))?;
    let size = req.size.ok_or_else(|| missing("size"))?;

    let id = state.relay.init_upload(&req.code, &name, size).await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn upload_chunk(State(state): State<AppState>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let mut fields = HashMap::new();
    let mut chunk = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "chunk" {
            chunk = Some(field.bytes().await?);
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let text = |key: &str| -> Result<String, ApiError> {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| missing(key))
    };
    let number = |key: &str| -> Result<u32, ApiError> {
        text(key)?
            .trim()
            .parse()
            .map_err(|_| ApiError(RelayError::Validation(format!("{key} is not a number"))))
    };

    let code = fields.get("code").cloned().unwrap_or_default();
    if !state.relay.validate_code(&code) {
        return Err(RelayError::AccessDenied.into());
    }
    let id = text("id")?;
    let chunk_index = number("chunkIndex")?;
    let total_chunks = number("totalChunks")?;
    let chunk = chunk.ok_or_else(|| ApiError(RelayError::Validation("missing chunk".into())))?;

    let outcome = state
        .relay
        .upload_chunk(&code, &id, chunk_index, total_chunks, &chunk)
        .await?;
    Ok(Json(json!({ "success": true, "complete": outcome.complete, "id": id })))
}

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let mut code = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("code") => code = Some(field.text().await?),
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                file = Some((name, field.bytes().await?));
            }
            _ => {}
        }
    }

    // Check the code before complaining about anything else.
    let code = code.unwrap_or_default();
    if !state.relay.validate_code(&code) {
        return Err(RelayError::AccessDenied.into());
    }
    let (name, data) = file.ok_or_else(|| ApiError(RelayError::Validation("no file uploaded".into())))?;

    let id = state.relay.create_upload(&code, &name, &data).await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn metadata(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let record = state.relay.fetch_metadata(&id).await?;
    Ok(Json(json!({ "success": true, "data": record.metadata() })))
}

pub async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let (record, reader) = state.relay.open_download(&id).await?;
    tracing::info!("Serving download {} ({} bytes)", record.id, record.size);

    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&record.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn missing(field: &str) -> ApiError {
    ApiError(RelayError::Validation(format!("missing field {field}")))
}

/// `attachment; filename="..."` with only the last path component and no
/// characters that could break out of the quoted string.
fn content_disposition(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .filter(|c| *c != '"')
        .collect();
    let cleaned = if cleaned.trim().is_empty() { "download".to_string() } else { cleaned };
    format!("attachment; filename=\"{cleaned}\"")
}
