//! Decoding of `POST /api/control/invoke` bodies.

use crate::scratch::sanitize_filename;
use crate::server::ServerError;
use crate::types::UploadedFile;
use hyper::{header, Body, Request};
use serde_json::Value;
use tracing::{debug, warn};

/// The query and uploads carried by one invoke request.
#[derive(Debug)]
pub struct ControlRequest {
    pub query: String,
    pub files: Vec<UploadedFile>,
}

impl ControlRequest {
    /// Accepts `multipart/form-data` (an `input` field plus `file` parts)
    /// or a JSON body `{"input": "..."}`.
    pub async fn from_request(req: Request<Body>) -> Result<Self, ServerError> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match multer::parse_boundary(&content_type) {
            Ok(boundary) => Self::from_multipart(req.into_body(), boundary).await,
            Err(_) => {
                let body = hyper::body::to_bytes(req.into_body())
                    .await
                    .map_err(|e| ServerError::InvalidRequest(format!("failed to read body: {}", e)))?;
                Self::from_json(&body)
            }
        }
    }

    fn from_json(body: &[u8]) -> Result<Self, ServerError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ServerError::MissingInput);
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ServerError::InvalidRequest(format!("body is not valid JSON: {}", e)))?;
        let query = value
            .get("input")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or(ServerError::MissingInput)?;
        Ok(Self {
            query: query.to_string(),
            files: Vec::new(),
        })
    }

    async fn from_multipart(body: Body, boundary: String) -> Result<Self, ServerError> {
        let mut multipart = multer::Multipart::new(body, boundary);
        let mut query = None;
        let mut files = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::InvalidRequest(format!("malformed multipart body: {}", e)))?
        {
            let name = field.name().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);

            match (name.as_deref(), file_name) {
                (Some("input"), None) => {
                    let raw = field
                        .text()
                        .await
                        .map_err(|e| ServerError::InvalidRequest(format!("unreadable input field: {}", e)))?;
                    query = input_field_query(&raw);
                }
                (_, Some(filename)) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ServerError::InvalidRequest(format!("unreadable file part: {}", e)))?;
                    // Browsers send an empty, unnamed part when no file was picked.
                    if filename.trim().is_empty() && bytes.is_empty() {
                        continue;
                    }
                    if sanitize_filename(&filename).is_none() {
                        return Err(ServerError::InvalidRequest(format!(
                            "file part has no usable file name '{}'",
                            filename
                        )));
                    }
                    debug!(%filename, size = bytes.len(), "Received file part.");
                    files.push(UploadedFile { filename, bytes });
                }
                (other, None) => {
                    warn!(field = ?other, "Ignoring unexpected form field.");
                }
            }
        }

        let query = query.ok_or(ServerError::MissingInput)?;
        Ok(Self { query, files })
    }
}

/// The `input` form field is either the query itself or a JSON object
/// wrapping it as `{"input": "..."}`.
fn input_field_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let query = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map.get("input").and_then(Value::as_str)?.trim().to_string(),
        _ => trimmed.to_string(),
    };
    if query.is_empty() {
        None
    } else {
        Some(query)
    }
}
