mod ingress;

pub use ingress::ControlRequest;

use crate::aggregate::ControlOutcome;
use crate::controller::Controller;
use crate::server::ServerError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const INVOKE_PATH: &str = "/api/control/invoke";
pub const HEALTH_PATH: &str = "/health";
/// Carries the base64 JSON envelope when the body is an artifact.
pub const ENVELOPE_HEADER: &str = "X-Execution-Envelope";

/// Main handler for control unit requests
pub async fn control_handler(
    req: Request<Body>,
    controller: Arc<Controller>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (&method, path.as_str()) {
        (&Method::GET, HEALTH_PATH) => json_response(StatusCode::OK, &json!({"status": "ok"})),
        (&Method::POST, INVOKE_PATH) => invoke(req, &controller).await,
        _ => Err(ServerError::NotFound(path.clone())),
    };

    Ok(match result {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                error!(%method, %path, error = %e, "Request failed.");
            } else {
                warn!(%method, %path, error = %e, "Request rejected.");
            }
            error_response(&e)
        }
    })
}

async fn invoke(req: Request<Body>, controller: &Controller) -> Result<Response<Body>, ServerError> {
    let request = ControlRequest::from_request(req).await?;
    let outcome = controller.control(&request.query, request.files).await;
    info!(
        tasks = outcome.envelope.execution_results.len(),
        error = ?outcome.envelope.error,
        artifacts = outcome.artifacts.len(),
        "Control request finished."
    );
    outcome_response(&outcome)
}

/// The JSON envelope, or the produced artifact with the envelope in a header.
pub fn outcome_response(outcome: &ControlOutcome) -> Result<Response<Body>, ServerError> {
    let Some(artifact) = outcome.primary_artifact() else {
        return json_response(StatusCode::OK, &outcome.envelope);
    };

    let envelope = serde_json::to_vec(&outcome.envelope)
        .map_err(|e| ServerError::Internal(format!("failed to serialize envelope: {}", e)))?;
    let filename = artifact.filename.replace(['"', '\\'], "_");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .header(ENVELOPE_HEADER, STANDARD.encode(envelope))
        .body(Body::from(artifact.bytes.clone()))
        .map_err(|e| ServerError::Internal(format!("failed to build artifact response: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, ServerError> {
    let body = serde_json::to_string(body)
        .map_err(|e| ServerError::Internal(format!("failed to serialize response: {}", e)))?;
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|e| ServerError::Internal(format!("failed to build response: {}", e)))
}

fn error_response(error: &ServerError) -> Response<Body> {
    let mut response = Response::new(Body::from(json!({"error": error.to_string()}).to_string()));
    *response.status_mut() = error.status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
