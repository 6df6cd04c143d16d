use hyper::StatusCode;
use std::fmt;

/// Failures of the HTTP front end itself. Pipeline failures never end up
/// here; they travel inside the envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerError {
    MissingInput,
    InvalidRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServerError::MissingInput => write!(f, "Missing 'input' field"),
            ServerError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ServerError::NotFound(path) => write!(f, "Not found: {}", path),
            ServerError::Internal(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::MissingInput | ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
