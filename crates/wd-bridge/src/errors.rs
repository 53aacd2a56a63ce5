use axum::http::StatusCode;
use axum::response::IntoResponse;
use mcloud_scheduler::ExecError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("The requested resource could not be found, or a request was received using an HTTP method that is not supported by the mapped resource: {method} {path}")]
    RouteNotFound { method: String, path: String },
    #[error("Method '{0}' has not yet been implemented")]
    CommandNotImplemented(String),
    #[error("{0}")]
    PayloadValidation(String),
    #[error("{0}")]
    InvalidSession(String),
    #[error("A new session could not be created. Details: {0}")]
    SessionNotCreated(String),
    #[error("{0}")]
    CommandFailed(String),
    #[error("{0}")]
    InvalidConfiguration(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub value: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub stacktrace: String,
}

impl BridgeError {
    pub fn unknown_session(session_id: &str) -> Self {
        BridgeError::InvalidSession(format!(
            "A session is either terminated or not started: '{session_id}'"
        ))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            BridgeError::CommandNotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            BridgeError::PayloadValidation(_) => StatusCode::BAD_REQUEST,
            BridgeError::InvalidSession(_) => StatusCode::NOT_FOUND,
            BridgeError::SessionNotCreated(_)
            | BridgeError::CommandFailed(_)
            | BridgeError::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// W3C error code.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::RouteNotFound { .. } => "unknown command",
            BridgeError::CommandNotImplemented(_) => "unknown method",
            BridgeError::PayloadValidation(_) => "invalid argument",
            BridgeError::InvalidSession(_) => "invalid session id",
            BridgeError::SessionNotCreated(_) => "session not created",
            BridgeError::CommandFailed(_) | BridgeError::InvalidConfiguration(_) => "unknown error",
        }
    }

    /// Maps an executor failure. `createSession` failures other than bad
    /// arguments become [`BridgeError::SessionNotCreated`].
    pub fn from_exec(command: &str, err: ExecError) -> Self {
        match err {
            ExecError::NotImplemented(name) => BridgeError::CommandNotImplemented(name),
            ExecError::SessionTerminal(message) => BridgeError::InvalidSession(message),
            ExecError::InvalidArgument(message) => BridgeError::PayloadValidation(message),
            ExecError::SessionNotCreated(message) => BridgeError::SessionNotCreated(message),
            other if command == "createSession" => BridgeError::SessionNotCreated(other.to_string()),
            other => BridgeError::CommandFailed(other.to_string()),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            value: ErrorBody {
                error: self.code(),
                message: self.to_string(),
                stacktrace: String::new(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}
