use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::forecast_models::SoapFault;

/// Credential exchange failure.
///
/// Cloneable so a single failed exchange can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The token endpoint could not be reached.
    Unreachable(String),
    /// The token endpoint answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The token endpoint answered with an unexpected payload.
    MalformedGrant(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Unreachable(msg) => {
                write!(f, "Token endpoint unreachable: {}", msg)
            }
            CredentialError::Rejected { status, body } => {
                write!(f, "Token exchange rejected ({}): {}", status, body)
            }
            CredentialError::MalformedGrant(msg) => {
                write!(f, "Malformed token grant: {}", msg)
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// A forecast request that violates its structural contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// No creative sizes were supplied.
    NoCreativeSizes,
    /// The end date precedes a concrete start date.
    EndBeforeStart { start: String, end: String },
    /// A custom targeting entry without any value ids.
    EmptyCustomValues { key_id: i64 },
    /// An id that must be numeric is not.
    NonNumericId { field: &'static str, value: String },
    /// The XML writer failed.
    Writer(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::NoCreativeSizes => {
                write!(f, "At least one creative size is required")
            }
            CompileError::EndBeforeStart { start, end } => {
                write!(f, "End date {} is before start date {}", end, start)
            }
            CompileError::EmptyCustomValues { key_id } => {
                write!(f, "Custom targeting key {} has no value ids", key_id)
            }
            CompileError::NonNumericId { field, value } => {
                write!(f, "{} must contain numeric ids, got \"{}\"", field, value)
            }
            CompileError::Writer(msg) => write!(f, "Failed to write request XML: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// A success envelope that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not well-formed XML.
    Malformed(String),
    /// The envelope lacks the forecast result element.
    MissingResult,
    /// A required element is missing.
    MissingField(&'static str),
    /// A numeric element could not be parsed.
    InvalidNumber { field: &'static str, value: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "Malformed forecast response: {}", msg),
            DecodeError::MissingResult => {
                write!(f, "Forecast response has no getAvailabilityForecastResponse/rval")
            }
            DecodeError::MissingField(field) => {
                write!(f, "Forecast response is missing required field '{}'", field)
            }
            DecodeError::InvalidNumber { field, value } => {
                write!(f, "Field '{}' is not a valid integer: \"{}\"", field, value)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failed outcome of a forecast call.
#[derive(Debug)]
pub enum ForecastError {
    /// Could not obtain a bearer token.
    Credential(CredentialError),
    /// The request violates its contract; nothing was sent.
    Compile(CompileError),
    /// The forecast endpoint could not be reached.
    Transport(String),
    /// The forecast service rejected the request.
    RemoteFault(SoapFault),
    /// The success envelope could not be decoded.
    Decode(DecodeError),
    /// The forecast queue is at capacity.
    QueueFull { capacity: usize },
    /// The queued task ended without producing a result.
    TaskAborted,
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastError::Credential(e) => write!(f, "Credential error: {}", e),
            ForecastError::Compile(e) => write!(f, "Invalid forecast request: {}", e),
            ForecastError::Transport(msg) => write!(f, "Forecast transport error: {}", msg),
            ForecastError::RemoteFault(fault) => write!(f, "Forecast fault: {}", fault),
            ForecastError::Decode(e) => write!(f, "Decode error: {}", e),
            ForecastError::QueueFull { capacity } => {
                write!(f, "Forecast queue is full ({} pending requests)", capacity)
            }
            ForecastError::TaskAborted => write!(f, "Forecast task aborted before completion"),
        }
    }
}

impl std::error::Error for ForecastError {}

impl From<CredentialError> for ForecastError {
    fn from(err: CredentialError) -> Self {
        ForecastError::Credential(err)
    }
}

impl From<CompileError> for ForecastError {
    fn from(err: CompileError) -> Self {
        ForecastError::Compile(err)
    }
}

impl From<DecodeError> for ForecastError {
    fn from(err: DecodeError) -> Self {
        ForecastError::Decode(err)
    }
}

impl From<reqwest::Error> for ForecastError {
    fn from(err: reqwest::Error) -> Self {
        ForecastError::Transport(err.to_string())
    }
}

/// Application-specific error types for the HTTP surface.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The remote forecast service returned a fault; shown verbatim.
    RemoteFault(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// The service is temporarily saturated.
    ServiceUnavailable(String),
    /// Internal server error.
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::RemoteFault(msg) => write!(f, "Remote fault: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    ///
    /// Remote faults and upstream errors are passed through unchanged so the
    /// caller can show them as-is.
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::RemoteFault(msg) => {
                tracing::warn!("Forecast fault: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ForecastError> for AppError {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::Compile(e) => AppError::BadRequest(e.to_string()),
            ForecastError::RemoteFault(fault) => AppError::RemoteFault(fault.fault_string),
            ForecastError::QueueFull { .. } => AppError::ServiceUnavailable(err.to_string()),
            ForecastError::TaskAborted => AppError::InternalError(err.to_string()),
            ForecastError::Credential(_)
            | ForecastError::Transport(_)
            | ForecastError::Decode(_) => AppError::ExternalApiError(err.to_string()),
        }
    }
}
