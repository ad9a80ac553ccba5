//! Centralized error types for the Connect Render core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes for the discovery endpoint
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::dlna::soap::SoapError;
use crate::rest::RestError;
use crate::session::SessionError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse => "soap_parse_error",
        }
    }
}

impl ErrorCode for RestError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Decode(_) => "decode_error",
        }
    }
}

/// Application-wide error type for the Connect Render server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum RenderError {
    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authentication with the vendor REST API failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The Connect WebSocket session could not be established or was lost.
    #[error("Session error: {0}")]
    Session(String),

    /// A DLNA/UPnP SOAP call failed.
    #[error("DLNA error: {0}")]
    Dlna(String),

    /// The configured local audio device could not be resolved.
    #[error("Local audio device error: {0}")]
    LocalAudio(String),

    /// Client sent an invalid or malformed request to the discovery endpoint.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested track is not registered with the audio proxy.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// The audio proxy's upstream CDN request failed or returned an error status.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Internal error that does not fit another category.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenderError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Authentication(_) => "authentication_error",
            Self::Session(_) => "session_error",
            Self::Dlna(_) => "dlna_error",
            Self::LocalAudio(_) => "local_audio_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::TrackNotFound(_) => "track_not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TrackNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SoapError> for RenderError {
    fn from(err: SoapError) -> Self {
        Self::Dlna(err.to_string())
    }
}

impl From<RestError> for RenderError {
    fn from(err: RestError) -> Self {
        Self::Authentication(err.to_string())
    }
}

impl From<SessionError> for RenderError {
    fn from(err: SessionError) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<DiscoveryError> for RenderError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::InvalidBody(msg) => Self::InvalidRequest(msg),
            DiscoveryError::Internal(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_not_found_returns_correct_code() {
        let err = RenderError::TrackNotFound("abc".into());
        assert_eq!(err.code(), "track_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn configuration_error_returns_service_unavailable() {
        let err = RenderError::Configuration("missing email".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
