//! Error taxonomy for the prerender core and JSON error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Errors raised inside the prerender core.
///
/// Only [`PrerenderError::Config`] ever escapes to a caller. Every other variant
/// is absorbed by [`crate::prerender::Prerender::intercept`] and turned into a
/// pass-through, so the site stays available when prerendering breaks.
#[derive(Debug, Error)]
pub enum PrerenderError {
    /// The incoming request URL could not be parsed unambiguously
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    /// Transport failure, timeout, or undecodable body from the rendering service
    #[error("render fetch failed for {url}: {reason}")]
    RenderFetchFailed { url: String, reason: String },

    /// A cache hook returned an error
    #[error("{hook} hook failed: {reason}")]
    HookFailure { hook: &'static str, reason: String },

    /// Structurally invalid options, reported once at startup
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PrerenderError {
    pub(crate) fn fetch_failed(url: &str, reason: impl std::fmt::Display) -> Self {
        PrerenderError::RenderFetchFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn hook_failed(hook: &'static str, err: &anyhow::Error) -> Self {
        PrerenderError::HookFailure {
            hook,
            reason: format!("{:#}", err),
        }
    }
}

/// Error codes for failures the gateway reports to clients
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// The origin application could not be reached
    OriginUnavailable,
    /// Origin did not answer within the request timeout
    RequestTimeout,
}

impl GatewayErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::OriginUnavailable => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::OriginUnavailable => "ORIGIN_UNAVAILABLE",
            GatewayErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Gateway-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
