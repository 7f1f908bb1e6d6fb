//! Outbound fetch against the rendering service

use crate::config::PrerenderSettings;
use crate::error::PrerenderError;
use crate::request::RequestView;
use flate2::read::MultiGzDecoder;
use hyper::body::Bytes;
use hyper::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, USER_AGENT};
use hyper::{HeaderMap, StatusCode};
use std::io::Read;
use tracing::debug;

/// Header carrying the rendering service credential
pub const X_PRERENDER_TOKEN: &str = "x-prerender-token";

/// A rendered page, either fetched or handed back by a cache hook
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RenderResult {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// HTTP client for the rendering service.
///
/// Redirects are never followed; a 3xx from the service is relayed as the
/// result.
pub struct RenderClient {
    http: reqwest::Client,
    token: Option<String>,
    forward_user_agent: bool,
}

impl RenderClient {
    pub fn new(settings: &PrerenderSettings) -> Result<Self, PrerenderError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| PrerenderError::Config(format!("failed to build render client: {}", e)))?;

        Ok(Self {
            http,
            token: settings.token.clone(),
            forward_user_agent: settings.forward_user_agent,
        })
    }

    /// GET `url` and return status, headers and decoded body.
    ///
    /// Any status code is a success here. Only transport errors, timeouts and
    /// corrupt gzip bodies fail.
    pub async fn fetch(&self, url: &str, request: &RequestView) -> Result<RenderResult, PrerenderError> {
        let mut outbound = self.http.get(url).header(ACCEPT_ENCODING, "gzip");
        if let Some(ref token) = self.token {
            outbound = outbound.header(X_PRERENDER_TOKEN, token);
        }
        if self.forward_user_agent {
            if let Some(ref ua) = request.user_agent {
                outbound = outbound.header(USER_AGENT, ua);
            }
        }

        let response = outbound
            .send()
            .await
            .map_err(|e| PrerenderError::fetch_failed(url, e))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| PrerenderError::fetch_failed(url, e))?;

        let body = decode_body(url, &mut headers, body)?;

        Ok(RenderResult { status, headers, body })
    }
}

/// Undo gzip content encoding, dropping the headers that described it
fn decode_body(url: &str, headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, PrerenderError> {
    if !is_gzip(headers) {
        return Ok(body);
    }
    headers.remove(CONTENT_ENCODING);
    headers.remove(CONTENT_LENGTH);

    // Redirects and 204/304 carry the header with nothing to inflate
    if body.is_empty() {
        return Ok(body);
    }

    let decoded = decode_gzip(&body).map_err(|e| PrerenderError::fetch_failed(url, e))?;
    debug!(url, compressed = body.len(), decoded = decoded.len(), "Decoded gzip render body");
    Ok(decoded)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
        })
        .unwrap_or(false)
}

/// Inflate a gzip body, including every member of a concatenated stream
pub fn decode_gzip(compressed: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = MultiGzDecoder::new(compressed);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}
