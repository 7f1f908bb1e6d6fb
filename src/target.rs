//! Rendering-service URL construction

use crate::config::PrerenderSettings;
use crate::request::RequestView;
use serde::Deserialize;

#[derive(Deserialize)]
struct CfVisitor {
    scheme: Option<String>,
}

/// The fully qualified URL the client asked for, as the site sees it.
///
/// Scheme precedence: the `protocol` option, then the first value of
/// `X-Forwarded-Proto`, then Cloudflare's `CF-Visitor`, then the connection.
/// The `host` option replaces the Host header. Path and query are untouched.
pub fn original_url(request: &RequestView, settings: &PrerenderSettings) -> String {
    let scheme = settings
        .protocol
        .as_deref()
        .or_else(|| forwarded_scheme(request))
        .or_else(|| cloudflare_scheme(request))
        .unwrap_or(request.scheme.as_str());
    let host = settings.host.as_deref().unwrap_or(request.host.as_str());

    format!("{}://{}{}", scheme, host, request.path_and_query)
}

/// `service_url` followed by the original URL, with no re-encoding
pub fn build_render_url(request: &RequestView, settings: &PrerenderSettings) -> String {
    format!("{}{}", settings.service_url, original_url(request, settings))
}

fn forwarded_scheme(request: &RequestView) -> Option<&'static str> {
    let first = request.forwarded_proto.as_deref()?.split(',').next()?.trim();
    known_scheme(first)
}

fn cloudflare_scheme(request: &RequestView) -> Option<&'static str> {
    let visitor: CfVisitor = serde_json::from_str(request.cf_visitor.as_deref()?).ok()?;
    known_scheme(visitor.scheme.as_deref()?)
}

fn known_scheme(value: &str) -> Option<&'static str> {
    if value.eq_ignore_ascii_case("https") {
        Some("https")
    } else if value.eq_ignore_ascii_case("http") {
        Some("http")
    } else {
        None
    }
}
