//! Read-only view of an incoming request, as the prerender core sees it

use hyper::header::{HeaderName, HOST, REFERER, USER_AGENT};
use hyper::{HeaderMap, Method, Request};

/// Header set by Cloudflare when it terminates TLS in front of the site
pub const CF_VISITOR: &str = "cf-visitor";
/// Header set by TLS-terminating load balancers such as Heroku's router
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The parts of a request the prerender core needs.
///
/// `host` is the host exactly as the server saw it, port included. The
/// path and query are kept byte-for-byte as received.
#[derive(Debug, Clone)]
pub struct RequestView {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    pub path_and_query: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub cf_visitor: Option<String>,
    pub forwarded_proto: Option<String>,
}

impl RequestView {
    pub fn new(method: Method, scheme: &str, host: &str, path_and_query: &str) -> Self {
        Self {
            method,
            scheme: scheme.to_string(),
            host: host.to_string(),
            path_and_query: path_and_query.to_string(),
            user_agent: None,
            referer: None,
            cf_visitor: None,
            forwarded_proto: None,
        }
    }

    /// Shorthand for a plain-HTTP GET, mostly useful in tests
    pub fn get(host: &str, path_and_query: &str) -> Self {
        Self::new(Method::GET, "http", host, path_and_query)
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    /// Build a view from a hyper request without consuming it
    pub fn from_request<B>(req: &Request<B>, is_tls: bool) -> Self {
        let headers = req.headers();
        let host = header_string(headers, &HOST)
            .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Self {
            method: req.method().clone(),
            scheme: if is_tls { "https" } else { "http" }.to_string(),
            host,
            path_and_query: path_and_query.to_string(),
            user_agent: header_string(headers, &USER_AGENT),
            referer: header_string(headers, &REFERER),
            cf_visitor: header_string(headers, &HeaderName::from_static(CF_VISITOR)),
            forwarded_proto: header_string(headers, &HeaderName::from_static(X_FORWARDED_PROTO)),
        }
    }

    /// The request URL as received, before any protocol or host overrides
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path_and_query)
    }
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
