//! Eligibility rules deciding whether a request gets prerendered

use crate::bots;
use crate::config::PrerenderSettings;
use crate::error::PrerenderError;
use crate::request::RequestView;
use crate::target;
use hyper::Method;
use url::Url;

/// Why a request was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not a GET
    Method,
    /// URL could not be parsed unambiguously
    InvalidUrl,
    /// Path ends in a static-resource extension
    StaticResource,
    /// Whitelist configured and nothing matched
    NotWhitelisted,
    /// URL or Referer matched the blacklist
    Blacklisted,
    /// Neither a crawler User-Agent nor an escaped fragment
    NotBot,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Method => "method",
            RejectReason::InvalidUrl => "invalid_url",
            RejectReason::StaticResource => "static_resource",
            RejectReason::NotWhitelisted => "not_whitelisted",
            RejectReason::Blacklisted => "blacklisted",
            RejectReason::NotBot => "not_bot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

pub fn should_intercept(request: &RequestView, settings: &PrerenderSettings) -> bool {
    evaluate(request, settings).is_admit()
}

/// Run every rule; the first veto is the one reported.
///
/// Every rule is a hard veto, so the admit/reject outcome does not depend on
/// the order they run in.
pub fn evaluate(request: &RequestView, settings: &PrerenderSettings) -> Verdict {
    if request.method != Method::GET {
        return Verdict::Reject(RejectReason::Method);
    }

    // "http:///page" would otherwise parse with "page" as the host
    if request.host.is_empty() && settings.host.is_none() {
        return Verdict::Reject(RejectReason::InvalidUrl);
    }

    let url = target::original_url(request, settings);
    let parsed = match parse_url(&url) {
        Ok(parsed) => parsed,
        Err(_) => return Verdict::Reject(RejectReason::InvalidUrl),
    };

    if has_blacklisted_extension(parsed.path(), settings) {
        return Verdict::Reject(RejectReason::StaticResource);
    }

    if !settings.whitelist.is_empty() && !settings.whitelist.iter().any(|re| re.is_match(&url)) {
        return Verdict::Reject(RejectReason::NotWhitelisted);
    }

    if !settings.blacklist.is_empty() {
        let referer = request.referer.as_deref();
        let hit = settings
            .blacklist
            .iter()
            .any(|re| re.is_match(&url) || referer.is_some_and(|r| re.is_match(r)));
        if hit {
            return Verdict::Reject(RejectReason::Blacklisted);
        }
    }

    if !bots::is_bot(request.user_agent.as_deref(), &url) {
        return Verdict::Reject(RejectReason::NotBot);
    }

    Verdict::Admit
}

/// Parse a request URL, refusing queries that contain a second `?`
pub fn parse_url(url: &str) -> Result<Url, PrerenderError> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    if let Some((_, query)) = without_fragment.split_once('?') {
        if query.contains('?') {
            return Err(PrerenderError::InvalidUrl(format!("ambiguous query string: {}", url)));
        }
    }
    Url::parse(url).map_err(|e| PrerenderError::InvalidUrl(format!("{}: {}", url, e)))
}

fn has_blacklisted_extension(path: &str, settings: &PrerenderSettings) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => settings
            .extension_blacklist
            .contains(&ext.to_ascii_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrerenderOptions;

    const HOST: &str = "127.0.0.1:8888";

    fn settings() -> PrerenderSettings {
        PrerenderOptions::default().resolve_with(|_| None).unwrap()
    }

    fn bot(path: &str) -> RequestView {
        RequestView::get(HOST, path).with_user_agent("baiduspider")
    }

    #[test]
    fn test_known_bot_is_admitted() {
        assert_eq!(evaluate(&bot("/foo?bar=true"), &settings()), Verdict::Admit);
    }

    #[test]
    fn test_escaped_fragment_is_admitted() {
        let req = RequestView::get(HOST, "/?_escaped_fragment_=").with_user_agent("Not a known bot");
        assert!(should_intercept(&req, &settings()));
    }

    #[test]
    fn test_non_bot_is_rejected() {
        let req = RequestView::get(HOST, "/").with_user_agent("not a bot");
        assert_eq!(evaluate(&req, &settings()), Verdict::Reject(RejectReason::NotBot));

        let req = RequestView::get(HOST, "/");
        assert_eq!(evaluate(&req, &settings()), Verdict::Reject(RejectReason::NotBot));
    }

    #[test]
    fn test_non_get_is_rejected() {
        for method in [Method::POST, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS] {
            let mut req = bot("/?_escaped_fragment_=");
            req.method = method.clone();
            assert_eq!(
                evaluate(&req, &settings()),
                Verdict::Reject(RejectReason::Method),
                "method {}",
                method
            );
        }
    }

    #[test]
    fn test_static_resources_are_rejected() {
        for path in ["/foo.css", "/app.js", "/img/logo.PNG", "/fonts/a.woff2", "/doc.pdf?v=2"] {
            assert_eq!(
                evaluate(&bot(path), &settings()),
                Verdict::Reject(RejectReason::StaticResource),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_extension_only_checks_last_segment() {
        assert!(should_intercept(&bot("/v1.css/page"), &settings()));
        assert!(should_intercept(&bot("/release-1.2"), &settings()));
        assert!(should_intercept(&bot("/page.html"), &settings()));
        assert!(should_intercept(&bot("/dir/"), &settings()));
    }

    #[test]
    fn test_extension_query_does_not_count() {
        assert!(should_intercept(&bot("/page?file=style.css"), &settings()));
    }

    #[test]
    fn test_ambiguous_query_is_rejected() {
        let mut req = RequestView::get(HOST, "/?query=params?_escaped_fragment_=");
        req.user_agent = Some("not a bot".to_string());
        assert_eq!(evaluate(&req, &settings()), Verdict::Reject(RejectReason::InvalidUrl));

        req.method = Method::POST;
        assert!(!should_intercept(&req, &settings()));
    }

    #[test]
    fn test_unparseable_host_is_rejected() {
        let req = RequestView::get("bad host", "/").with_user_agent("baiduspider");
        assert_eq!(evaluate(&req, &settings()), Verdict::Reject(RejectReason::InvalidUrl));

        let req = RequestView::get("example.com:notaport", "/").with_user_agent("baiduspider");
        assert!(!should_intercept(&req, &settings()));
    }

    #[test]
    fn test_missing_host_is_rejected_unless_overridden() {
        let req = RequestView::get("", "/page").with_user_agent("baiduspider");
        assert_eq!(evaluate(&req, &settings()), Verdict::Reject(RejectReason::InvalidUrl));

        let mut options = PrerenderOptions::default();
        options.host = Some("www.example.com".to_string());
        let settings = options.resolve_with(|_| None).unwrap();
        assert!(should_intercept(&req, &settings));
    }

    #[test]
    fn test_whitelist() {
        let settings = PrerenderOptions::default()
            .with_whitelist(&["/blog/", "^http://127\\.0\\.0\\.1:8888/about$"])
            .resolve_with(|_| None)
            .unwrap();

        assert!(should_intercept(&bot("/blog/post-1"), &settings));
        assert!(should_intercept(&bot("/about"), &settings));
        assert_eq!(
            evaluate(&bot("/shop"), &settings),
            Verdict::Reject(RejectReason::NotWhitelisted)
        );
        assert!(!should_intercept(&bot("/about/team"), &settings));
    }

    #[test]
    fn test_blacklist_by_url() {
        let settings = PrerenderOptions::default()
            .with_blacklist(&["/admin", "/private/.*"])
            .resolve_with(|_| None)
            .unwrap();

        assert_eq!(
            evaluate(&bot("/admin/users"), &settings),
            Verdict::Reject(RejectReason::Blacklisted)
        );
        assert!(!should_intercept(&bot("/private/x"), &settings));
        assert!(should_intercept(&bot("/public"), &settings));
    }

    #[test]
    fn test_blacklist_by_referer() {
        let settings = PrerenderOptions::default()
            .with_blacklist(&["spam\\.example"])
            .resolve_with(|_| None)
            .unwrap();

        let req = bot("/page").with_referer("http://spam.example/links");
        assert_eq!(evaluate(&req, &settings), Verdict::Reject(RejectReason::Blacklisted));

        let req = bot("/page").with_referer("http://friendly.example/links");
        assert!(should_intercept(&req, &settings));
    }

    #[test]
    fn test_static_resource_veto_beats_whitelist() {
        let settings = PrerenderOptions::default()
            .with_whitelist(&[".*"])
            .resolve_with(|_| None)
            .unwrap();
        assert!(!should_intercept(&bot("/foo.css"), &settings));
    }

    #[test]
    fn test_parse_url() {
        assert!(parse_url("http://127.0.0.1:8888/foo?bar=true").is_ok());
        assert!(parse_url("http://127.0.0.1:8888/a#frag?x").is_ok());
        assert!(matches!(
            parse_url("http://127.0.0.1:8888/?a=b?c"),
            Err(PrerenderError::InvalidUrl(_))
        ));
        assert!(parse_url("://x").is_err());
    }
}
