//! Crawler detection
//!
//! A request comes from a non-executing client when its User-Agent carries a
//! known crawler token, or when it uses the AJAX crawling scheme's
//! `_escaped_fragment_` query parameter.

use url::form_urlencoded;

/// Query parameter used by the AJAX crawling scheme
pub const ESCAPED_FRAGMENT: &str = "_escaped_fragment_";

/// Lowercased User-Agent substrings of search crawlers and link-preview bots
const CRAWLER_USER_AGENTS: &[&str] = &[
    "googlebot",
    "yahoo! slurp",
    "bingbot",
    "yandex",
    "baiduspider",
    "facebookexternalhit",
    "twitterbot",
    "rogerbot",
    "linkedinbot",
    "embedly",
    "quora link preview",
    "showyoubot",
    "outbrain",
    "pinterest/0.",
    "pinterestbot",
    "developers.google.com/+/web/snippet",
    "slackbot",
    "vkshare",
    "w3c_validator",
    "redditbot",
    "applebot",
    "whatsapp",
    "flipboard",
    "tumblr",
    "bitlybot",
    "skypeuripreview",
    "nuzzel",
    "discordbot",
    "google page speed",
    "qwantify",
    "bitrix link preview",
    "xing-contenttabreceiver",
    "chrome-lighthouse",
    "telegrambot",
];

/// True if the User-Agent or the URL marks the client as a crawler
pub fn is_bot(user_agent: Option<&str>, url: &str) -> bool {
    user_agent.is_some_and(is_crawler_user_agent) || has_escaped_fragment(url)
}

/// Case-insensitive match against the built-in crawler list
pub fn is_crawler_user_agent(user_agent: &str) -> bool {
    if user_agent.is_empty() {
        return false;
    }
    let ua = user_agent.to_lowercase();
    CRAWLER_USER_AGENTS.iter().any(|token| ua.contains(token))
}

/// True if the query string has a parameter named exactly `_escaped_fragment_`.
///
/// Accepts either a full URL or a path with query. The value may be empty.
pub fn has_escaped_fragment(url: &str) -> bool {
    let url = url.split('#').next().unwrap_or_default();
    let Some((_, query)) = url.split_once('?') else {
        return false;
    };

    form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == ESCAPED_FRAGMENT)
}
