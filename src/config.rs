use crate::error::PrerenderError;
use hyper::header::HeaderValue;
use hyper::Uri;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable that supplies the rendering service URL
pub const ENV_SERVICE_URL: &str = "PRERENDER_SERVICE_URL";
/// Environment variable that supplies the rendering service token
pub const ENV_TOKEN: &str = "PRERENDER_TOKEN";
/// Rendering service used when neither an option nor the environment names one
pub const DEFAULT_SERVICE_URL: &str = "http://service.prerender.io/";

/// Static-resource extensions that are never prerendered
pub const DEFAULT_EXTENSION_BLACKLIST: &[&str] = &[
    "js", "css", "xml", "less", "png", "jpg", "jpeg", "gif", "pdf", "doc", "txt", "ico", "rss",
    "zip", "mp3", "rar", "exe", "wmv", "avi", "ppt", "mpg", "mpeg", "tif", "wav", "mov", "psd",
    "ai", "xls", "mp4", "m4a", "swf", "dat", "dmg", "iso", "flv", "m4v", "torrent", "woff",
    "woff2", "ttf", "svg", "eot", "webp",
];

/// Configuration file for the gateway binary
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and origin settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Prerender options (explicit values; environment fills the gaps)
    #[serde(default)]
    pub prerender: PrerenderOptions,

    /// Optional process-local render cache
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 3000)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// The application that handles every request not served prerendered
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Maximum idle connections kept to the origin (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Max time to wait for the origin to answer, in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            origin: default_origin(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse the origin URL; only plain `http://host[:port]` is accepted
    pub fn origin_uri(&self) -> anyhow::Result<Uri> {
        let uri: Uri = self
            .origin
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid origin '{}': {}", self.origin, e))?;

        if uri.scheme_str() != Some("http") {
            anyhow::bail!("Origin '{}' must use the http scheme", self.origin);
        }
        if uri.authority().is_none() {
            anyhow::bail!("Origin '{}' has no host", self.origin);
        }
        Ok(uri)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Keep rendered pages in process memory, keyed by URL
    #[serde(default)]
    pub memory: bool,

    /// Maximum cached pages (default: 1000)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds a cached page stays valid (default: 3600)
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: false,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Explicitly supplied prerender options.
///
/// Every field is optional. [`PrerenderOptions::resolve`] turns these into an
/// immutable [`PrerenderSettings`] snapshot.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PrerenderOptions {
    /// Value for the `X-Prerender-Token` header
    pub token: Option<String>,

    /// Base URL of the rendering service; the original URL is appended verbatim
    pub service_url: Option<String>,

    /// Regex patterns; when non-empty only matching URLs are prerendered
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Regex patterns matched against the URL and the Referer
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Replaces the default static-resource extension list
    pub extension_blacklist: Option<Vec<String>>,

    /// Force the scheme of the URL sent to the rendering service ("http" or "https")
    pub protocol: Option<String>,

    /// Override the host of the URL sent to the rendering service
    pub host: Option<String>,

    /// Timeout for the render fetch, in seconds
    pub request_timeout_secs: Option<u64>,

    /// Send the client's User-Agent to the rendering service (default: true)
    pub forward_user_agent: Option<bool>,
}

impl PrerenderOptions {
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_service_url(mut self, url: &str) -> Self {
        self.service_url = Some(url.to_string());
        self
    }

    pub fn with_whitelist(mut self, patterns: &[&str]) -> Self {
        self.whitelist = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_blacklist(mut self, patterns: &[&str]) -> Self {
        self.blacklist = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Resolve against the process environment, once
    pub fn resolve(self) -> Result<PrerenderSettings, PrerenderError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// Precedence is explicit option, then environment, then built-in default.
    /// Empty environment values count as unset.
    pub fn resolve_with<F>(self, env: F) -> Result<PrerenderSettings, PrerenderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        let service_url = self
            .service_url
            .or_else(|| env(ENV_SERVICE_URL))
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        validate_service_url(&service_url)?;

        let token = self.token.or_else(|| env(ENV_TOKEN));
        if let Some(ref token) = token {
            HeaderValue::from_str(token).map_err(|_| {
                PrerenderError::Config("token is not a valid HTTP header value".to_string())
            })?;
        }

        let protocol = match self.protocol {
            Some(p) => {
                let p = p.to_ascii_lowercase();
                if p != "http" && p != "https" {
                    return Err(PrerenderError::Config(format!(
                        "protocol must be \"http\" or \"https\", got \"{}\"",
                        p
                    )));
                }
                Some(p)
            }
            None => None,
        };

        let extension_blacklist = match self.extension_blacklist {
            Some(exts) => exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            None => DEFAULT_EXTENSION_BLACKLIST
                .iter()
                .map(|e| e.to_string())
                .collect(),
        };

        Ok(PrerenderSettings {
            token,
            service_url,
            whitelist: compile_patterns("whitelist", &self.whitelist)?,
            blacklist: compile_patterns("blacklist", &self.blacklist)?,
            extension_blacklist,
            protocol,
            host: self.host,
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            forward_user_agent: self.forward_user_agent.unwrap_or(true),
        })
    }
}

/// Resolved prerender configuration, immutable for the life of the middleware
#[derive(Debug, Clone)]
pub struct PrerenderSettings {
    pub token: Option<String>,
    pub service_url: String,
    pub whitelist: Vec<Regex>,
    pub blacklist: Vec<Regex>,
    pub extension_blacklist: HashSet<String>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub request_timeout: Option<Duration>,
    pub forward_user_agent: bool,
}

fn validate_service_url(service_url: &str) -> Result<(), PrerenderError> {
    let parsed = url::Url::parse(service_url).map_err(|e| {
        PrerenderError::Config(format!("invalid service_url \"{}\": {}", service_url, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(PrerenderError::Config(format!(
            "service_url must be http or https, got scheme \"{}\"",
            other
        ))),
    }
}

fn compile_patterns(list: &str, patterns: &[String]) -> Result<Vec<Regex>, PrerenderError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                PrerenderError::Config(format!("invalid {} pattern \"{}\": {}", list, p, e))
            })
        })
        .collect()
}

fn default_listen_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_origin() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the parts that do not depend on the environment
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server.origin_uri()?;
        compile_patterns("whitelist", &self.prerender.whitelist)?;
        compile_patterns("blacklist", &self.prerender.blacklist)?;
        Ok(())
    }
}
