//! Request interception: decide, consult the cache, fetch, or step aside
//!
//! [`Prerender::intercept`] is the only entry point the host needs. It never
//! returns an error: anything that goes wrong after a request was admitted
//! turns into [`Outcome::PassThrough`], so the site keeps serving.

use crate::cache::{NoopCache, RenderCache};
use crate::config::PrerenderSettings;
use crate::error::PrerenderError;
use crate::filter::{self, Verdict};
use crate::render::{RenderClient, RenderResult};
use crate::request::RequestView;
use crate::target;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the host should do with a request
#[derive(Debug)]
pub enum Outcome {
    /// Write this status, headers and body back to the client
    Respond(RenderResult),
    /// Hand the untouched request to the normal handler
    PassThrough,
}

impl Outcome {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Outcome::PassThrough)
    }
}

/// Counters for intercept decisions
#[derive(Debug, Default)]
pub struct InterceptStats {
    pub intercepted: AtomicU64,
    pub passed_through: AtomicU64,
    pub cache_hits: AtomicU64,
    pub renders: AtomicU64,
    pub render_failures: AtomicU64,
}

impl InterceptStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_intercepted(&self) -> u64 {
        self.intercepted.load(Ordering::Relaxed)
    }

    pub fn get_passed_through(&self) -> u64 {
        self.passed_through.load(Ordering::Relaxed)
    }

    pub fn get_cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn get_renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    pub fn get_render_failures(&self) -> u64 {
        self.render_failures.load(Ordering::Relaxed)
    }
}

/// The prerender middleware
pub struct Prerender {
    settings: Arc<PrerenderSettings>,
    client: RenderClient,
    cache: Arc<dyn RenderCache>,
    stats: Arc<InterceptStats>,
}

impl Prerender {
    pub fn new(settings: PrerenderSettings) -> Result<Self, PrerenderError> {
        let client = RenderClient::new(&settings)?;
        Ok(Self {
            settings: Arc::new(settings),
            client,
            cache: Arc::new(NoopCache),
            stats: Arc::new(InterceptStats::default()),
        })
    }

    /// Attach cache hooks
    pub fn with_cache(mut self, cache: Arc<dyn RenderCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn settings(&self) -> &PrerenderSettings {
        &self.settings
    }

    pub fn stats(&self) -> Arc<InterceptStats> {
        Arc::clone(&self.stats)
    }

    pub fn should_intercept(&self, request: &RequestView) -> bool {
        filter::should_intercept(request, &self.settings)
    }

    /// Decide what to do with `request`.
    ///
    /// Dropping the returned future abandons any in-flight fetch; its result
    /// is never delivered.
    pub async fn intercept(&self, request: &RequestView) -> Outcome {
        if let Verdict::Reject(reason) = filter::evaluate(request, &self.settings) {
            debug!(method = %request.method, url = %request.url(), reason = reason.as_str(), "Not prerendering");
            InterceptStats::bump(&self.stats.passed_through);
            return Outcome::PassThrough;
        }

        InterceptStats::bump(&self.stats.intercepted);

        match self.render(request).await {
            Ok(result) => Outcome::Respond(result),
            Err(e) => {
                warn!(url = %request.url(), error = %e, "Prerender failed, passing request through");
                InterceptStats::bump(&self.stats.passed_through);
                Outcome::PassThrough
            }
        }
    }

    async fn render(&self, request: &RequestView) -> Result<RenderResult, PrerenderError> {
        match self.cache.before_render(request).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url(), status = %cached.status, "Serving render from cache");
                InterceptStats::bump(&self.stats.cache_hits);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                let err = PrerenderError::hook_failed("before_render", &e);
                warn!(url = %request.url(), error = %err, "Treating cache lookup failure as a miss");
            }
        }

        let render_url = target::build_render_url(request, &self.settings);
        debug!(render_url = %render_url, "Fetching render");

        let result = match self.client.fetch(&render_url, request).await {
            Ok(result) => result,
            Err(e) => {
                InterceptStats::bump(&self.stats.render_failures);
                return Err(e);
            }
        };
        InterceptStats::bump(&self.stats.renders);

        if let Err(e) = self.cache.after_render(request, &result).await {
            let err = PrerenderError::hook_failed("after_render", &e);
            warn!(url = %request.url(), error = %err, "Cache store failed");
        }

        Ok(result)
    }
}
