use crate::error::{json_error_response, GatewayErrorCode};
use crate::pool::{OriginPool, PoolConfig};
use crate::prerender::{Outcome, Prerender};
use crate::render::RenderResult;
use crate::request::RequestView;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Connection-level headers that describe the service's connection, not the page
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "upgrade"
            | "proxy-connection"
            | "content-length"
    )
}

/// Shared per-server state handed to every request
struct GatewayContext {
    prerender: Arc<Prerender>,
    pool: Arc<OriginPool>,
    request_timeout: Duration,
}

/// Gateway in front of an origin application.
///
/// Crawler requests are answered with prerendered pages; everything else is
/// forwarded to the origin as-is.
pub struct GatewayServer {
    bind_addr: SocketAddr,
    prerender: Arc<Prerender>,
    pool: Arc<OriginPool>,
    request_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        prerender: Arc<Prerender>,
        origin: Uri,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self::with_pool_config(bind_addr, prerender, origin, shutdown_rx, PoolConfig::default())
    }

    pub fn with_pool_config(
        bind_addr: SocketAddr,
        prerender: Arc<Prerender>,
        origin: Uri,
        shutdown_rx: watch::Receiver<bool>,
        pool_config: PoolConfig,
    ) -> Self {
        let pool = Arc::new(OriginPool::new(origin, pool_config));
        Self {
            bind_addr,
            prerender,
            pool,
            request_timeout: Duration::from_secs(30),
            shutdown_rx,
        }
    }

    /// Max time to wait for the origin on pass-through requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the origin connection pool (for statistics)
    pub fn pool(&self) -> &Arc<OriginPool> {
        &self.pool
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, origin = %self.pool.origin(), "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let ctx = Arc::new(GatewayContext {
            prerender: Arc::clone(&self.prerender),
            pool: Arc::clone(&self.pool),
            request_timeout: self.request_timeout,
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, ctx).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    ctx: Arc<GatewayContext>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = Arc::clone(&ctx);
        async move { handle_request(req, ctx, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }

    // Requests without any host are still forwarded to the origin
    let view = RequestView::from_request(&req, false);
    debug!(method = %view.method, url = %view.url(), client = %client_addr, request_id, "Incoming request");

    if let Outcome::Respond(result) = ctx.prerender.intercept(&view).await {
        info!(url = %view.url(), status = %result.status, request_id, "Serving prerendered page");
        return Ok(render_response(result));
    }

    let result = tokio::time::timeout(ctx.request_timeout, ctx.pool.send_request(req)).await;

    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            error!(origin = %ctx.pool.origin(), request_id, error = %e, "Failed to forward request to origin");
            Ok(json_error_response(
                GatewayErrorCode::OriginUnavailable,
                "Failed to connect to origin",
            ))
        }
        Err(_) => {
            warn!(
                origin = %ctx.pool.origin(),
                request_id,
                timeout_secs = ctx.request_timeout.as_secs(),
                "Origin request timed out"
            );
            Ok(json_error_response(
                GatewayErrorCode::RequestTimeout,
                format!(
                    "Request timed out after {} seconds",
                    ctx.request_timeout.as_secs()
                ),
            ))
        }
    }
}

/// Write a render result back as a response.
///
/// Status, headers and body are relayed as-is apart from connection-level
/// headers; hyper sets Content-Length from the body.
pub fn render_response(result: RenderResult) -> Response<BoxBody<Bytes, hyper::Error>> {
    let RenderResult { status, headers, body } = result;

    let mut response = Response::new(Full::new(body).map_err(|never| match never {}).boxed());
    *response.status_mut() = status;

    let out = response.headers_mut();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    response
}
