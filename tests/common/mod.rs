//! In-process stub servers for integration tests

#![allow(dead_code)]

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use rendergate::config::PrerenderOptions;
use rendergate::prerender::Prerender;
use rendergate::proxy::GatewayServer;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// A request as seen by a stub
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Canned stub response
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Handler = dyn Fn(&Recorded) -> Reply + Send + Sync;

/// A stub HTTP server that records every request it receives
pub struct Stub {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Stub {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let handler = Arc::clone(&handler);
                        let recorded = Arc::clone(&recorded);
                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<Incoming>| {
                                let handler = Arc::clone(&handler);
                                let recorded = Arc::clone(&recorded);
                                async move { Ok::<_, Infallible>(respond(req, &*handler, &recorded)) }
                            });
                            let _ = AutoBuilder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(stream), service)
                                .await;
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown_tx,
        }
    }

    /// A stub that answers every request with the same reply
    pub async fn fixed(reply: Reply) -> Self {
        Self::start(move |_| reply.clone()).await
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for Stub {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn respond(req: Request<Incoming>, handler: &Handler, recorded: &Mutex<Vec<Recorded>>) -> Response<Full<Bytes>> {
    let seen = Recorded {
        method: req.method().to_string(),
        path_and_query: req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: req.headers().clone(),
    };
    let reply = handler(&seen);
    recorded.lock().unwrap().push(seen);

    let mut builder = Response::builder().status(StatusCode::from_u16(reply.status).unwrap());
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Full::new(Bytes::from(reply.body))).unwrap()
}

/// The origin application: `/foo.css` is a stylesheet, everything else says "ok"
pub async fn start_origin() -> Stub {
    Stub::start(|req| {
        if req.path_and_query == "/foo.css" {
            Reply::new(200, "body { color: pink; }").header("content-type", "text/css")
        } else {
            Reply::new(200, "ok").header("content-type", "text/plain")
        }
    })
    .await
}

/// A running gateway on an ephemeral port
pub struct Gateway {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// The rendering-service path a request for `path_and_query` should produce
    pub fn render_path(&self, path_and_query: &str) -> String {
        format!("/http://{}{}", self.addr, path_and_query)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub async fn start_gateway(prerender: Prerender, origin: &Stub) -> Gateway {
    start_gateway_to(prerender, &format!("http://{}", origin.addr)).await
}

pub async fn start_gateway_to(prerender: Prerender, origin: &str) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let origin_uri = origin.parse().unwrap();
    let server = GatewayServer::new(addr, Arc::new(prerender), origin_uri, shutdown_rx);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    Gateway { addr, shutdown_tx }
}

/// Prerender middleware pointed at `service_url`, ignoring the process environment
pub fn prerender_for(options: PrerenderOptions) -> Prerender {
    Prerender::new(options.resolve_with(|_| None).unwrap()).unwrap()
}

/// HTTP client that neither follows redirects nor decompresses
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
