//! Read-only snapshot server.
//!
//! Serves the tracker's current view as JSON on `GET /data`. Queries never
//! fail due to internal tracking errors; immediately after startup the
//! answer is simply an empty list.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tracker::{FlowTracker, ShutdownSignal};

pub(crate) async fn serve(
    addr: SocketAddr,
    tracker: Arc<FlowTracker>,
    shutdown: broadcast::Sender<ShutdownSignal>,
) -> Result<JoinHandle<()>, anyhow::Error> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Snapshot server listening on {}", addr);

    let mut shutdown_rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Snapshot server stopping");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    debug!("Connection from {}", peer);

                    let io = TokioIo::new(stream);
                    let tracker = tracker.clone();
                    tokio::spawn(async move {
                        let service =
                            service_fn(move |req| handle_request(tracker.clone(), req));
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Error serving connection: {:?}", e);
                        }
                    });
                }
            }
        }
    });

    Ok(handle)
}

async fn handle_request(
    tracker: Arc<FlowTracker>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "invalid request method"));
    }

    match req.uri().path() {
        "/data" => {
            let connections = tracker.snapshot();
            match serde_json::to_vec(&connections) {
                Ok(body) => Ok(json(body)),
                Err(e) => {
                    warn!(target: "error", "Snapshot serialization failed: {}", e);
                    Ok(plain(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "serialization failed",
                    ))
                }
            }
        }
        _ => Ok(plain(StatusCode::NOT_FOUND, "not found")),
    }
}

fn json(body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    let headers = resp.headers_mut();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    resp
}

fn plain(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(msg.to_string())));
    *resp.status_mut() = status;
    resp
}
