//! Minimal `/healthz` + `/metrics` admin surface (SPEC_FULL.md §3), the same two routes
//! `web-gateway::server` exposes, without the proxying machinery this binary doesn't
//! need.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::metrics::METRICS;

type BoxBody = Full<Bytes>;

pub async fn run(addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin listener bound");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(handle_request);
                    let conn = hyper::server::conn::http1::Builder::new().serve_connection(io, service);
                    tokio::select! {
                        result = conn => { if let Err(e) = result { tracing::debug!(error = %e, "admin connection ended"); } }
                        _ = conn_cancel.cancelled() => {}
                    }
                });
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<BoxBody>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => respond(StatusCode::OK, "ok".to_owned()),
        "/metrics" => respond(StatusCode::OK, METRICS.gather()),
        _ => respond(StatusCode::NOT_FOUND, "not found".to_owned()),
    };
    Ok(response)
}

fn respond(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder().status(status).body(Full::new(Bytes::from(body))).expect("static admin response is always well-formed")
}
