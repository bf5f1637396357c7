//! Reverse proxy director and WebSocket upgrade passthrough (spec.md §4.1 "Reverse
//! proxy"). Uses a manual `hyper::client::conn` handshake rather than a pooled client so
//! that, on a `101 Switching Protocols` response, both sides of the TCP connection can be
//! handed off for raw bidirectional splicing.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::TcpStream;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Clone, Copy)]
pub struct ProxyTimeouts {
    pub read: Duration,
    pub write: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("dial backend {addr}: {source}")]
    Dial { addr: SocketAddr, source: std::io::Error },
    #[error("backend handshake failed: {0}")]
    Handshake(hyper::Error),
    #[error("backend request failed: {0}")]
    Request(hyper::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl utils::error::ReportableError for ProxyError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Upstream
    }
}

/// Socket.IO-style long-poll-then-upgrade paths piggyback a `transport=websocket` (or
/// `polling`, before the upgrade happens) query parameter on an otherwise ordinary-looking
/// path. This heuristic is intentionally lenient (spec.md §9 "must not block non-upgrade
/// traffic") — it only widens what we additionally *treat* as a WebSocket candidate, never
/// narrows the header-based check.
static SOCKET_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"transport=(websocket|polling)").unwrap());

pub fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    let has_upgrade_headers = req
        .headers()
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false)
        && req
            .headers()
            .get(http::header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);

    if has_upgrade_headers {
        return true;
    }

    req.uri().query().map(|q| SOCKET_PATH.is_match(q)).unwrap_or(false)
}

/// Rewrites `req`'s target to `http://<addr>` while leaving the `Host` header exactly
/// as the client sent it: backends route by the original hostname (virtual hosting,
/// signed URLs, CSRF origin checks), not by the resolved service address.
fn director(mut req: Request<Incoming>, addr: SocketAddr) -> Request<Incoming> {
    let path_and_query = req.uri().path_and_query().cloned().unwrap_or_else(|| "/".parse().unwrap());
    let new_uri = Uri::builder()
        .scheme("http")
        .authority(addr.to_string())
        .path_and_query(path_and_query)
        .build()
        .unwrap_or_else(|_| req.uri().clone());
    *req.uri_mut() = new_uri;
    req
}

/// Proxies a single ordinary (non-upgrade) HTTP request under `timeouts.read`/
/// `timeouts.write` (spec.md `proxy_read_timeout`/`proxy_write_timeout`).
pub async fn proxy(req: Request<Incoming>, addr: SocketAddr, timeouts: ProxyTimeouts) -> Result<Response<BoxBody>, ProxyError> {
    let stream = dial(addr, timeouts.write).await?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(ProxyError::Handshake)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("backend connection closed: {e}");
        }
    });

    let outbound = director(req, addr);
    let response = tokio::time::timeout(timeouts.read, sender.send_request(outbound))
        .await
        .map_err(|_| ProxyError::Timeout(timeouts.read))?
        .map_err(ProxyError::Request)?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.map_err(|e| e).boxed()))
}

async fn dial(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ProxyError> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProxyError::Timeout(timeout))?
        .map_err(|source| ProxyError::Dial { addr, source })
}

/// The WebSocket-aware entry point (spec.md §4.1): preserves all `Sec-WebSocket-*`
/// headers verbatim by forwarding the request unmodified aside from the URI/Host
/// rewrite, uses the long `websocket_*_timeout` pair with compression disabled, and
/// forwards the `101 Switching Protocols` response byte-for-byte before handing both
/// sides off to `tokio::io::copy_bidirectional` (spec.md §5 "the two directions are
/// independent and unordered with respect to each other").
pub async fn proxy_upgrade(mut req: Request<Incoming>, addr: SocketAddr, timeouts: ProxyTimeouts) -> Result<Response<BoxBody>, ProxyError> {
    let client_upgrade = hyper::upgrade::on(&mut req);

    let stream = dial(addr, timeouts.write).await?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(ProxyError::Handshake)?;
    let conn_task = tokio::spawn(conn.with_upgrades());

    let outbound = director(req, addr);
    let mut response = tokio::time::timeout(timeouts.read, sender.send_request(outbound))
        .await
        .map_err(|_| ProxyError::Timeout(timeouts.read))?
        .map_err(ProxyError::Request)?;

    if response.status() != http::StatusCode::SWITCHING_PROTOCOLS {
        let (parts, body) = response.into_parts();
        return Ok(Response::from_parts(parts, body.map_err(|e| e).boxed()));
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    let (parts, _body) = response.into_parts();
    let passthrough_body: BoxBody = Full::new(Bytes::new()).map_err(|never: std::convert::Infallible| match never {}).boxed();
    let passthrough = Response::from_parts(parts, passthrough_body);

    let read_timeout = timeouts.read;
    let write_timeout = timeouts.write;
    tokio::spawn(async move {
        let (client_upgraded, backend_upgraded) = match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("websocket upgrade handoff failed: {e}");
                return;
            }
        };
        let mut client_io = TokioIo::new(client_upgraded);
        let mut backend_io = TokioIo::new(backend_upgraded);
        let copy = tokio::io::copy_bidirectional(&mut client_io, &mut backend_io);
        match tokio::time::timeout(read_timeout.max(write_timeout), copy).await {
            Ok(Ok((to_backend, to_client))) => {
                tracing::debug!(to_backend, to_client, "websocket splice finished");
            }
            Ok(Err(e)) => tracing::debug!("websocket splice ended: {e}"),
            Err(_) => tracing::debug!("websocket splice timed out"),
        }
        conn_task.abort();
    });

    Ok(passthrough)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request as HttpRequest;

    fn request_with_headers(pairs: &[(&str, &str)], path: &str) -> Request<()> {
        let mut builder = HttpRequest::builder().uri(path);
        for (k, v) in pairs {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    fn is_ws(req: &Request<()>) -> bool {
        let has_upgrade_headers = req
            .headers()
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false)
            && req
                .headers()
                .get(http::header::UPGRADE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false);
        has_upgrade_headers || req.uri().query().map(|q| SOCKET_PATH.is_match(q)).unwrap_or(false)
    }

    #[test]
    fn header_based_upgrade_is_detected() {
        let req = request_with_headers(&[("connection", "Upgrade"), ("upgrade", "websocket")], "/ws");
        assert!(is_ws(&req));
    }

    #[test]
    fn socket_io_polling_path_is_detected_before_upgrade() {
        let req = request_with_headers(&[], "/socket.io/?EIO=4&transport=polling");
        assert!(is_ws(&req));
    }

    #[test]
    fn ordinary_request_is_not_flagged() {
        let req = request_with_headers(&[], "/api/health?x=1");
        assert!(!is_ws(&req));
    }
}
