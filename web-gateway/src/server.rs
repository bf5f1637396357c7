//! Listener/accept loops and the per-request handling pipeline: lookup routing entry,
//! ensure the backend is awake, record access, resolve its DNS name, proxy the request
//! (or splice it as a WebSocket upgrade), and emit the access log line.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use kube::Client;
use kv::Store;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::access_log::AccessLogLine;
use crate::cert::challenge::ChallengeTable;
use crate::cert::resolver::GatewayCertResolver;
use crate::dns::DnsCache;
use crate::metrics::METRICS;
use crate::proxy::{self, BoxBody, ProxyTimeouts};
use crate::routing::RoutingTable;
use crate::wakeup::{self, WakeOutcome};

pub struct GatewayState {
    pub routing: Arc<RoutingTable>,
    pub dns: Arc<DnsCache>,
    pub store: Store,
    pub client: Client,
    pub challenges: Arc<ChallengeTable>,
    pub cluster_suffix: String,
    pub enable_https: bool,
    pub proxy_timeouts: ProxyTimeouts,
    pub websocket_timeouts: ProxyTimeouts,
}

pub async fn run_plaintext(addr: SocketAddr, state: Arc<GatewayState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "plaintext listener bound");
    accept_loop(listener, state, None, cancel).await
}

pub async fn run_tls(addr: SocketAddr, state: Arc<GatewayState>, resolver: Arc<GatewayCertResolver>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut server_config = ServerConfig::builder().with_no_client_auth().with_cert_resolver(resolver);
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tls listener bound");
    accept_loop(listener, state, Some(acceptor), cancel).await
}

async fn accept_loop(listener: TcpListener, state: Arc<GatewayState>, acceptor: Option<TlsAcceptor>, cancel: CancellationToken) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                let state = state.clone();
                let acceptor = acceptor.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, remote_addr, state, acceptor, conn_cancel).await {
                        tracing::debug!(%remote_addr, error = %e, "connection ended");
                    }
                });
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<GatewayState>,
    acceptor: Option<TlsAcceptor>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let is_tls = acceptor.is_some();
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { handle_request(req, remote_addr, state, is_tls).await }
    });

    match acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor.accept(stream).await?;
            let io = TokioIo::new(tls_stream);
            let conn = hyper::server::conn::http1::Builder::new().serve_connection(io, service).with_upgrades();
            tokio::select! {
                result = conn => result?,
                _ = cancel.cancelled() => {}
            }
        }
        None => {
            let io = TokioIo::new(stream);
            let conn = hyper::server::conn::http1::Builder::new().serve_connection(io, service).with_upgrades();
            tokio::select! {
                result = conn => result?,
                _ = cancel.cancelled() => {}
            }
        }
    }
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<GatewayState>,
    is_tls: bool,
) -> Result<Response<BoxBody>, Infallible> {
    let started = Instant::now();
    let host = host_of(&req);
    let log = AccessLogLine::new(req.method(), req.uri(), req.version(), req.headers(), &remote_addr.ip().to_string());

    let path = req.uri().path().to_owned();

    if path == "/healthz" {
        return Ok(finish(log, started, &host, "-", respond(StatusCode::OK, "ok")));
    }
    if path == "/metrics" {
        return Ok(finish(log, started, &host, "-", respond(StatusCode::OK, METRICS.gather())));
    }

    if !is_tls && state.enable_https {
        if let Some(token) = path.strip_prefix("/.well-known/acme-challenge/") {
            return Ok(match state.challenges.get(token) {
                Some(key_auth) => finish(log, started, &host, "-", respond(StatusCode::OK, key_auth)),
                None => finish(log, started, &host, "-", respond(StatusCode::NOT_FOUND, "not found")),
            });
        }
        let location = format!("https://{host}{}", req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/"));
        return Ok(finish(log, started, &host, "-", redirect(&location)));
    }

    match route_and_proxy(req, &host, &state).await {
        Ok((response, upstream)) => Ok(finish(log, started, &host, &upstream, response)),
        Err((status, tag)) => Ok(finish(log, started, &host, tag, respond(status, status_message(status)))),
    }
}

/// Resolves the routing entry, wakes the backend if needed, records access, resolves
/// its DNS name, and proxies the request; returns the resolved upstream address for the
/// access log alongside the response, or a `(status, upstream tag)` pair to serve on
/// early exit. The tag distinguishes *why* the request never reached a backend (spec.md
/// §7 "distinguishing upstream tag") rather than collapsing every early exit to `-`.
async fn route_and_proxy(req: Request<Incoming>, host: &str, state: &GatewayState) -> Result<(Response<BoxBody>, String), (StatusCode, &'static str)> {
    let backend = state.routing.lookup(host).ok_or((StatusCode::NOT_FOUND, "-"))?;

    match wakeup::ensure_awake(&state.client, &state.store, &backend).await {
        Ok(WakeOutcome::Ready) => {}
        Ok(WakeOutcome::CrashLoop) => return Err((StatusCode::SERVICE_UNAVAILABLE, "-")),
        Ok(WakeOutcome::Timeout) => return Err((StatusCode::SERVICE_UNAVAILABLE, "-")),
        Err(e) => {
            tracing::warn!(error = %e, %host, "wake-up check failed");
            return Err((StatusCode::SERVICE_UNAVAILABLE, "-"));
        }
    }

    // Keyed on the Deployment identity the worker and idle scaler use
    // (`<serviceId>-deployment`), not the watched Service's own object name.
    let deployment_name = orchestrator::names::deployment(&backend.service_id);
    let access_key = kv::keys::access(&backend.namespace, &deployment_name);
    let epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    if let Err(e) = state.store.set(&access_key, &epoch.to_string()).await {
        tracing::debug!(error = %e, "failed to record access timestamp");
    }

    let addrs = state.dns.resolve(&backend.name, &backend.namespace, &state.cluster_suffix).await.map_err(|e| {
        tracing::warn!(error = %e, %host, "dns resolution failed");
        (StatusCode::SERVICE_UNAVAILABLE, "dns-error")
    })?;
    let ip = addrs.first().ok_or((StatusCode::SERVICE_UNAVAILABLE, "no-upstream"))?;
    let addr = SocketAddr::new(*ip, backend.port);

    let is_upgrade = proxy::is_websocket_upgrade(&req);
    let result = if is_upgrade {
        proxy::proxy_upgrade(req, addr, state.websocket_timeouts).await
    } else {
        proxy::proxy(req, addr, state.proxy_timeouts).await
    };

    match result {
        Ok(response) => Ok((response, addr.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, %host, %addr, "proxy request failed");
            Err((StatusCode::BAD_GATEWAY, "-"))
        }
    }
}

fn host_of(req: &Request<Incoming>) -> String {
    req.uri()
        .authority()
        .map(|a| a.as_str().to_owned())
        .or_else(|| req.headers().get(http::header::HOST).and_then(|v| v.to_str().ok()).map(str::to_owned))
        .unwrap_or_default()
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()).map_err(|never: Infallible| match never {}).boxed())
        .unwrap_or_else(|_| Response::new(Empty::new().map_err(|never: Infallible| match never {}).boxed()))
}

fn redirect(location: &str) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(http::header::LOCATION, location)
        .body(Empty::new().map_err(|never: Infallible| match never {}).boxed())
        .unwrap_or_else(|_| Response::new(Empty::new().map_err(|never: Infallible| match never {}).boxed()))
}

fn status_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NOT_FOUND => "unknown host",
        StatusCode::SERVICE_UNAVAILABLE => "service unavailable",
        StatusCode::BAD_GATEWAY => "bad gateway",
        _ => "error",
    }
}

/// Wraps `response`'s body with [`LoggingBody`] so the access log line is emitted (and
/// the matching metric recorded) once the body finishes streaming to the client, with
/// the number of bytes actually written rather than a size guessed at response-build
/// time. Fires on early client disconnect too, via `LoggingBody`'s `Drop` impl.
fn finish(log: AccessLogLine, started: Instant, host: &str, upstream: &str, response: Response<BoxBody>) -> Response<BoxBody> {
    let status = response.status().as_u16();
    let (parts, body) = response.into_parts();
    let logged = LoggingBody::new(body, log, started, host.to_owned(), upstream.to_owned(), status);
    Response::from_parts(parts, logged.boxed())
}

struct PendingLog {
    log: AccessLogLine,
    started: Instant,
    host: String,
    upstream: String,
    status: u16,
}

/// Byte-counting body wrapper; see [`finish`]. `BoxBody` is `Pin<Box<dyn Body + Send +
/// Sync>>`, which is unconditionally `Unpin`, so this struct is too and `poll_frame` can
/// get a plain `&mut Self` out of its `Pin`.
struct LoggingBody {
    inner: BoxBody,
    bytes: u64,
    pending: Option<PendingLog>,
}

impl LoggingBody {
    fn new(inner: BoxBody, log: AccessLogLine, started: Instant, host: String, upstream: String, status: u16) -> Self {
        Self { inner, bytes: 0, pending: Some(PendingLog { log, started, host, upstream, status }) }
    }

    fn emit(&mut self) {
        let Some(pending) = self.pending.take() else { return };
        METRICS.record(&pending.host, pending.status, pending.started.elapsed().as_secs_f64());
        pending.log.finish(pending.status, self.bytes, pending.started.elapsed(), pending.upstream).emit();
    }
}

impl Body for LoggingBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.emit(),
            _ => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggingBody {
    fn drop(&mut self) {
        self.emit();
    }
}

async fn sleep_for_shutdown_grace() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}

pub async fn shutdown_grace(cancel: &CancellationToken) {
    utils::shutdown::wait_with_grace(cancel, Duration::from_secs(30), sleep_for_shutdown_grace()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> AccessLogLine {
        let headers = http::HeaderMap::new();
        AccessLogLine::new(&http::Method::GET, &"/".parse().unwrap(), http::Version::HTTP_11, &headers, "10.0.0.1")
    }

    #[tokio::test]
    async fn logging_body_counts_bytes_actually_streamed() {
        let payload = Bytes::from_static(b"hello world");
        let inner: BoxBody = Full::new(payload.clone()).map_err(|never: Infallible| match never {}).boxed();
        let mut body = LoggingBody::new(inner, test_log(), Instant::now(), "example.test".to_owned(), "10.1.2.3:8080".to_owned(), 200);

        while let Some(frame) = BodyExt::frame(&mut body).await {
            frame.unwrap();
        }

        assert_eq!(body.bytes, payload.len() as u64);
        assert!(body.pending.is_none(), "logging body should emit its access log line once the stream ends");
    }

    #[test]
    fn status_message_distinguishes_unavailable_from_bad_gateway() {
        assert_eq!(status_message(StatusCode::SERVICE_UNAVAILABLE), "service unavailable");
        assert_eq!(status_message(StatusCode::BAD_GATEWAY), "bad gateway");
    }
}
