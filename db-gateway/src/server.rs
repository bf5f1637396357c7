//! Accept loop and per-connection pipeline (spec.md §4.3): optional proxy-protocol
//! header, synthetic handshake + username extraction, routing lookup, backend dial,
//! backend handshake splice, then full bidirectional splice.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::buffer_pool::BufferPool;
use crate::capacity::ConnectionLimiter;
use crate::dns::DnsCache;
use crate::metrics::METRICS;
use crate::protocol;
use crate::proxy_protocol;
use crate::routing::RoutingTable;
use crate::splice;

pub struct GatewayState {
    pub routing: Arc<RoutingTable>,
    pub dns: Arc<DnsCache>,
    pub pool: Arc<BufferPool>,
    pub limiter: ConnectionLimiter,
    pub cluster_suffix: String,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub use_proxy_protocol: bool,
    /// Tracked for graceful shutdown (spec.md §5: a waitgroup tracks live connections;
    /// 10s timeout after context cancellation).
    pub inflight: Arc<Semaphore>,
}

pub async fn run(addr: SocketAddr, state: Arc<GatewayState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "db gateway listener bound");

    let mut connection_id: u32 = 1;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                let Some(permit) = state.limiter.try_acquire() else {
                    tracing::warn!(%remote_addr, "connection limit reached; closing immediately");
                    METRICS.record_outcome("rejected_saturated");
                    continue;
                };

                let cid = connection_id;
                connection_id = connection_id.wrapping_add(1);

                let state = state.clone();
                let conn_cancel = cancel.child_token();
                let inflight_permit = match state.inflight.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                tokio::spawn(async move {
                    let _permit = permit;
                    let _inflight = inflight_permit;
                    match handle_connection(stream, remote_addr, cid, &state, conn_cancel).await {
                        Ok(()) => METRICS.record_outcome("closed"),
                        Err(e) => {
                            tracing::debug!(%remote_addr, error = %e, "connection ended with error");
                            METRICS.record_outcome("error");
                        }
                    }
                });
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ProxyProtocol(#[from] proxy_protocol::ProxyProtocolError),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error(transparent)]
    Dns(#[from] crate::dns::DnsError),
    #[error("no routing entry for username {0:?}")]
    UnknownUser(String),
    #[error("backend has no resolved address")]
    NoBackendAddress,
}

impl utils::error::ReportableError for ConnectionError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        match self {
            ConnectionError::UnknownUser(_) => utils::error::ErrorKind::NotFound,
            ConnectionError::Dns(_) => utils::error::ErrorKind::Dns,
            _ => utils::error::ErrorKind::Internal,
        }
    }
}

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded")
}

async fn handle_connection(
    mut client: TcpStream,
    remote_addr: SocketAddr,
    connection_id: u32,
    state: &GatewayState,
    cancel: CancellationToken,
) -> Result<(), ConnectionError> {
    if state.use_proxy_protocol {
        proxy_protocol::consume_header(&mut client).await?;
    }

    let handshake = protocol::build_initial_handshake(connection_id);
    tokio::time::timeout(state.handshake_timeout, client.write_all(&handshake)).await.map_err(|_| timed_out())??;

    let auth_response = tokio::time::timeout(state.handshake_timeout, read_auth_response(&mut client))
        .await
        .map_err(|_| timed_out())??;

    tracing::debug!(%remote_addr, username = %auth_response.username, "mysql handshake intercepted");

    let Some(backend) = state.routing.lookup(&auth_response.username) else {
        tracing::info!(%remote_addr, username = %auth_response.username, "unknown username; closing connection");
        return Err(ConnectionError::UnknownUser(auth_response.username));
    };

    let addrs = state.dns.resolve(&backend.name, &backend.namespace, &state.cluster_suffix).await?;
    let ip = addrs.first().ok_or(ConnectionError::NoBackendAddress)?;
    let backend_addr = SocketAddr::new(*ip, backend.port);

    let mut backend_stream = tokio::time::timeout(state.dial_timeout, TcpStream::connect(backend_addr))
        .await
        .map_err(|_| timed_out())??;

    splice_backend_handshake(&mut backend_stream, &auth_response, &mut client).await?;

    splice::splice(client, backend_stream, state.pool.clone(), cancel).await;
    Ok(())
}

/// Reads exactly one client authentication-response packet: the fixed 4-byte header,
/// then the body it declares (spec.md §4.3 (b)).
async fn read_auth_response(client: &mut TcpStream) -> Result<protocol::AuthResponse, ConnectionError> {
    let mut header = [0u8; 4];
    client.read_exact(&mut header).await?;
    let (len, _seq) = protocol::parse_header(&header);
    let mut body = vec![0u8; len as usize];
    client.read_exact(&mut body).await?;
    Ok(protocol::parse_auth_response(&header, &body)?)
}

/// Backend handshake splice (spec.md §4.3 "Backend handshake splice"): discard the
/// backend's own initial handshake (we already sent a synthetic one to the client),
/// forward the client's original auth packet, then relay the backend's auth response
/// verbatim back to the client.
async fn splice_backend_handshake(
    backend: &mut TcpStream,
    auth_response: &protocol::AuthResponse,
    client: &mut TcpStream,
) -> Result<(), ConnectionError> {
    let mut header = [0u8; 4];
    backend.read_exact(&mut header).await?;
    let (len, _seq) = protocol::parse_header(&header);
    let mut body = vec![0u8; len as usize];
    backend.read_exact(&mut body).await?;

    backend.write_all(&auth_response.raw).await?;

    let mut resp_header = [0u8; 4];
    backend.read_exact(&mut resp_header).await?;
    let (resp_len, _seq) = protocol::parse_header(&resp_header);
    let mut resp_body = vec![0u8; resp_len as usize];
    backend.read_exact(&mut resp_body).await?;

    client.write_all(&resp_header).await?;
    client.write_all(&resp_body).await?;
    Ok(())
}

pub async fn shutdown_grace(cancel: &CancellationToken, inflight: Arc<Semaphore>, max_connections: usize) {
    utils::shutdown::wait_with_grace(cancel, Duration::from_secs(10), async move {
        let _ = inflight.acquire_many(max_connections as u32).await;
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Drives the handshake parts of `handle_connection` (minus routing/DNS, which are
    /// covered in `routing.rs`/`dns.rs`) against a real loopback socket pair: a fake
    /// client writes an auth-response packet naming `alice`, and the backend side of
    /// this helper plays the role of `handle_connection`'s backend dial + handshake
    /// splice.
    #[tokio::test]
    async fn backend_handshake_splice_forwards_client_auth_and_returns_backend_response() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();

        let backend_task = tokio::spawn(async move {
            let (mut backend_conn, _) = backend_listener.accept().await.unwrap();
            // Backend's own initial handshake, which the gateway must discard.
            let discarded = protocol::build_initial_handshake(7);
            backend_conn.write_all(&discarded).await.unwrap();

            // Read the forwarded client auth packet.
            let mut header = [0u8; 4];
            backend_conn.read_exact(&mut header).await.unwrap();
            let (len, _) = protocol::parse_header(&header);
            let mut body = vec![0u8; len as usize];
            backend_conn.read_exact(&mut body).await.unwrap();
            let parsed = protocol::parse_auth_response(&header, &body).unwrap();
            assert_eq!(parsed.username, "alice");

            // Backend's auth response, forwarded verbatim to the client.
            let resp_body = b"OK".to_vec();
            let mut resp = vec![resp_body.len() as u8, 0, 0, 2];
            resp.extend_from_slice(&resp_body);
            backend_conn.write_all(&resp).await.unwrap();
        });

        let mut fixed_body = vec![0u8; 4 + 4 + 1 + 23];
        fixed_body.extend_from_slice(b"alice");
        fixed_body.push(0);
        let header = [fixed_body.len() as u8, 0, 0, 1];
        let auth_response = protocol::parse_auth_response(&header, &fixed_body).unwrap();

        let mut backend_stream = TcpStream::connect(backend_addr).await.unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move { TcpStream::connect(client_addr).await.unwrap() });
        let (mut client_side, _) = client_listener.accept().await.unwrap();
        let mut fake_client = client_task.await.unwrap();

        splice_backend_handshake(&mut backend_stream, &auth_response, &mut client_side).await.unwrap();
        backend_task.await.unwrap();

        let mut relayed = [0u8; 6];
        fake_client.read_exact(&mut relayed).await.unwrap();
        assert_eq!(&relayed, b"\x02\x00\x00\x02OK");
    }
}
