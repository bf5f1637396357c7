//! Bidirectional byte splice between a client and its backend (spec.md §4.3
//! "Splicing"): two tasks copy bytes in each direction using buffers obtained from the
//! shared pool; errors from either direction are delivered on a shared channel, and the
//! connection terminates when either side returns (including `EOF`).

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::buffer_pool::BufferPool;
use crate::metrics::METRICS;

#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl utils::error::ReportableError for SpliceError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Internal
    }
}

/// Copies from `reader` to `writer` using a pooled buffer until EOF or error, returning
/// the buffer to the pool on every exit path.
async fn pump(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf, pool: Arc<BufferPool>) -> Result<(), SpliceError> {
    let mut buf = pool.get();
    let result = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                writer.shutdown().await.ok();
                return Ok(());
            }
            writer.write_all(&buf[..n]).await?;
            METRICS.record_bytes_spliced(n as u64);
        }
    }
    .await;
    pool.put(buf);
    result
}

/// Splices `client` and `backend` bidirectionally until either direction ends
/// (spec.md §5 "the two directions are independent and unordered with respect to each
/// other") or `cancel` fires (server shutdown).
pub async fn splice(
    client: tokio::net::TcpStream,
    backend: tokio::net::TcpStream,
    pool: Arc<BufferPool>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let client_to_backend = pump(client_read, backend_write, pool.clone());
    let backend_to_client = pump(backend_read, client_write, pool);

    tokio::select! {
        result = client_to_backend => {
            if let Err(e) = result {
                tracing::debug!(error = %e, direction = "client->backend", "splice direction ended");
            }
        }
        result = backend_to_client => {
            if let Err(e) = result {
                tracing::debug!(error = %e, direction = "backend->client", "splice direction ended");
            }
        }
        _ = cancel.cancelled() => {
            tracing::debug!("splice cancelled by shutdown");
        }
    }
}
