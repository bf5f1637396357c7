//! Optional PROXY protocol v1/v2 header consumption (spec.md §4.3 "Optional
//! proxy-protocol": "If configured, the listener is wrapped to consume a v1/v2
//! proxy-protocol header before the MySQL bytes"). The gateway only needs to strip the
//! header off the stream; it doesn't act on the addresses it carries.

use tokio::io::{AsyncRead, AsyncReadExt};

const V2_SIGNATURE: [u8; 12] = [0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A];

#[derive(Debug, thiserror::Error)]
pub enum ProxyProtocolError {
    #[error("i/o error reading proxy-protocol header: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognized proxy-protocol header")]
    Unrecognized,
}

impl utils::error::ReportableError for ProxyProtocolError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::User
    }
}

/// Consumes and discards a v1 (text) or v2 (binary) PROXY protocol header from the
/// front of `stream`, leaving the cursor positioned at the first MySQL protocol byte.
/// Generic over `AsyncRead` so it can be driven against a real `TcpStream` in
/// production and an in-memory duplex pair in tests.
pub async fn consume_header<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(), ProxyProtocolError> {
    let mut sig = [0u8; 5];
    stream.read_exact(&mut sig).await?;

    if sig == V2_SIGNATURE[..5] {
        let mut rest_of_sig = [0u8; 7];
        stream.read_exact(&mut rest_of_sig).await?;
        consume_v2_rest(stream).await
    } else if &sig == b"PROXY" {
        consume_v1_rest(stream).await
    } else {
        Err(ProxyProtocolError::Unrecognized)
    }
}

/// Reads the remainder of a v1 header (everything after the already-consumed `PROXY`
/// signature) up to and including the terminating CRLF.
async fn consume_v1_rest<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(), ProxyProtocolError> {
    let mut line: Vec<u8> = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        line.push(byte[0]);
        if line.len() >= 2 && line[line.len() - 2] == b'\r' && line[line.len() - 1] == b'\n' {
            return Ok(());
        }
        if line.len() > 107 {
            return Err(ProxyProtocolError::Unrecognized);
        }
    }
}

/// Reads the remainder of a v2 header (everything after the already-consumed 12-byte
/// signature): version/command, family/protocol, address-block length, then the
/// address block itself, all discarded.
async fn consume_v2_rest<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(), ProxyProtocolError> {
    let mut rest_of_header = [0u8; 4];
    stream.read_exact(&mut rest_of_header).await?;
    let len = u16::from_be_bytes([rest_of_header[2], rest_of_header[3]]) as usize;
    let mut address_block = vec![0u8; len];
    stream.read_exact(&mut address_block).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn consume_header_reads_v1_up_to_crlf_and_leaves_payload() {
        let (mut client, mut server) = duplex(256);
        client.write_all(b"PROXY TCP4 127.0.0.1 127.0.0.2 1234 3306\r\n").await.unwrap();
        client.write_all(b"mysql-payload").await.unwrap();

        consume_header(&mut server).await.unwrap();

        let mut rest = [0u8; 13];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"mysql-payload");
    }

    #[tokio::test]
    async fn consume_header_reads_v2_and_leaves_payload() {
        let (mut client, mut server) = duplex(256);
        let mut header = Vec::new();
        header.extend_from_slice(&V2_SIGNATURE);
        header.push(0x21); // version 2, command PROXY
        header.push(0x11); // AF_INET, STREAM
        let address_block = [0u8; 12]; // 2x IPv4 + 2x port
        header.extend_from_slice(&(address_block.len() as u16).to_be_bytes());
        header.extend_from_slice(&address_block);
        client.write_all(&header).await.unwrap();
        client.write_all(b"mysql-payload").await.unwrap();

        consume_header(&mut server).await.unwrap();

        let mut rest = [0u8; 13];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"mysql-payload");
    }

    #[tokio::test]
    async fn consume_header_rejects_unrecognized_signature() {
        let (mut client, mut server) = duplex(256);
        client.write_all(b"HELLO").await.unwrap();
        assert!(matches!(consume_header(&mut server).await, Err(ProxyProtocolError::Unrecognized)));
    }
}
