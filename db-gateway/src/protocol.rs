//! Just enough of the MySQL-compatible wire protocol to extract the authenticating
//! username from a client's handshake-response packet without ever possessing the
//! backend password (spec.md §4.3 "Wire protocol (subset)").
//!
//! The gateway never decodes a full handshake: it synthesizes its own initial
//! handshake packet, reads exactly one client response packet off the wire, and
//! forwards those raw bytes to whichever backend the username routes to.

use bytes::{BufMut, Bytes, BytesMut};

/// Fixed values the synthetic initial handshake packet advertises. The client never
/// uses the auth-plugin data for anything (the gateway doesn't authenticate it), so
/// these can be constant across connections.
const PROTOCOL_VERSION: u8 = 10;
const SERVER_VERSION: &str = "8.0.34-portway";
const AUTH_PLUGIN_NAME: &[u8] = b"mysql_native_password";

/// CLIENT_LONG_PASSWORD | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH
const CAPABILITY_FLAGS: u32 = 0x0000_0001 | 0x0000_0200 | 0x0000_8000 | 0x0008_0000;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("handshake response packet is too short ({0} bytes)")]
    Truncated(usize),
    #[error("handshake response packet is missing a null-terminated username")]
    MissingUsername,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl utils::error::ReportableError for ProtocolError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::User
    }
}

/// Builds the synthetic initial handshake packet (spec.md §4.3 step (a)): protocol
/// version 10, a fixed server version string, 8+12 bytes of auth-plugin data, the
/// capability flags above, and the `mysql_native_password` plugin name.
pub fn build_initial_handshake(connection_id: u32) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(PROTOCOL_VERSION);
    body.put_slice(SERVER_VERSION.as_bytes());
    body.put_u8(0); // null terminator
    body.put_u32_le(connection_id);

    let auth_plugin_data_part1 = [0x01u8; 8];
    body.put_slice(&auth_plugin_data_part1);
    body.put_u8(0); // filler

    let capability_flags_lower = (CAPABILITY_FLAGS & 0xFFFF) as u16;
    body.put_u16_le(capability_flags_lower);

    body.put_u8(0xff); // character set (binary)
    body.put_u16_le(0x0002); // status flags: SERVER_STATUS_AUTOCOMMIT

    let capability_flags_upper = ((CAPABILITY_FLAGS >> 16) & 0xFFFF) as u16;
    body.put_u16_le(capability_flags_upper);

    body.put_u8(21); // auth plugin data length (8 + 13, including terminator)
    body.put_slice(&[0u8; 10]); // reserved

    let auth_plugin_data_part2 = [0x02u8; 12];
    body.put_slice(&auth_plugin_data_part2);
    body.put_u8(0); // null terminator on part 2

    body.put_slice(AUTH_PLUGIN_NAME);
    body.put_u8(0); // null terminator

    wrap_packet(0, &body)
}

fn wrap_packet(sequence_id: u8, body: &[u8]) -> Bytes {
    let mut packet = BytesMut::with_capacity(4 + body.len());
    let len = body.len() as u32;
    packet.put_u8((len & 0xff) as u8);
    packet.put_u8(((len >> 8) & 0xff) as u8);
    packet.put_u8(((len >> 16) & 0xff) as u8);
    packet.put_u8(sequence_id);
    packet.put_slice(body);
    packet.freeze()
}

/// A client's handshake-response packet, retained in full (spec.md §4.3 (c) "retains
/// the full client packet bytes for forwarding") alongside the username extracted from
/// it.
pub struct AuthResponse {
    pub username: String,
    pub raw: Bytes,
}

/// Parses the fixed 4-byte packet header (24-bit little-endian length + 1 sequence
/// byte) out of `header`, returning the body length to read next.
pub fn parse_header(header: &[u8; 4]) -> (u32, u8) {
    let len = header[0] as u32 | (header[1] as u32) << 8 | (header[2] as u32) << 16;
    (len, header[3])
}

/// Parses the authentication-response body (spec.md §4.3 (b)): skips 9 bytes of
/// capabilities/max-packet/charset and 23 reserved bytes, then reads the
/// null-terminated username. `raw` is the full packet (header + body) as received, so
/// it can be forwarded to the backend verbatim.
pub fn parse_auth_response(header: &[u8; 4], body: &[u8]) -> Result<AuthResponse, ProtocolError> {
    const FIXED_PREFIX: usize = 9 + 23; // capabilities(4) + max-packet(4) + charset(1) + reserved(23)
    if body.len() < FIXED_PREFIX {
        return Err(ProtocolError::Truncated(body.len()));
    }
    let rest = &body[FIXED_PREFIX..];
    let nul = rest.iter().position(|&b| b == 0).ok_or(ProtocolError::MissingUsername)?;
    let username = String::from_utf8_lossy(&rest[..nul]).into_owned();

    let mut raw = BytesMut::with_capacity(4 + body.len());
    raw.put_slice(header);
    raw.put_slice(body);
    Ok(AuthResponse { username, raw: raw.freeze() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_response_body(username: &str) -> Vec<u8> {
        let mut body = vec![0u8; 4 + 4 + 1 + 23];
        body.extend_from_slice(username.as_bytes());
        body.push(0);
        body
    }

    #[test]
    fn parse_auth_response_extracts_username() {
        let body = auth_response_body("alice");
        let header = [body.len() as u8, 0, 0, 1];
        let parsed = parse_auth_response(&header, &body).unwrap();
        assert_eq!(parsed.username, "alice");
    }

    #[test]
    fn parse_auth_response_preserves_raw_bytes_byte_identical() {
        let body = auth_response_body("bob");
        let header = [body.len() as u8, 0, 0, 1];
        let parsed = parse_auth_response(&header, &body).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&header);
        expected.extend_from_slice(&body);
        assert_eq!(parsed.raw.as_ref(), expected.as_slice());
    }

    #[test]
    fn parse_auth_response_rejects_truncated_body() {
        let body = vec![0u8; 10];
        let header = [body.len() as u8, 0, 0, 1];
        assert!(matches!(parse_auth_response(&header, &body), Err(ProtocolError::Truncated(_))));
    }

    #[test]
    fn parse_auth_response_rejects_missing_null_terminator() {
        let mut body = vec![0u8; 4 + 4 + 1 + 23];
        body.extend_from_slice(b"nonulluser");
        let header = [body.len() as u8, 0, 0, 1];
        assert!(matches!(parse_auth_response(&header, &body), Err(ProtocolError::MissingUsername)));
    }

    #[test]
    fn parse_header_decodes_24_bit_little_endian_length() {
        let (len, seq) = parse_header(&[0x05, 0x00, 0x00, 0x02]);
        assert_eq!(len, 5);
        assert_eq!(seq, 2);
    }

    #[test]
    fn initial_handshake_advertises_fixed_plugin_name() {
        let packet = build_initial_handshake(42);
        assert!(packet.windows(AUTH_PLUGIN_NAME.len()).any(|w| w == AUTH_PLUGIN_NAME));
        assert_eq!(packet[4], PROTOCOL_VERSION);
    }
}
