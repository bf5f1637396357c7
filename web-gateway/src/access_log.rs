//! Nginx-like access log line (spec.md §4.1 "Access log") plus a structured `tracing`
//! event carrying the same fields (SPEC_FULL.md §3).

use std::fmt;
use std::time::Duration;

use http::{HeaderMap, Method, Uri, Version};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AccessLogLine {
    pub client_ip: String,
    pub method: String,
    pub uri: String,
    pub protocol: String,
    pub status: u16,
    pub bytes: u64,
    pub referer: String,
    pub user_agent: String,
    pub duration_ms: u128,
    /// Resolved upstream address, or a tag such as `dns-error`/`no-upstream` when the
    /// request never reached a backend (spec.md §7 "distinguishing upstream tag").
    pub upstream: String,
}

impl AccessLogLine {
    pub fn new(method: &Method, uri: &Uri, version: Version, headers: &HeaderMap, remote_addr: &str) -> Self {
        let client_ip = client_ip(headers, remote_addr);
        let referer = header_str(headers, http::header::REFERER);
        let user_agent = header_str(headers, http::header::USER_AGENT);
        Self {
            client_ip,
            method: method.to_string(),
            uri: uri.to_string(),
            protocol: format!("{version:?}"),
            status: 0,
            bytes: 0,
            referer,
            user_agent,
            duration_ms: 0,
            upstream: "-".to_owned(),
        }
    }

    pub fn finish(mut self, status: u16, bytes: u64, duration: Duration, upstream: impl Into<String>) -> Self {
        self.status = status;
        self.bytes = bytes;
        self.duration_ms = duration.as_millis();
        self.upstream = upstream.into();
        self
    }

    pub fn emit(&self) {
        tracing::info!(
            client_ip = %self.client_ip,
            method = %self.method,
            uri = %self.uri,
            status = self.status,
            bytes = self.bytes,
            duration_ms = %self.duration_ms,
            upstream = %self.upstream,
            access_log = %self,
            "request handled"
        );
    }
}

impl fmt::Display for AccessLogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - - \"{} {} {}\" {} {} \"{}\" \"{}\" {}ms upstream={}",
            self.client_ip,
            self.method,
            self.uri,
            self.protocol,
            self.status,
            self.bytes,
            self.referer,
            self.user_agent,
            self.duration_ms,
            self.upstream,
        )
    }
}

fn client_ip(headers: &HeaderMap, remote_addr: &str) -> String {
    if let Some(v) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = v.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    if let Some(v) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !v.trim().is_empty() {
            return v.trim().to_owned();
        }
    }
    remote_addr.to_owned()
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> String {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("-").to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_x_forwarded_for_then_x_real_ip_then_remote() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, "10.0.0.9"), "10.0.0.9");

        headers.insert("x-real-ip", "203.0.113.5".parse().unwrap());
        assert_eq!(client_ip(&headers, "10.0.0.9"), "203.0.113.5");

        headers.insert("x-forwarded-for", "198.51.100.1, 203.0.113.5".parse().unwrap());
        assert_eq!(client_ip(&headers, "10.0.0.9"), "198.51.100.1");
    }

    #[test]
    fn display_matches_nginx_like_shape() {
        let headers = HeaderMap::new();
        let line = AccessLogLine::new(&Method::GET, &"/".parse().unwrap(), Version::HTTP_11, &headers, "10.0.0.1")
            .finish(200, 5, Duration::from_millis(12), "10.1.2.3:3000");
        let rendered = line.to_string();
        assert!(rendered.contains("\"GET / HTTP/1.1\" 200 5"));
        assert!(rendered.contains("upstream=10.1.2.3:3000"));
    }
}
