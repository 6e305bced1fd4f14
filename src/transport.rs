//! Collector transport.
//!
//! The sink talks to the collector through [`CollectorTransport`], so tests can
//! script responses without a socket. [`HttpTransport`] is the real thing: a
//! one-request-per-connection HTTP/1.1 client on top of `tokio::net`.

use crate::config::ConfigError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_HTTP_PORT: u16 = 80;
/// Collector replies are small JSON documents; anything larger is refused.
pub const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorResponse {
    pub status: u16,
    pub body: String,
}

impl CollectorResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

#[async_trait]
pub trait CollectorTransport: Send + Sync + 'static {
    async fn get(&self, path: &str) -> Result<CollectorResponse, TransportError>;

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: String,
    ) -> Result<CollectorResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransport {
    host: String,
    port: u16,
    path_prefix: String,
}

impl HttpTransport {
    /// Accepts `http://host[:port][/prefix]`, where `host` may be a bracketed
    /// IPv6 literal such as `[::1]`.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let rest = base_url
            .trim()
            .strip_prefix("http://")
            .ok_or_else(|| ConfigError::UnsupportedScheme(base_url.to_string()))?;

        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };

        let invalid = || ConfigError::InvalidUrl(base_url.to_string());
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
                let port = match rest {
                    "" => DEFAULT_HTTP_PORT,
                    rest => rest
                        .strip_prefix(':')
                        .and_then(|port| port.parse::<u16>().ok())
                        .ok_or_else(invalid)?,
                };
                (host, port)
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None => (authority, DEFAULT_HTTP_PORT),
            },
        };

        if host.is_empty() {
            return Err(ConfigError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path_prefix: path.trim_end_matches('/').to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == DEFAULT_HTTP_PORT {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<CollectorResponse, TransportError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut head = format!(
            "{method} {}{path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nAccept: application/json\r\nContent-Length: {}\r\n",
            self.path_prefix,
            self.host_header(),
            body.len()
        );
        if let Some(content_type) = content_type {
            head.push_str("Content-Type: ");
            head.push_str(content_type);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body).await?;
        stream.flush().await?;

        let raw = read_capped(stream, MAX_RESPONSE_BYTES).await?;
        parse_response(&raw)
    }
}

/// Read until EOF, failing once more than `limit` bytes arrive.
async fn read_capped<R>(reader: R, limit: u64) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    reader.take(limit + 1).read_to_end(&mut raw).await?;
    if raw.len() as u64 > limit {
        return Err(TransportError::MalformedResponse(format!(
            "response exceeds {limit} bytes"
        )));
    }
    Ok(raw)
}

#[async_trait]
impl CollectorTransport for HttpTransport {
    async fn get(&self, path: &str) -> Result<CollectorResponse, TransportError> {
        self.send("GET", path, None, &[]).await
    }

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: String,
    ) -> Result<CollectorResponse, TransportError> {
        self.send("POST", path, Some(content_type), body.as_bytes()).await
    }
}

/// Parse a complete HTTP/1.x response read until connection close.
pub fn parse_response(raw: &[u8]) -> Result<CollectorResponse, TransportError> {
    let header_end = find(raw, b"\r\n\r\n")
        .ok_or_else(|| TransportError::MalformedResponse("missing header terminator".to_string()))?;
    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| TransportError::MalformedResponse("non-utf8 headers".to_string()))?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransportError::MalformedResponse(format!(
            "unexpected status line {status_line:?}"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TransportError::MalformedResponse(format!("bad status in {status_line:?}")))?;

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.to_ascii_lowercase().contains("chunked");
        }
    }

    let payload = &raw[header_end + 4..];
    let body = if chunked {
        decode_chunked(payload)?
    } else {
        match content_length {
            Some(length) => payload[..length.min(payload.len())].to_vec(),
            None => payload.to_vec(),
        }
    };

    Ok(CollectorResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    loop {
        let line_end = find(data, b"\r\n")
            .ok_or_else(|| TransportError::MalformedResponse("truncated chunk size".to_string()))?;
        let size_line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| TransportError::MalformedResponse("non-utf8 chunk size".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| TransportError::MalformedResponse(format!("bad chunk size {size_hex:?}")))?;

        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(TransportError::MalformedResponse("truncated chunk".to_string()));
        }
        body.extend_from_slice(&data[..size]);
        data = data[size..].strip_prefix(b"\r\n").unwrap_or(&data[size..]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
