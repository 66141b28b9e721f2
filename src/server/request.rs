//! Minimal HTTP/1.1 request reading.

use crate::error::{GatewayError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAX_HEAD_BYTES: usize = 64 * 1024;
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Why a request could not be read off the wire.
#[derive(Debug)]
pub enum ReadError {
    Closed,
    Malformed(String),
    TooLarge,
    /// Bodies framed by `Transfer-Encoding` instead of `Content-Length`.
    LengthRequired,
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Io(err)
    }
}

impl HttpRequest {
    /// Parse the request line and headers. `head` excludes the blank line.
    pub fn parse_head(head: &str) -> std::result::Result<Self, String> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().filter(|l| !l.is_empty()).ok_or("empty request")?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(format!("invalid request line '{}'", request_line));
        }

        let (raw_path, raw_query) = match parts[1].split_once('?') {
            Some((path, query)) => (path, query),
            None => (parts[1], ""),
        };
        let query: Vec<(String, String)> =
            serde_urlencoded::from_str(raw_query).map_err(|e| format!("invalid query string: {}", e))?;

        let mut path = raw_path.trim_end_matches('/').to_string();
        if path.is_empty() {
            path = "/".to_string();
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            method: parts[0].to_ascii_uppercase(),
            path,
            query,
            headers,
            body: Vec::new(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> std::result::Result<usize, String> {
        match self.header("content-length") {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("invalid Content-Length '{}'", raw)),
        }
    }

    /// Deserialize the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Err(GatewayError::validation("request body must be a JSON object"));
        }
        serde_json::from_slice(&self.body).map_err(|e| GatewayError::validation(format!("invalid JSON body: {}", e)))
    }
}

/// Read one request: headers up to the blank line, then `Content-Length`
/// bytes of body.
pub async fn read_request<S>(stream: &mut S) -> std::result::Result<HttpRequest, ReadError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(ReadError::TooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(if buffer.is_empty() {
                ReadError::Closed
            } else {
                ReadError::Malformed("connection closed before end of headers".to_string())
            });
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buffer[..head_end])
        .map_err(|_| ReadError::Malformed("request headers are not valid UTF-8".to_string()))?;
    let mut request = HttpRequest::parse_head(head).map_err(ReadError::Malformed)?;
    if request
        .header("transfer-encoding")
        .map_or(false, |te| !te.trim().eq_ignore_ascii_case("identity"))
    {
        return Err(ReadError::LengthRequired);
    }

    let length = request.content_length().map_err(ReadError::Malformed)?;
    if length > MAX_BODY_BYTES {
        return Err(ReadError::TooLarge);
    }

    let mut body = buffer.split_off(head_end + 4);
    while body.len() < length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ReadError::Malformed("connection closed before end of body".to_string()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    request.body = body;
    Ok(request)
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
