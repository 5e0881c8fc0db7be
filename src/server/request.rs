//! HTTP request parsing.

use crate::error::{Error, Result};
use crate::ids::RequestId;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use may::net::TcpStream;
use std::collections::HashMap;
use std::io::Read;

/// Maximum size of the request head (request line + headers).
const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Maximum accepted body size.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A parsed HTTP request.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    /// Path component of the request target, without the query string.
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive single-header lookup, as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// True when the client asked to switch protocols to WebSocket.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self.header("connection").is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
        });
        upgrade && connection
    }
}

/// Read one request from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything; a truncated or malformed request is an error.
pub fn read_request(stream: &mut TcpStream) -> Result<Option<Request>> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(malformed("request head too large"));
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(malformed("connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| malformed("request head is not valid UTF-8"))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| malformed("empty request"))?;
    let mut parts = request_line.split(' ');
    let method_token = parts.next().ok_or_else(|| malformed("missing method"))?;
    let target = parts.next().ok_or_else(|| malformed("missing request target"))?;
    let version = parts.next().ok_or_else(|| malformed("missing HTTP version"))?;
    if !version.starts_with("HTTP/1.") {
        return Err(malformed("unsupported HTTP version"));
    }
    // from_bytes accepts any valid token, so extension methods survive
    // parsing and get their 501 from the dispatcher instead of a 400 here.
    let method = Method::from_bytes(method_token.as_bytes())
        .map_err(|_| malformed("invalid method token"))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("header line without `:`"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| malformed("invalid header name"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| malformed("invalid header value"))?;
        headers.append(name, value);
    }

    let (path, query) = split_target(target);
    let cookies = parse_cookies(&headers);

    let content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(malformed("request body too large"));
    }
    let mut body = buf.split_off(head_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(malformed("connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        id: RequestId::new(),
        method,
        path,
        query,
        headers,
        cookies,
        body,
    }))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn malformed(reason: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        reason.to_string(),
    ))
}

fn split_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, qs)) => {
            let query = url::form_urlencoded::parse(qs.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            (path.to_string(), query)
        }
        None => (target.to_string(), HashMap::new()),
    }
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(http::header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_str(raw).unwrap(),
        );
        headers
    }

    #[test]
    fn splits_target_with_query() {
        let (path, query) = split_target("/search?q=grackle&page=2");
        assert_eq!(path, "/search");
        assert_eq!(query["q"], "grackle");
        assert_eq!(query["page"], "2");
    }

    #[test]
    fn decodes_query_values() {
        let (_, query) = split_target("/s?q=a+b%21");
        assert_eq!(query["q"], "a b!");
    }

    #[test]
    fn parses_multiple_cookies() {
        let headers = headers_with_cookie("sid=abc123; theme=dark");
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies["sid"], "abc123");
        assert_eq!(cookies["theme"], "dark");
    }

    #[test]
    fn detects_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("connection", HeaderValue::from_static("keep-alive, Upgrade"));
        let req = Request {
            id: RequestId::new(),
            method: Method::GET,
            path: "/ws".into(),
            query: HashMap::new(),
            headers,
            cookies: HashMap::new(),
            body: Vec::new(),
        };
        assert!(req.is_websocket_upgrade());
    }
}
