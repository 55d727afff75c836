//! Incremental HTTP/1.x request parsing.
//!
//! The HTTP session accumulates bytes in a buffer and calls
//! [`parse_request`] after every read. Heads are parsed with `httparse`; a
//! request is only returned once its head and any `Content-Length` body are
//! complete. The caller then drops the consumed prefix and keeps the rest
//! for the next request.

use crate::error::RequestError;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, UPGRADE};
use http::header::{AsHeaderName, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Version};

/// Most header lines accepted in one request head.
const MAX_HEADERS: usize = 64;

/// A parsed request head. Bodies are consumed but not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl HttpRequest {
    /// Header lookup returning the first value, trimmed.
    ///
    /// Values that are not visible ASCII read as missing.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    }

    fn header_has_token(&self, name: &HeaderName, token: &str) -> bool {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    /// Whether the connection stays open after this request is answered.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent;
    /// HTTP/1.0 only keeps the connection when asked to.
    pub fn keep_alive(&self) -> bool {
        if self.version == Version::HTTP_10 {
            self.header_has_token(&CONNECTION, "keep-alive")
        } else {
            !self.header_has_token(&CONNECTION, "close")
        }
    }

    /// Whether this is a WebSocket opening handshake.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self.header_has_token(&CONNECTION, "upgrade")
            && self
                .header(UPGRADE)
                .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
    }
}

/// Tries to parse one request from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, or the request together
/// with the number of bytes it occupied.
pub fn parse_request(
    buf: &[u8],
    max_request_bytes: usize,
) -> Result<Option<(HttpRequest, usize)>, RequestError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut head = httparse::Request::new(&mut slots);

    let head_len = match head.parse(buf).map_err(malformed)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial if buf.len() > max_request_bytes => {
            return Err(RequestError::TooLarge(max_request_bytes));
        }
        httparse::Status::Partial => return Ok(None),
    };
    if head_len > max_request_bytes {
        return Err(RequestError::TooLarge(max_request_bytes));
    }

    let request = into_request(&head)?;

    if request.headers.contains_key(TRANSFER_ENCODING) {
        return Err(RequestError::UnsupportedEncoding);
    }

    let body_len = match request.header(CONTENT_LENGTH) {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid Content-Length"))?,
        None => 0,
    };
    if body_len > max_request_bytes {
        return Err(RequestError::TooLarge(max_request_bytes));
    }

    let total = head_len + body_len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((request, total)))
}

fn into_request(head: &httparse::Request<'_, '_>) -> Result<HttpRequest, RequestError> {
    let method = head
        .method
        .ok_or(RequestError::Malformed("missing method"))
        .and_then(|method| {
            Method::from_bytes(method.as_bytes())
                .map_err(|_| RequestError::Malformed("invalid method"))
        })?;
    let target = head
        .path
        .ok_or(RequestError::Malformed("missing request target"))?;
    let version = match head.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(RequestError::Malformed("unsupported HTTP version")),
    };

    let mut headers = HeaderMap::with_capacity(head.headers.len());
    for header in head.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| RequestError::Malformed("invalid header name"))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| RequestError::Malformed("invalid header value"))?;
        headers.append(name, value);
    }

    Ok(HttpRequest {
        method,
        target: target.to_string(),
        version,
        headers,
    })
}

fn malformed(e: httparse::Error) -> RequestError {
    RequestError::Malformed(match e {
        httparse::Error::HeaderName => "invalid header name",
        httparse::Error::HeaderValue => "invalid header value",
        httparse::Error::NewLine => "invalid line ending",
        httparse::Error::Status => "invalid status",
        httparse::Error::Token => "invalid token in request line",
        httparse::Error::TooManyHeaders => "too many header lines",
        httparse::Error::Version => "unsupported HTTP version",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HOST;

    const MAX: usize = 16 * 1024;

    fn parse(raw: &str) -> HttpRequest {
        let (request, used) = parse_request(raw.as_bytes(), MAX).unwrap().unwrap();
        assert_eq!(used, raw.len());
        request
    }

    #[test]
    fn test_simple_get() {
        let request = parse("GET /index.html HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.target, "/index.html");
        assert_eq!(request.version, Version::HTTP_11);
        assert_eq!(request.header(HOST), Some("localhost"));
        assert_eq!(request.header("accept"), Some("*/*"));
        assert!(request.keep_alive());
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\nHost: x\r\n", MAX), Ok(None));
        assert_eq!(parse_request(b"GE", MAX), Ok(None));
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab", MAX),
            Ok(None)
        );
    }

    #[test]
    fn test_pipelined_requests_are_split() {
        let raw = b"GET /a HTTP/1.1\r\n\r\nPOST /b HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyzGET /c HTTP/1.1\r\n\r\n";
        let mut offset = 0;
        let mut targets = Vec::new();
        while let Some((request, used)) = parse_request(&raw[offset..], MAX).unwrap() {
            targets.push(request.target);
            offset += used;
        }
        assert_eq!(targets, vec!["/a", "/b", "/c"]);
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn test_keep_alive_rules() {
        assert!(!parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive());
        assert!(!parse("GET / HTTP/1.0\r\n\r\n").keep_alive());
        assert!(parse("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").keep_alive());
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        let request = parse(
            "GET /ws HTTP/1.1\r\nHost: x\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        );
        assert!(request.is_websocket_upgrade());

        let request = parse("POST /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n");
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            parse_request(b"GET / HTTP/2.0\r\n\r\n", MAX),
            Err(RequestError::Malformed("unsupported HTTP version"))
        );
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n", MAX),
            Err(RequestError::Malformed("invalid header name"))
        );
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n", MAX),
            Err(RequestError::UnsupportedEncoding)
        );
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n", MAX),
            Err(RequestError::Malformed("invalid Content-Length"))
        );
    }

    #[test]
    fn test_too_many_headers() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..=MAX_HEADERS {
            raw.push_str(&format!("X-Filler-{i}: y\r\n"));
        }
        raw.push_str("\r\n");
        assert_eq!(
            parse_request(raw.as_bytes(), MAX),
            Err(RequestError::Malformed("too many header lines"))
        );
    }

    #[test]
    fn test_size_guard() {
        let long = format!("GET /{} HTTP/1.1\r\n", "a".repeat(64));
        assert_eq!(parse_request(long.as_bytes(), 32), Err(RequestError::TooLarge(32)));
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nContent-Length: 99999\r\n\r\n", 1024),
            Err(RequestError::TooLarge(1024))
        );
    }
}
