//! HTTP responses queued on a session's pipeline.
//!
//! A response is a status line, a handful of headers and one of three body
//! kinds. File bodies are streamed straight from disk when the response
//! reaches the head of the pipeline.

use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = concat!("webcontrol/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub enum ResponseBody {
    /// No body bytes; `Content-Length` still describes the resource (HEAD)
    Empty,
    Text(String),
    /// An open file and the number of bytes to send from it
    File(File, u64),
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: Version,
    pub content_type: &'static str,
    pub content_length: u64,
    pub keep_alive: bool,
    pub body: ResponseBody,
}

impl HttpResponse {
    /// A `text/html` response carrying a human-readable message.
    pub fn message(
        status: StatusCode,
        version: Version,
        keep_alive: bool,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self {
            status,
            version,
            content_type: "text/html",
            content_length: body.len() as u64,
            keep_alive,
            body: ResponseBody::Text(body),
        }
    }

    pub fn bad_request(version: Version, keep_alive: bool, why: &str) -> Self {
        Self::message(StatusCode::BAD_REQUEST, version, keep_alive, why)
    }

    /// Header fields sent with this response.
    ///
    /// `Connection` is only spelled out where it differs from the version's
    /// default.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(4);
        headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length));
        let legacy = self.version == Version::HTTP_10;
        if legacy && self.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        } else if !legacy && !self.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        headers
    }

    /// Serializes the status line and headers.
    pub fn head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(160);
        head.extend_from_slice(format!("{:?} ", self.version).as_bytes());
        head.extend_from_slice(self.status.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(self.status.canonical_reason().unwrap_or_default().as_bytes());
        head.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    /// Writes the whole response to `writer` and flushes it.
    pub async fn write_to<W>(self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.head()).await?;
        match self.body {
            ResponseBody::Empty => {}
            ResponseBody::Text(text) => writer.write_all(text.as_bytes()).await?,
            ResponseBody::File(file, len) => {
                let copied = tokio::io::copy(&mut file.take(len), writer).await?;
                if copied != len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file shrank while sending ({copied} of {len} bytes)"),
                    ));
                }
            }
        }
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_message_response_bytes() {
        let response = HttpResponse::bad_request(Version::HTTP_11, true, "Illegal request-target");
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains(&format!("server: {SERVER_NAME}\r\n")));
        assert!(text.contains("content-type: text/html\r\n"));
        assert!(text.contains("content-length: 22\r\n"));
        assert!(!text.contains("connection:"));
        assert!(text.ends_with("\r\n\r\nIllegal request-target"));
    }

    #[test]
    fn test_connection_header() {
        let closing = HttpResponse::message(StatusCode::OK, Version::HTTP_11, false, "");
        assert_eq!(closing.headers()[CONNECTION], "close");

        let kept = HttpResponse::message(StatusCode::OK, Version::HTTP_10, true, "");
        let head = String::from_utf8(kept.head()).unwrap();
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(head.contains("connection: keep-alive\r\n"));

        let plain = HttpResponse::message(StatusCode::NOT_FOUND, Version::HTTP_10, false, "");
        assert!(!plain.headers().contains_key(CONNECTION));
        assert!(String::from_utf8(plain.head()).unwrap().starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_file_body_is_streamed() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello file").unwrap();
        let file = File::open(tmp.path()).await.unwrap();

        let response = HttpResponse {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            content_type: "text/plain",
            content_length: 10,
            keep_alive: true,
            body: ResponseBody::File(file, 10),
        };
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("\r\n\r\nhello file"));
    }
}
