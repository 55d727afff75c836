//! Static file serving from the document root.

use super::request::HttpRequest;
use super::response::{HttpResponse, ResponseBody};
use http::StatusCode;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tracing::debug;

/// Returns a content type based on the extension of `path`.
///
/// Matching is case-insensitive; anything unrecognized is served as
/// `application/text`.
pub fn mime_type(path: &str) -> &'static str {
    let ext = match path.rfind('.') {
        Some(pos) => path[pos..].to_ascii_lowercase(),
        None => return "application/text",
    };
    match ext.as_str() {
        ".htm" | ".html" | ".php" => "text/html",
        ".css" => "text/css",
        ".txt" => "text/plain",
        ".js" => "application/javascript",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".swf" => "application/x-shockwave-flash",
        ".flv" => "video/x-flv",
        ".png" => "image/png",
        ".jpe" | ".jpeg" | ".jpg" => "image/jpeg",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".ico" => "image/vnd.microsoft.icon",
        ".tiff" | ".tif" => "image/tiff",
        ".svg" | ".svgz" => "image/svg+xml",
        _ => "application/text",
    }
}

/// Maps a request target onto a file under `doc_root`.
///
/// Returns `None` for targets that must be rejected: empty, relative, or
/// containing `..` anywhere. Every segment must also be a plain file name
/// on the host platform, so drive letters, backslashes and other prefixes
/// never reach [`PathBuf::push`], which would let them replace the root.
/// The query string and fragment are ignored, and a trailing `/` selects
/// `index.html`.
pub fn resolve_path(doc_root: &Path, target: &str) -> Option<PathBuf> {
    if target.is_empty() || !target.starts_with('/') || target.contains("..") {
        return None;
    }

    let path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let mut resolved = doc_root.to_path_buf();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if !is_plain_segment(segment) {
            return None;
        }
        resolved.push(segment);
    }
    if path.ends_with('/') {
        resolved.push("index.html");
    }
    Some(resolved)
}

fn is_plain_segment(segment: &str) -> bool {
    if segment.contains(['\\', ':']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Produces the response for a plain (non-upgrade) request.
pub async fn handle_request(doc_root: &Path, request: &HttpRequest) -> HttpResponse {
    let version = request.version;
    let keep_alive = request.keep_alive();

    let head_only = match request.method.as_str() {
        "GET" => false,
        "HEAD" => true,
        _ => return HttpResponse::bad_request(version, keep_alive, "Unknown HTTP-method"),
    };

    let Some(path) = resolve_path(doc_root, &request.target) else {
        return HttpResponse::bad_request(version, keep_alive, "Illegal request-target");
    };

    let not_found = || {
        HttpResponse::message(
            StatusCode::NOT_FOUND,
            version,
            keep_alive,
            format!("The resource '{}' was not found.", request.target),
        )
    };

    let (file, size) = match open_file(&path).await {
        Ok(Some(opened)) => opened,
        Ok(None) => return not_found(),
        Err(e) if e.kind() == ErrorKind::NotFound => return not_found(),
        Err(e) => {
            debug!("Failed to open {}: {}", path.display(), e);
            return HttpResponse::message(
                StatusCode::INTERNAL_SERVER_ERROR,
                version,
                keep_alive,
                format!("An error occurred: '{e}'"),
            );
        }
    };

    let body = if head_only {
        ResponseBody::Empty
    } else {
        ResponseBody::File(file, size)
    };

    HttpResponse {
        status: StatusCode::OK,
        version,
        content_type: mime_type(&path.to_string_lossy()),
        content_length: size,
        keep_alive,
        body,
    }
}

// Directories and other non-files read as missing.
async fn open_file(path: &Path) -> std::io::Result<Option<(File, u64)>> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(Some((file, metadata.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Version};
    use tempfile::TempDir;

    fn request(method: &str, target: &str) -> HttpRequest {
        HttpRequest {
            method: Method::from_bytes(method.as_bytes()).unwrap(),
            target: target.to_string(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    fn doc_root() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>console</h1>").unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js").join("app.JS"), "let x = 1;").unwrap();
        dir
    }

    fn body_text(response: &HttpResponse) -> &str {
        match &response.body {
            ResponseBody::Text(text) => text,
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type("/index.html"), "text/html");
        assert_eq!(mime_type("/a/b.CSS"), "text/css");
        assert_eq!(mime_type("/pic.jpeg"), "image/jpeg");
        assert_eq!(mime_type("/icon.svgz"), "image/svg+xml");
        assert_eq!(mime_type("/archive.tar.gz"), "application/text");
        assert_eq!(mime_type("/README"), "application/text");
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/srv/wdata");
        assert_eq!(resolve_path(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve_path(root, "/js/app.js?v=3"), Some(root.join("js").join("app.js")));
        assert_eq!(resolve_path(root, "/docs/#top"), Some(root.join("docs").join("index.html")));
        assert_eq!(resolve_path(root, ""), None);
        assert_eq!(resolve_path(root, "index.html"), None);
        assert_eq!(resolve_path(root, "/../secret"), None);
        assert_eq!(resolve_path(root, "/a/..b"), None);
    }

    #[test]
    fn test_resolve_path_rejects_foreign_prefixes() {
        let root = Path::new("/srv/wdata");
        assert_eq!(resolve_path(root, "/C:/Windows/win.ini"), None);
        assert_eq!(resolve_path(root, "/c:"), None);
        assert_eq!(resolve_path(root, "/share/c:x"), None);
        assert_eq!(resolve_path(root, "/a\\b"), None);
        assert_eq!(resolve_path(root, "/\\\\server\\share\\x"), None);
        assert_eq!(resolve_path(root, "/./index.html"), None);
        // Dots inside a name are fine
        assert_eq!(resolve_path(root, "/app.min.js"), Some(root.join("app.min.js")));
    }

    #[tokio::test]
    async fn test_get_index() {
        let dir = doc_root();
        let response = handle_request(dir.path(), &request("GET", "/")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "text/html");
        assert_eq!(response.content_length, 16);
        assert!(matches!(response.body, ResponseBody::File(_, 16)));
    }

    #[tokio::test]
    async fn test_head_has_length_but_no_body() {
        let dir = doc_root();
        let response = handle_request(dir.path(), &request("HEAD", "/js/app.JS")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/javascript");
        assert_eq!(response.content_length, 10);
        assert!(matches!(response.body, ResponseBody::Empty));
    }

    #[tokio::test]
    async fn test_error_responses() {
        let dir = doc_root();

        let response = handle_request(dir.path(), &request("POST", "/")).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_text(&response), "Unknown HTTP-method");

        let response = handle_request(dir.path(), &request("GET", "/../etc/passwd")).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_text(&response), "Illegal request-target");

        let response = handle_request(dir.path(), &request("GET", "/missing.png")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(body_text(&response), "The resource '/missing.png' was not found.");
        assert_eq!(response.content_type, "text/html");

        // A directory without a trailing slash is not a file
        let response = handle_request(dir.path(), &request("GET", "/js")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
