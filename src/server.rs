use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};

/// Loopback static-file server for extracted tour content. Serving over
/// http:// lets the embedded viewer resolve relative asset references that
/// a direct file URI load would miss on some platforms.
///
/// At most one instance runs per process; `start` stops any prior instance
/// first and `stop` is a no-op when nothing is running.
pub struct ContentServer {
    running: Mutex<Option<RunningServer>>,
}

struct RunningServer {
    base_url: String,
    accept_loop: JoinHandle<()>,
}

impl ContentServer {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self, dir: &Path) -> Result<String> {
        let mut guard = self.running.lock().await;
        if let Some(prior) = guard.take() {
            prior.accept_loop.abort();
        }

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("bind content server")?;
        let port = listener.local_addr()?.port();
        let base_url = format!("http://127.0.0.1:{port}");
        let root = dir.to_path_buf();

        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let root = root.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, &root).await {
                        eprintln!("[content-server] connection error: {err}");
                    }
                });
            }
        });

        *guard = Some(RunningServer {
            base_url: base_url.clone(),
            accept_loop,
        });
        Ok(base_url)
    }

    pub async fn stop(&self) {
        let mut guard = self.running.lock().await;
        if let Some(prior) = guard.take() {
            prior.accept_loop.abort();
        }
    }

    pub async fn base_url(&self) -> Option<String> {
        let guard = self.running.lock().await;
        guard.as_ref().map(|s| s.base_url.clone())
    }
}

impl Default for ContentServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_connection(mut stream: TcpStream, root: &Path) -> Result<()> {
    let mut raw = Vec::with_capacity(2048);
    let mut tmp = [0_u8; 1024];
    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&tmp[..n]);
        if raw.windows(4).any(|w| w == b"\r\n\r\n") || raw.len() > 16 * 1024 {
            break;
        }
    }
    let head = String::from_utf8_lossy(&raw);
    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    if method != "GET" {
        return write_response(&mut stream, 405, "text/plain", b"method not allowed").await;
    }

    match resolve_path(root, target) {
        Some(path) if path.is_file() => {
            let body = tokio::fs::read(&path).await?;
            write_response(&mut stream, 200, content_type_for(&path), &body).await
        }
        Some(path) if path.is_dir() => {
            // Content without an entry document still gets a navigable root.
            if let Some(index) = directory_index(&path) {
                let body = tokio::fs::read(&index).await?;
                write_response(&mut stream, 200, content_type_for(&index), &body).await
            } else {
                let body = render_listing(&path, target);
                write_response(&mut stream, 200, "text/html; charset=utf-8", body.as_bytes())
                    .await
            }
        }
        _ => write_response(&mut stream, 404, "text/plain", b"not found").await,
    }
}

fn directory_index(dir: &Path) -> Option<PathBuf> {
    ["index.html", "index.htm"]
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn render_listing(dir: &Path, target: &str) -> String {
    let prefix = target
        .split('?')
        .next()
        .unwrap_or("")
        .trim_end_matches('/');
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
    }
    names.sort();
    let mut rows = String::new();
    for name in &names {
        rows.push_str(&format!(r#"<li><a href="{prefix}/{name}">{name}</a></li>"#));
    }
    format!("<html><body><ul>{rows}</ul></body></html>")
}

/// Maps a request target onto the served directory, rejecting anything that
/// would escape it.
fn resolve_path(root: &Path, target: &str) -> Option<PathBuf> {
    let without_query = target.split('?').next().unwrap_or(target);
    let decoded = percent_decode(without_query);
    let mut path = root.to_path_buf();
    for component in decoded.split('/') {
        if component.is_empty() || component == "." {
            continue;
        }
        if component == ".." || component.contains('\\') {
            return None;
        }
        path.push(component);
    }
    Some(path)
}

// Decodes on raw bytes; the target comes straight off the wire and may
// put arbitrary (multibyte) bytes after a '%'.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Some(value) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi as u8) << 4 | lo as u8)
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => return Err(anyhow!("unsupported status {status}")),
    };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncWriteExt as _, net::TcpStream};

    use super::ContentServer;

    async fn raw_get(base_url: &str, target: &str) -> String {
        let addr = base_url.trim_start_matches("http://").to_string();
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .expect("send request");
        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut response)
            .await
            .expect("read response");
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn serves_files_with_relative_asset_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<html>tour</html>").expect("seed index");
        std::fs::create_dir_all(dir.path().join("assets")).expect("seed assets dir");
        std::fs::write(dir.path().join("assets/app.css"), "body{}").expect("seed css");

        let server = ContentServer::new();
        let base = server.start(dir.path()).await.expect("start server");

        let index = raw_get(&base, "/index.html").await;
        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("<html>tour</html>"));

        let css = raw_get(&base, "/assets/app.css").await;
        assert!(css.starts_with("HTTP/1.1 200"));
        assert!(css.contains("text/css"));

        let missing = raw_get(&base, "/absent.js").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        server.stop().await;
    }

    #[test]
    fn percent_decoding_survives_arbitrary_bytes() {
        assert_eq!(super::percent_decode("/a%20b"), "/a b");
        assert_eq!(super::percent_decode("/%41"), "/A");
        // '%' followed by multibyte text is passed through, not a panic.
        assert_eq!(super::percent_decode("/%€"), "/%€");
        assert_eq!(super::percent_decode("/%zz"), "/%zz");
        assert_eq!(super::percent_decode("/%4"), "/%4");
    }

    #[tokio::test]
    async fn directory_requests_serve_index_or_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("pano.jpg"), b"jpg").expect("seed file");
        std::fs::create_dir_all(dir.path().join("scenes")).expect("seed subdir");

        let server = ContentServer::new();
        let base = server.start(dir.path()).await.expect("start server");

        // No entry document anywhere: the root renders a listing.
        let listing = raw_get(&base, "/").await;
        assert!(listing.starts_with("HTTP/1.1 200"));
        assert!(listing.contains("pano.jpg"));
        assert!(listing.contains("scenes/"));

        // Once an index exists it wins over the listing.
        std::fs::write(dir.path().join("index.html"), "<html>entry</html>")
            .expect("seed index");
        let index = raw_get(&base, "/").await;
        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("<html>entry</html>"));

        server.stop().await;
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secret_dir = tempfile::tempdir().expect("secret dir");
        std::fs::write(secret_dir.path().join("secret.txt"), "nope").expect("seed secret");
        std::fs::write(dir.path().join("index.html"), "ok").expect("seed index");

        let server = ContentServer::new();
        let base = server.start(dir.path()).await.expect("start server");

        let response = raw_get(&base, "/../secret.txt").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        server.stop().await;
    }

    #[tokio::test]
    async fn restart_replaces_prior_instance_and_stop_is_idempotent() {
        let dir_a = tempfile::tempdir().expect("tempdir a");
        let dir_b = tempfile::tempdir().expect("tempdir b");
        std::fs::write(dir_a.path().join("index.html"), "a").expect("seed a");
        std::fs::write(dir_b.path().join("index.html"), "b").expect("seed b");

        let server = ContentServer::new();
        server.start(dir_a.path()).await.expect("start a");
        let base_b = server.start(dir_b.path()).await.expect("start b");

        let body = raw_get(&base_b, "/index.html").await;
        assert!(body.contains('b'));

        server.stop().await;
        server.stop().await;
        assert!(server.base_url().await.is_none());
    }
}
