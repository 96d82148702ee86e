//! End-to-end tests against a real listener on 127.0.0.1.
//!
//! Each test binds its own server on an ephemeral port with a temporary
//! content root and talks raw HTTP/1.1 over a TcpStream.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ingress::http::body;
use ingress::{
    BoxError, NormalizedRequest, OutgoingResponse, RequestAdapter, Server, StaticFileResolver,
    StatusCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

// ── Helpers ─────────────────────────────────────────────────────────

struct RawResponse {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RawResponse {
    fn parse(raw: &[u8]) -> Self {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Response::new(&mut headers);
        let offset = match parsed.parse(raw).expect("valid response head") {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => panic!("truncated response head"),
        };

        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_owned(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();
        let chunked = headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v == "chunked");

        let rest = &raw[offset..];
        let body = if chunked { dechunk(rest) } else { rest.to_vec() };

        Self {
            status: parsed.code.expect("status code"),
            reason: parsed.reason.unwrap_or("").to_owned(),
            headers,
            body,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn dechunk(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let (offset, size) = match httparse::parse_chunk_size(raw).expect("valid chunk size") {
            httparse::Status::Complete(pair) => pair,
            httparse::Status::Partial => panic!("truncated chunked body"),
        };
        let size = size as usize;
        if size == 0 {
            return out;
        }
        out.extend_from_slice(&raw[offset..offset + size]);
        raw = &raw[offset + size + 2..];
    }
}

fn content_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let public = dir.path().join("public");
    fs::create_dir_all(public.join("assets")).unwrap();
    fs::write(public.join("assets/logo.png"), [0x89, b'P', b'N', b'G', 0, 0xFF, 0x10]).unwrap();
    fs::write(public.join("assets/app.js"), b"console.log('dashboard');").unwrap();
    fs::write(public.join("favicon.svg"), b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>").unwrap();
    fs::write(public.join("report.xyz"), b"opaque").unwrap();
    fs::write(dir.path().join("secret.txt"), b"do not serve").unwrap();
    dir
}

async fn start(adapter: RequestAdapter) -> SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(adapter));
    addr
}

async fn send(addr: SocketAddr, raw: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    RawResponse::parse(&out)
}

fn get(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: dashboard.test\r\n\r\n").into_bytes()
}

fn counting_handler(calls: Arc<AtomicUsize>) -> impl ingress::Handler {
    move |req: NormalizedRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok::<_, BoxError>(
                OutgoingResponse::new(StatusCode::NotFound)
                    .header("Content-Type", "text/plain")
                    .body(format!("handler: {}", req.url().path())),
            )
        }
    }
}

// ── Static assets ───────────────────────────────────────────────────

#[tokio::test]
async fn static_get_serves_exact_bytes() {
    let root = content_root();
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        counting_handler(Arc::clone(&calls)),
    ))
    .await;

    let response = send(addr, &get("/assets/logo.png")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, [0x89, b'P', b'N', b'G', 0, 0xFF, 0x10]);
    assert_eq!(response.header("content-length"), Some("7"));
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(
        response.header("cache-control"),
        Some("public, max-age=31536000, immutable")
    );

    let response = send(addr, &get("/report.xyz")).await;
    assert_eq!(response.header("content-type"), Some("application/octet-stream"));
    assert_eq!(response.text(), "opaque");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn static_head_matches_get_without_body() {
    let root = content_root();
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        counting_handler(Arc::new(AtomicUsize::new(0))),
    ))
    .await;

    let full = send(addr, &get("/assets/app.js")).await;
    let head = send(
        addr,
        b"HEAD /assets/app.js HTTP/1.1\r\nHost: dashboard.test\r\n\r\n",
    )
    .await;

    assert_eq!(head.status, full.status);
    assert_eq!(head.headers, full.headers);
    assert_eq!(head.header("content-length"), Some("25"));
    assert_eq!(head.header("content-type"), Some("application/javascript"));
    assert!(head.body.is_empty());
    assert_eq!(full.body.len(), 25);
}

#[tokio::test]
async fn root_level_files_get_short_cache() {
    let root = content_root();
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        counting_handler(Arc::new(AtomicUsize::new(0))),
    ))
    .await;

    let response = send(addr, &get("/favicon.svg")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("image/svg+xml"));
    assert_eq!(response.header("cache-control"), Some("public, max-age=3600"));
}

#[tokio::test]
async fn traversal_falls_through_to_handler() {
    let root = content_root();
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        counting_handler(Arc::clone(&calls)),
    ))
    .await;

    let response = send(addr, &get("/assets/%2e%2e/%2e%2e/secret.txt")).await;
    assert_eq!(response.status, 404);
    assert!(!response.text().contains("do not serve"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn miss_dispatches_once_and_passes_response_through() {
    let root = content_root();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        move |req: NormalizedRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, BoxError>(
                    OutgoingResponse::new(202u16)
                        .status_text("Queued")
                        .header("X-Route", req.url().path().to_owned())
                        .header("Set-Cookie", "session=abc; Path=/")
                        .header("Set-Cookie", "theme=dark; Path=/")
                        .body("accepted"),
                )
            }
        },
    ))
    .await;

    let response = send(addr, &get("/dashboard/users?page=2")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.status, 202);
    assert_eq!(response.reason, "Queued");
    assert_eq!(response.header("x-route"), Some("/dashboard/users"));
    assert_eq!(
        response.header_all("set-cookie"),
        vec!["session=abc; Path=/", "theme=dark; Path=/"]
    );
    assert_eq!(response.text(), "accepted");
}

#[tokio::test]
async fn post_goes_to_handler_even_when_file_exists() {
    let root = content_root();
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        |req: NormalizedRequest| async move {
            let body = req.body().cloned().unwrap_or_default();
            Ok::<_, BoxError>(
                OutgoingResponse::new(StatusCode::Ok)
                    .header("X-Method", req.method().as_str().to_owned())
                    .body(body),
            )
        },
    ))
    .await;

    let response = send(
        addr,
        b"POST /favicon.svg HTTP/1.1\r\nHost: dashboard.test\r\nContent-Length: 4\r\n\r\nping",
    )
    .await;
    assert_eq!(response.header("x-method"), Some("POST"));
    assert_eq!(response.text(), "ping");
}

#[tokio::test]
async fn chunked_upload_is_reassembled() {
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new("/nonexistent/ingress-root"),
        |req: NormalizedRequest| async move {
            let len = req.body().map(|b| b.len()).unwrap_or(0);
            Ok::<_, BoxError>(OutgoingResponse::new(StatusCode::Ok).body(len.to_string()))
        },
    ))
    .await;

    let response = send(
        addr,
        b"PUT /api/settings HTTP/1.1\r\nHost: dashboard.test\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n3\r\nefg\r\n0\r\n\r\n",
    )
    .await;
    assert_eq!(response.text(), "7");
}

#[tokio::test]
async fn repeated_cookie_headers_are_merged() {
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new("/nonexistent/ingress-root"),
        |req: NormalizedRequest| async move {
            let cookie = req.headers().get("cookie").unwrap_or_default().to_owned();
            Ok::<_, BoxError>(OutgoingResponse::new(StatusCode::Ok).body(cookie))
        },
    ))
    .await;

    let response = send(
        addr,
        b"GET /profile HTTP/1.1\r\nHost: dashboard.test\r\nCookie: a=1\r\nCookie: b=2\r\n\r\n",
    )
    .await;
    assert_eq!(response.text(), "a=1, b=2");
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn handler_error_becomes_single_500() {
    let root = content_root();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new(root.path().join("public")),
        move |_req: NormalizedRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<OutgoingResponse, _>(std::io::Error::other("render failed")) }
        },
    ))
    .await;

    let response = send(addr, &get("/settings")).await;
    assert_eq!(response.status, 500);
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.text(), "Internal Server Error");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_request_gets_400_and_server_keeps_serving() {
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new("/nonexistent/ingress-root"),
        counting_handler(Arc::clone(&calls)),
    ))
    .await;

    let bad = send(addr, b"GET /x HTTP/1.1\r\nHost: not a host\r\n\r\n").await;
    assert_eq!(bad.status, 400);
    assert_eq!(bad.text(), "Bad Request");

    let good = send(addr, &get("/after")).await;
    assert_eq!(good.status, 404);
    assert_eq!(good.text(), "handler: /after");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Streaming ───────────────────────────────────────────────────────

#[tokio::test]
async fn streamed_chunks_arrive_in_order() {
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new("/nonexistent/ingress-root"),
        |_req: NormalizedRequest| async {
            let (tx, source) = body::channel(1);
            tokio::spawn(async move {
                for chunk in ["<html>", "<body>dashboard</body>", "</html>"] {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            });
            Ok::<_, BoxError>(
                OutgoingResponse::new(StatusCode::Ok)
                    .header("Content-Type", "text/html")
                    .stream(source),
            )
        },
    ))
    .await;

    let response = send(addr, &get("/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("transfer-encoding"), Some("chunked"));
    assert_eq!(response.text(), "<html><body>dashboard</body></html>");
    assert_eq!(response.body.len(), 6 + 22 + 7);
}

#[tokio::test]
async fn slow_handler_does_not_block_other_connections() {
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let addr = start(RequestAdapter::new(
        StaticFileResolver::new("/nonexistent/ingress-root"),
        move |req: NormalizedRequest| {
            let gate = Arc::clone(&gate);
            async move {
                if req.url().path() == "/slow" {
                    gate.notified().await;
                }
                Ok::<_, BoxError>(
                    OutgoingResponse::new(StatusCode::Ok).body(req.url().path().to_owned()),
                )
            }
        },
    ))
    .await;

    let slow = tokio::spawn(async move { send(addr, &get("/slow")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = tokio::time::timeout(Duration::from_secs(5), send(addr, &get("/fast")))
        .await
        .expect("fast request must not wait for the slow one");
    assert_eq!(fast.text(), "/fast");
    assert!(!slow.is_finished());

    release.notify_one();
    let slow = slow.await.unwrap();
    assert_eq!(slow.text(), "/slow");
}
