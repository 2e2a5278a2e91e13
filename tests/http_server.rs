//! End-to-end tests over real sockets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use spindle::http::{handler_fn, AppError, Handler, HttpContext};

mod common;

use common::{exchange, read_response, start_server, test_config};

/// Echoes the request body and reports which connection served it.
struct Echo {
    calls: AtomicUsize,
}

impl Echo {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl Handler for Echo {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = ctx.request_body().read_to_end(1 << 20).await?;
            let connection = ctx.connection_id().to_string();
            let method = ctx.request().method.to_string();

            let response = ctx.response_mut();
            response.headers_mut().insert("Content-Length", body.len().to_string())?;
            response.headers_mut().insert("X-Connection", connection)?;
            response.headers_mut().insert("X-Method", method)?;
            response.write(body).await?;
            Ok(())
        })
    }
}

/// Sleeps before answering.
struct Slow(Duration);

impl Handler for Slow {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            let response = ctx.response_mut();
            response.headers_mut().insert("Content-Length", "4")?;
            response.write("done").await?;
            Ok(())
        })
    }
}

/// Never answers; returns once the connection is aborted.
struct Stuck;

impl Handler for Stuck {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let reason = ctx.lifetime().aborted().await;
            Err(format!("aborted: {reason}").into())
        })
    }
}

/// Answers without touching the request body.
struct IgnoresBody;

impl Handler for IgnoresBody {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let response = ctx.response_mut();
            response.headers_mut().insert("Content-Length", "2")?;
            response.write("ok").await?;
            Ok(())
        })
    }
}

/// Waits up to four seconds for the connection to be cancelled.
struct WatchesLifetime {
    cancelled: AtomicBool,
}

impl Handler for WatchesLifetime {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let aborted = tokio::time::timeout(Duration::from_secs(4), ctx.lifetime().aborted()).await;
            self.cancelled.store(aborted.is_ok(), Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn simple_get_exact_bytes() {
    let handler = handler_fn(|ctx| {
        Box::pin(async move {
            let response = ctx.response_mut();
            response.headers_mut().insert("Content-Length", "5")?;
            response.write("hello").await?;
            Ok::<(), AppError>(())
        })
    });
    let server = start_server(test_config(), Arc::new(handler)).await;

    let out = exchange(server.addr, b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").await;
    assert_eq!(
        out,
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello".to_vec()
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn chunked_post_body_is_decoded() {
    let server = start_server(test_config(), Echo::new()).await;

    let out = exchange(
        server.addr,
        b"POST /upload HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
          5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.contains("X-Method: POST\r\n"));
    assert!(text.ends_with("\r\n\r\nhello world"), "{text}");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_header_is_rejected_without_calling_handler() {
    let echo = Echo::new();
    let server = start_server(test_config(), Arc::clone(&echo) as Arc<dyn Handler>).await;

    let out = exchange(server.addr, b"GET / HTTP/1.1\r\nHost test\r\n\r\n").await;
    assert_eq!(
        out,
        b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
    );
    assert_eq!(echo.calls.load(Ordering::SeqCst), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn unsupported_version_gets_505() {
    let server = start_server(test_config(), Echo::new()).await;
    let out = exchange(server.addr, b"GET / HTTP/2.0\r\nHost: test\r\n\r\n").await;
    assert!(out.starts_with(b"HTTP/1.1 505 HTTP Version Not Supported\r\n"));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn keep_alive_reuses_connection() {
    let server = start_server(test_config(), Echo::new()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut buffered = Vec::new();

    stream
        .write_all(b"POST /a HTTP/1.1\r\nHost: test\r\nContent-Length: 3\r\n\r\none")
        .await
        .unwrap();
    let first = read_response(&mut stream, &mut buffered).await;
    assert_eq!(first.status(), 200);
    assert_eq!(first.body, b"one");

    // Two pipelined requests in one write.
    stream
        .write_all(
            b"POST /b HTTP/1.1\r\nHost: test\r\nContent-Length: 3\r\n\r\ntwo\
              GET /c HTTP/1.1\r\nHost: test\r\n\r\n",
        )
        .await
        .unwrap();
    let second = read_response(&mut stream, &mut buffered).await;
    let third = read_response(&mut stream, &mut buffered).await;
    assert_eq!(second.body, b"two");
    assert_eq!(third.header("x-method"), Some("GET"));

    let connection = first.header("x-connection").unwrap();
    assert_eq!(second.header("x-connection"), Some(connection));
    assert_eq!(third.header("x-connection"), Some(connection));
    assert_eq!(first.header("connection"), None);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn http10_closes_by_default() {
    let server = start_server(test_config(), Echo::new()).await;
    let out = exchange(server.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn handler_error_becomes_500() {
    let handler = handler_fn(|_ctx| Box::pin(async move { Err::<(), AppError>("boom".into()) }));
    let server = start_server(test_config(), Arc::new(handler)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut buffered = Vec::new();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let response = read_response(&mut stream, &mut buffered).await;
    assert_eq!(response.status(), 500);
    assert_eq!(response.header("content-length"), Some("0"));

    // The connection survives an application error.
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    assert_eq!(read_response(&mut stream, &mut buffered).await.status(), 500);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn expect_continue_is_answered_on_first_read() {
    let server = start_server(test_config(), Echo::new()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(b"PUT /x HTTP/1.1\r\nHost: test\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\n")
        .await
        .unwrap();

    let interim = b"HTTP/1.1 100 Continue\r\n\r\n";
    let mut buf = vec![0u8; interim.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, interim.to_vec());

    stream.write_all(b"data").await.unwrap();
    let mut buffered = Vec::new();
    let response = read_response(&mut stream, &mut buffered).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body, b"data");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_body_gets_413() {
    let mut config = test_config();
    config.limits.max_body_bytes = Some(4);
    let echo = Echo::new();
    let server = start_server(config, Arc::clone(&echo) as Arc<dyn Handler>).await;

    let out = exchange(
        server.addr,
        b"POST / HTTP/1.1\r\nHost: test\r\nContent-Length: 10\r\n\r\n0123456789",
    )
    .await;
    assert!(out.starts_with(b"HTTP/1.1 413 Payload Too Large\r\n"));
    assert_eq!(echo.calls.load(Ordering::SeqCst), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn slow_request_head_gets_408() {
    let mut config = test_config();
    config.timeouts.request_headers_secs = 1;
    let server = start_server(config, Echo::new()).await;

    let started = Instant::now();
    let out = exchange(server.addr, b"GET / HTTP/1.1\r\nHost: te").await;
    assert!(out.starts_with(b"HTTP/1.1 408 Request Timeout\r\n"));
    assert!(started.elapsed() >= Duration::from_millis(900));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn reqwest_round_trip() {
    let server = start_server(test_config(), Echo::new()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/echo", server.addr);

    for body in ["first", "second"] {
        let response = client.post(&url).body(body).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["x-method"], "POST");
        assert_eq!(response.text().await.unwrap(), body);
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_finishes_in_flight_requests() {
    let mut server = start_server(test_config(), Arc::new(Slow(Duration::from_millis(300)))).await;
    let addr = server.addr;

    let client = tokio::spawn(async move { exchange(addr, b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.begin_stop();

    let out = client.await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("done"));

    server.join().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn drain_timeout_aborts_stuck_requests() {
    let mut config = test_config();
    config.workers.drain_timeout_secs = 1;
    let server = start_server(config, Arc::new(Stuck)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    server.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out).await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn stalled_request_body_closes_connection() {
    let mut config = test_config();
    config.timeouts.keep_alive_secs = 1;
    config.timeouts.request_headers_secs = 1;
    let server = start_server(config, Arc::new(IgnoresBody)).await;

    let started = Instant::now();
    let out = exchange(server.addr, b"POST / HTTP/1.1\r\nHost: test\r\nContent-Length: 10\r\n\r\n").await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("\r\n\r\nok"), "{text}");
    assert!(started.elapsed() < Duration::from_secs(4));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn client_disconnect_cancels_request() {
    let handler = Arc::new(WatchesLifetime {
        cancelled: AtomicBool::new(false),
    });
    let server = start_server(test_config(), Arc::clone(&handler) as Arc<dyn Handler>).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    // Let the handler start before the client goes away.
    tokio::time::sleep(Duration::from_millis(200)).await;
    stream.shutdown().await.unwrap();

    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut out)).await;
    assert!(out.is_empty(), "{}", String::from_utf8_lossy(&out));
    server.stop().await.unwrap();
    assert!(handler.cancelled.load(Ordering::SeqCst));
}
