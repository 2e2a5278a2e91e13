//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use spindle::config::ServerConfig;
use spindle::http::{Handler, HttpServer, ServerError};
use spindle::transport::ListenEndpoint;

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Trigger graceful shutdown and wait for it to finish.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.expect("server task panicked")
    }

    /// Start shutdown without waiting for it.
    pub fn begin_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    pub async fn join(self) -> Result<(), ServerError> {
        self.task.await.expect("server task panicked")
    }
}

/// Config bound to 127.0.0.1:0 with two workers and short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.endpoint = ListenEndpoint::Tcp("127.0.0.1:0".parse().unwrap());
    config.workers.count = 2;
    config.workers.drain_timeout_secs = 2;
    config.timeouts.keep_alive_secs = 5;
    config.timeouts.request_headers_secs = 5;
    config
}

pub async fn start_server(config: ServerConfig, handler: Arc<dyn Handler>) -> TestServer {
    let server = HttpServer::bind(&config, handler).expect("bind failed");
    let addr = match server.local_endpoint() {
        ListenEndpoint::Tcp(addr) => addr,
        other => panic!("expected a TCP endpoint, got {other}"),
    };

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        stop: Some(stop),
        task,
    }
}

/// Send `request` and read until the server closes the connection.
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    out
}

/// One response read off a persistent connection.
#[derive(Debug)]
pub struct RawResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.head[9..12].parse().unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// Read one Content-Length framed response, leaving the connection open.
pub async fn read_response(stream: &mut TcpStream, buffered: &mut Vec<u8>) -> RawResponse {
    let head_end = loop {
        if let Some(pos) = buffered.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for response head")
            .unwrap();
        assert!(n > 0, "connection closed before response head");
        buffered.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buffered[..head_end].to_vec()).unwrap();
    buffered.drain(..head_end);
    let mut response = RawResponse { head, body: Vec::new() };

    let length: usize = response.header("content-length").map(|v| v.parse().unwrap()).unwrap_or(0);
    while buffered.len() < length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before response body");
        buffered.extend_from_slice(&chunk[..n]);
    }
    response.body = buffered.drain(..length).collect();
    response
}
