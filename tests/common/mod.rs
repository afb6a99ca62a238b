//! A tiny HTTP/1.1 file server for exercising the patcher against real sockets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Shared {
    files: HashMap<String, Vec<u8>>,
    hits: HashMap<String, usize>,
    /// Remaining 503 answers per path before the file is served.
    failures: HashMap<String, usize>,
}

#[derive(Clone)]
pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let state = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, state.clone()));
            }
        });

        Self { addr, shared }
    }

    /// Serves `body` at `path` (e.g. `/Manifest`).
    pub fn put(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.shared.lock().unwrap().files.insert(path.to_string(), body.into());
    }

    /// Answers the next `times` requests for `path` with 503.
    pub fn fail_next(&self, path: &str, times: usize) {
        self.shared.lock().unwrap().failures.insert(path.to_string(), times);
    }

    /// GET requests seen for `path`. HEAD requests are not counted.
    pub fn hits(&self, path: &str) -> usize {
        self.shared.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.shared.lock().unwrap().hits.values().sum()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `127.0.0.1:<port>`, as a session expects it.
    pub fn host_port(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Mutex<Shared>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&request);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let body = {
        let mut guard = shared.lock().unwrap();
        let shared = &mut *guard;
        if method == "GET" {
            *shared.hits.entry(path.clone()).or_default() += 1;
        }
        match shared.failures.get_mut(&path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(())
            }
            _ => Ok(shared.files.get(&path).cloned()),
        }
    };

    let response = match body {
        Err(()) => b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        Ok(Some(body)) => {
            let mut out = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            if method != "HEAD" {
                out.extend_from_slice(&body);
            }
            out
        }
        Ok(None) => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
    };

    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Deterministic filler content of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
